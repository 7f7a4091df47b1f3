//! Fixed synthetic workloads.
//!
//! Each plan creates its table if needed, upserts the same five rows, and runs
//! a fixed set of reads. The average query is issued three times so the
//! statement digest records a call count above one.

use crate::backend::DbSystem;
use crate::stage::{FailureKind, StageResult};

/// Number of times the repeated read is issued.
pub const REPEATED_QUERY_RUNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadPlan {
    pub system: DbSystem,
    /// Table name, doubling as the fingerprint searched for downstream.
    pub table: &'static str,
    pub create_table: &'static str,
    /// Insert of the fixed batch; must be safe to re-run.
    pub upsert_rows: &'static str,
    pub rows: usize,
    /// Reads issued once each.
    pub reads: &'static [&'static str],
    /// Read issued [`REPEATED_QUERY_RUNS`] times.
    pub repeated_read: &'static str,
}

impl WorkloadPlan {
    pub fn for_system(system: DbSystem) -> &'static Self {
        match system {
            DbSystem::Mysql => &MYSQL_WORKLOAD,
            DbSystem::Postgresql => &POSTGRES_WORKLOAD,
        }
    }

    /// All read statements in execution order.
    pub fn read_sequence(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.reads
            .iter()
            .copied()
            .chain(std::iter::repeat_n(self.repeated_read, REPEATED_QUERY_RUNS))
    }

    pub fn fingerprint(&self) -> &'static str {
        self.table
    }
}

pub static MYSQL_WORKLOAD: WorkloadPlan = WorkloadPlan {
    system: DbSystem::Mysql,
    table: "orders",
    create_table: "CREATE TABLE IF NOT EXISTS orders (
  id INT AUTO_INCREMENT PRIMARY KEY,
  customer_id INT NOT NULL,
  order_date DATETIME NOT NULL,
  amount DECIMAL(10,2) NOT NULL,
  status VARCHAR(20) NOT NULL
)",
    upsert_rows: "INSERT INTO orders (id, customer_id, order_date, amount, status)
VALUES
  (1, 101, NOW(), 199.99, 'completed'),
  (2, 102, NOW(), 99.50, 'pending'),
  (3, 103, NOW(), 50.25, 'completed'),
  (4, 104, NOW(), 25.99, 'cancelled'),
  (5, 105, NOW(), 39.99, 'pending')
ON DUPLICATE KEY UPDATE order_date = NOW()",
    rows: 5,
    reads: &[
        "SELECT * FROM orders WHERE amount > 50",
        "SELECT status, COUNT(*) AS count, SUM(amount) AS total FROM orders GROUP BY status",
        "SELECT customer_id, COUNT(*) FROM orders GROUP BY customer_id HAVING COUNT(*) > 0",
    ],
    repeated_read: "SELECT AVG(amount) AS average_order FROM orders",
};

pub static POSTGRES_WORKLOAD: WorkloadPlan = WorkloadPlan {
    system: DbSystem::Postgresql,
    table: "products",
    create_table: "CREATE TABLE IF NOT EXISTS products (
  id SERIAL PRIMARY KEY,
  name VARCHAR(100) NOT NULL,
  category VARCHAR(50) NOT NULL,
  price DECIMAL(10,2) NOT NULL,
  inventory INT NOT NULL
)",
    upsert_rows: "INSERT INTO products (id, name, category, price, inventory)
VALUES
  (1, 'Laptop', 'Electronics', 999.99, 25),
  (2, 'Smartphone', 'Electronics', 699.50, 50),
  (3, 'Headphones', 'Accessories', 89.99, 100),
  (4, 'Monitor', 'Electronics', 249.99, 15),
  (5, 'Keyboard', 'Accessories', 59.99, 30)
ON CONFLICT (id) DO NOTHING",
    rows: 5,
    reads: &[
        "SELECT * FROM products WHERE price > 100",
        "SELECT category, COUNT(*) AS count, SUM(price) AS total_price FROM products GROUP BY category",
        "SELECT * FROM products ORDER BY price DESC",
    ],
    repeated_read: "SELECT AVG(price) AS average_price FROM products",
};

/// Outcome of running a plan against one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadReport {
    pub system: DbSystem,
    /// Statements that completed before success or the first failure.
    pub statements_executed: usize,
    pub error: Option<WorkloadError>,
    /// Statement-statistics rows matching the fingerprint, when the backend
    /// reads them back after the workload.
    pub digest_matches: Option<usize>,
}

/// Where in the workload a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    Connect(String),
    Statement { statement: String, message: String },
}

impl std::fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(message) => write!(f, "connection failed: {message}"),
            Self::Statement { statement, message } => {
                let head = statement.lines().next().unwrap_or_default();
                write!(f, "`{head}` failed: {message}")
            }
        }
    }
}

impl WorkloadReport {
    pub fn succeeded(system: DbSystem, statements_executed: usize) -> Self {
        Self {
            system,
            statements_executed,
            error: None,
            digest_matches: None,
        }
    }

    pub fn failed(system: DbSystem, statements_executed: usize, error: WorkloadError) -> Self {
        Self {
            system,
            statements_executed,
            error: Some(error),
            digest_matches: None,
        }
    }

    pub fn with_digest_matches(mut self, matches: usize) -> Self {
        self.digest_matches = Some(matches);
        self
    }

    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_stage_result(&self) -> StageResult {
        let key = self.system.test_data_key();
        match &self.error {
            None => {
                let mut detail = format!(
                    "{} statements against {}",
                    self.statements_executed,
                    WorkloadPlan::for_system(self.system).table
                );
                if let Some(matches) = self.digest_matches {
                    detail.push_str(&format!(", {matches} digest rows"));
                }
                StageResult::passed(key, detail)
            }
            Some(error @ WorkloadError::Connect(_)) => {
                StageResult::failed(key, FailureKind::Connectivity, error.to_string())
            }
            Some(error) => StageResult::failed(key, FailureKind::ExecutionFailure, error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKey;

    #[test]
    fn repeated_read_runs_three_times() {
        for plan in [&MYSQL_WORKLOAD, &POSTGRES_WORKLOAD] {
            let reads: Vec<_> = plan.read_sequence().collect();
            assert_eq!(reads.len(), plan.reads.len() + REPEATED_QUERY_RUNS);
            assert_eq!(
                reads.iter().filter(|q| **q == plan.repeated_read).count(),
                REPEATED_QUERY_RUNS
            );
        }
    }

    #[test]
    fn inserts_are_rerunnable() {
        assert!(MYSQL_WORKLOAD.upsert_rows.contains("ON DUPLICATE KEY UPDATE"));
        assert!(POSTGRES_WORKLOAD.upsert_rows.contains("ON CONFLICT (id) DO NOTHING"));
        assert!(MYSQL_WORKLOAD.create_table.starts_with("CREATE TABLE IF NOT EXISTS"));
        assert!(POSTGRES_WORKLOAD.create_table.starts_with("CREATE TABLE IF NOT EXISTS"));
    }

    #[test]
    fn every_statement_carries_the_fingerprint() {
        for plan in [&MYSQL_WORKLOAD, &POSTGRES_WORKLOAD] {
            assert!(plan.upsert_rows.contains(plan.fingerprint()));
            assert!(plan.read_sequence().all(|q| q.contains(plan.fingerprint())));
        }
        assert_eq!(DbSystem::Mysql.fingerprint(), MYSQL_WORKLOAD.fingerprint());
        assert_eq!(DbSystem::Postgresql.fingerprint(), POSTGRES_WORKLOAD.fingerprint());
    }

    #[test]
    fn batch_has_fixed_explicit_ids() {
        for plan in [&MYSQL_WORKLOAD, &POSTGRES_WORKLOAD] {
            let value_rows = plan
                .upsert_rows
                .lines()
                .filter(|line| line.trim_start().starts_with('('))
                .count();
            assert_eq!(value_rows, plan.rows);
        }
    }

    #[test]
    fn connect_failure_maps_to_connectivity() {
        let report = WorkloadReport::failed(
            DbSystem::Mysql,
            0,
            WorkloadError::Connect("timed out".into()),
        );
        let result = report.to_stage_result();
        assert_eq!(result.key(), StageKey::MysqlTestData);
        assert_eq!(result.failure(), Some(FailureKind::Connectivity));
    }

    #[test]
    fn statement_failure_names_first_line() {
        let report = WorkloadReport::failed(
            DbSystem::Postgresql,
            1,
            WorkloadError::Statement {
                statement: POSTGRES_WORKLOAD.upsert_rows.to_owned(),
                message: "permission denied".into(),
            },
        );
        let result = report.to_stage_result();
        assert_eq!(result.failure(), Some(FailureKind::ExecutionFailure));
        assert_eq!(
            result.detail(),
            Some("`INSERT INTO products (id, name, category, price, inventory)` failed: permission denied")
        );
    }
}
