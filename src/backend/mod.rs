//! Relational engines whose query telemetry the pipeline collects.

mod mysql;
mod postgres;

pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::probe::ProbeReport;
use crate::stage::StageKey;
use crate::workload::WorkloadReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DbSystem {
    Mysql,
    Postgresql,
}

impl DbSystem {
    pub const ALL: [Self; 2] = [Self::Mysql, Self::Postgresql];

    /// Value of the `db.system` attribute the collectors stamp on each record.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
        }
    }

    /// Short name used in analytical store query ids (`test-pg-count`).
    pub const fn query_tag(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "pg",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Mysql => "MySQL",
            Self::Postgresql => "PostgreSQL",
        }
    }

    /// Table name used by the synthetic workload.
    pub const fn fingerprint(self) -> &'static str {
        match self {
            Self::Mysql => "orders",
            Self::Postgresql => "products",
        }
    }

    pub const fn connection_key(self) -> StageKey {
        match self {
            Self::Mysql => StageKey::MysqlConnection,
            Self::Postgresql => StageKey::PostgresqlConnection,
        }
    }

    pub const fn capability_key(self) -> StageKey {
        match self {
            Self::Mysql => StageKey::MysqlPerfSchema,
            Self::Postgresql => StageKey::PostgresqlStats,
        }
    }

    pub const fn test_data_key(self) -> StageKey {
        match self {
            Self::Mysql => StageKey::MysqlTestData,
            Self::Postgresql => StageKey::PostgresqlTestData,
        }
    }

    pub const fn script_key(self) -> StageKey {
        match self {
            Self::Mysql => StageKey::MysqlProcessorScript,
            Self::Postgresql => StageKey::PostgresqlProcessorScript,
        }
    }
}

impl fmt::Display for DbSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A relational engine the harness can probe and drive workload into.
///
/// Implementations open their own connection per call and close it before
/// returning; neither method returns an error.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    fn system(&self) -> DbSystem;

    /// Connects, reads the server version, and checks the instrumentation
    /// prerequisites.
    async fn probe(&self) -> ProbeReport;

    /// Runs the fixed workload plan for this engine.
    async fn generate_workload(&self) -> WorkloadReport;
}

/// Bounds a connection attempt; sqlx's own connect has no overall deadline.
async fn connect_within<T, E, F>(timeout: Duration, connect: F) -> Result<T, String>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err(format!("connection timed out after {timeout:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_system() {
        assert_eq!(DbSystem::Mysql.connection_key(), StageKey::MysqlConnection);
        assert_eq!(DbSystem::Postgresql.capability_key(), StageKey::PostgresqlStats);
        assert_eq!(DbSystem::Postgresql.test_data_key(), StageKey::PostgresqlTestData);
        assert_eq!(DbSystem::Mysql.script_key(), StageKey::MysqlProcessorScript);
    }

    #[tokio::test]
    async fn connect_within_times_out() {
        let result: Result<(), String> = connect_within(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), std::io::Error>(())
        })
        .await;
        assert_eq!(result, Err("connection timed out after 10ms".to_owned()));
    }
}
