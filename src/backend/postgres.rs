use async_trait::async_trait;
use sqlx::{Connection, Executor};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::time::Duration;

use super::{DatabaseBackend, DbSystem, connect_within};
use crate::config::PostgresConfig;
use crate::probe::{CapabilityCheck, ProbeReport};
use crate::workload::{WorkloadError, WorkloadPlan, WorkloadReport};

const STATS_EXTENSION: &str = "pg_stat_statements";
const STATS_VIEW: &str = "pg_stat_statements_view";

pub struct PostgresBackend {
    config: PostgresConfig,
    connect_timeout: Duration,
}

impl PostgresBackend {
    pub fn new(config: PostgresConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
        }
    }

    fn target(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.config.user, self.config.host, self.config.port, self.config.database
        )
    }

    fn options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
    }

    async fn connect(&self) -> Result<PgConnection, String> {
        connect_within(
            self.connect_timeout,
            PgConnection::connect_with(&self.options()),
        )
        .await
    }
}

async fn run_plan(conn: &mut PgConnection) -> WorkloadReport {
    let plan = WorkloadPlan::for_system(DbSystem::Postgresql);

    let mut executed = 0;
    for statement in [plan.create_table, plan.upsert_rows] {
        if let Err(err) = Executor::execute(&mut *conn, statement).await {
            return WorkloadReport::failed(
                DbSystem::Postgresql,
                executed,
                statement_error(statement, &err),
            );
        }
        executed += 1;
    }

    for statement in plan.read_sequence() {
        if let Err(err) = Executor::fetch_all(&mut *conn, statement).await {
            return WorkloadReport::failed(
                DbSystem::Postgresql,
                executed,
                statement_error(statement, &err),
            );
        }
        executed += 1;
    }

    let report = WorkloadReport::succeeded(DbSystem::Postgresql, executed);
    match digest_matches(conn, plan.fingerprint()).await {
        Ok(matches) => report.with_digest_matches(matches),
        Err(err) => {
            // The statistics view may lag or be unreadable for this role; the
            // workload itself already completed.
            tracing::warn!(error = %err, "could not read back pg_stat_statements");
            report
        }
    }
}

/// Counts statement-statistics entries mentioning `fingerprint`.
async fn digest_matches(conn: &mut PgConnection, fingerprint: &str) -> Result<usize, sqlx::Error> {
    let queries = sqlx::query_scalar::<_, String>(
        "SELECT query FROM pg_stat_statements WHERE query LIKE $1 ORDER BY calls DESC LIMIT 5",
    )
    .bind(format!("%{fingerprint}%"))
    .fetch_all(&mut *conn)
    .await?;

    if queries.is_empty() {
        tracing::warn!(fingerprint, "no matching entries in pg_stat_statements yet");
    }
    for query in &queries {
        tracing::debug!(%query, "pg_stat_statements entry");
    }
    Ok(queries.len())
}

fn statement_error(statement: &str, err: &sqlx::Error) -> WorkloadError {
    WorkloadError::Statement {
        statement: statement.to_owned(),
        message: err.to_string(),
    }
}

async fn extension_check(conn: &mut PgConnection) -> CapabilityCheck {
    let installed = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements')",
    )
    .fetch_one(&mut *conn)
    .await;
    match installed {
        Ok(true) => CapabilityCheck::pass(STATS_EXTENSION, "extension installed"),
        Ok(false) => CapabilityCheck::fail(STATS_EXTENSION, "extension is not installed"),
        Err(err) => CapabilityCheck::fail(STATS_EXTENSION, err.to_string()),
    }
}

async fn view_check(conn: &mut PgConnection) -> CapabilityCheck {
    let readable = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM pg_stat_statements LIMIT 1)",
    )
    .fetch_one(&mut *conn)
    .await;
    match readable {
        Ok(true) => CapabilityCheck::pass(STATS_VIEW, "view returns rows"),
        Ok(false) => CapabilityCheck::fail(STATS_VIEW, "view returned no rows"),
        Err(err) => CapabilityCheck::fail(STATS_VIEW, format!("cannot query view: {err}")),
    }
}

async fn close(conn: PgConnection) {
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "error while closing PostgreSQL connection");
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    fn system(&self) -> DbSystem {
        DbSystem::Postgresql
    }

    async fn probe(&self) -> ProbeReport {
        let target = self.target();
        tracing::info!(%target, "testing PostgreSQL connection");

        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(%target, error = %err, "failed to connect to PostgreSQL");
                return ProbeReport::unreachable(target, err);
            }
        };

        let report = match sqlx::query_scalar::<_, String>("SELECT version()")
            .fetch_one(&mut conn)
            .await
        {
            Ok(version) => {
                tracing::info!(%version, "connected to PostgreSQL");
                let mut report = ProbeReport::connected(target, Some(version));
                let extension = extension_check(&mut conn).await;
                let installed = extension.passed;
                report.push_check(extension);
                if installed {
                    report.push_check(view_check(&mut conn).await);
                }
                report
            }
            Err(err) => ProbeReport::unreachable(target, format!("version query failed: {err}")),
        };
        close(conn).await;

        for check in report.checks() {
            if check.passed {
                tracing::info!(check = check.name, "PostgreSQL prerequisite satisfied");
            } else {
                tracing::error!(check = check.name, detail = %check.detail, "PostgreSQL prerequisite missing");
            }
        }
        report
    }

    async fn generate_workload(&self) -> WorkloadReport {
        tracing::info!("generating test data in PostgreSQL");

        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(error = %err, "failed to generate PostgreSQL test data");
                return WorkloadReport::failed(
                    DbSystem::Postgresql,
                    0,
                    WorkloadError::Connect(err),
                );
            }
        };
        let report = run_plan(&mut conn).await;
        close(conn).await;

        match &report.error {
            None => tracing::info!(
                statements = report.statements_executed,
                digest_matches = ?report.digest_matches,
                "generated test data in PostgreSQL"
            ),
            Some(err) => tracing::error!(error = %err, "failed to generate PostgreSQL test data"),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_database() {
        let backend = PostgresBackend::new(PostgresConfig::default(), Duration::from_secs(1));
        assert_eq!(
            backend.target(),
            "postgres://monitor_user@localhost:5433/postgres"
        );
    }

    #[tokio::test]
    async fn unreachable_server_never_runs_statements() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let backend = PostgresBackend::new(
            PostgresConfig {
                host: "127.0.0.1".into(),
                port,
                ..Default::default()
            },
            Duration::from_secs(2),
        );

        let report = backend.probe().await;
        assert!(!report.reachable());
        assert!(report.checks().is_empty());

        let workload = backend.generate_workload().await;
        assert!(matches!(workload.error, Some(WorkloadError::Connect(_))));
        assert_eq!(workload.digest_matches, None);
    }

    /// Runs against a live server when `QAN_TEST_PG_PORT` is set, using the
    /// default credentials and `QAN_TEST_PG_HOST` (default 127.0.0.1).
    fn live_backend() -> Option<PostgresBackend> {
        let port = std::env::var("QAN_TEST_PG_PORT").ok()?.parse().ok()?;
        let host = std::env::var("QAN_TEST_PG_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        Some(PostgresBackend::new(
            PostgresConfig {
                host,
                port,
                ..Default::default()
            },
            Duration::from_secs(10),
        ))
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server (QAN_TEST_PG_PORT)"]
    async fn live_probe_reports_statistics_checks() {
        let Some(backend) = live_backend() else {
            return;
        };
        let report = backend.probe().await;
        assert!(report.reachable());
        let names: Vec<&str> = report.checks().iter().map(|check| check.name).collect();
        assert_eq!(names.first().copied(), Some(STATS_EXTENSION));
        if report.checks().first().is_some_and(|check| check.passed) {
            assert_eq!(names, vec![STATS_EXTENSION, STATS_VIEW]);
        }
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server (QAN_TEST_PG_PORT)"]
    async fn live_workload_can_run_twice() {
        let Some(backend) = live_backend() else {
            return;
        };
        let first = backend.generate_workload().await;
        assert!(first.error.is_none(), "first run: {:?}", first.error);
        let second = backend.generate_workload().await;
        assert!(second.error.is_none(), "second run: {:?}", second.error);
        assert_eq!(first.statements_executed, second.statements_executed);
    }
}
