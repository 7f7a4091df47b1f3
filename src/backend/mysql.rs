use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor, Row};
use std::time::Duration;

use super::{DatabaseBackend, DbSystem, connect_within};
use crate::config::MySqlConfig;
use crate::probe::{CapabilityCheck, ProbeReport};
use crate::workload::{WorkloadError, WorkloadPlan, WorkloadReport};

const PERFORMANCE_SCHEMA: &str = "performance_schema";
const STATEMENTS_DIGEST: &str = "statements_digest";

pub struct MySqlBackend {
    config: MySqlConfig,
    connect_timeout: Duration,
}

impl MySqlBackend {
    pub fn new(config: MySqlConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
        }
    }

    fn target(&self) -> String {
        format!(
            "mysql://{}@{}:{}",
            self.config.user, self.config.host, self.config.port
        )
    }

    fn options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
    }

    async fn connect(&self) -> Result<MySqlConnection, String> {
        connect_within(
            self.connect_timeout,
            MySqlConnection::connect_with(&self.options()),
        )
        .await
    }

    async fn run_plan(&self, conn: &mut MySqlConnection) -> WorkloadReport {
        let plan = WorkloadPlan::for_system(DbSystem::Mysql);
        let create_database = format!("CREATE DATABASE IF NOT EXISTS {}", self.config.database);
        let use_database = format!("USE {}", self.config.database);
        let setup = [
            create_database.as_str(),
            use_database.as_str(),
            plan.create_table,
            plan.upsert_rows,
        ];

        let mut executed = 0;
        for statement in setup {
            if let Err(err) = Executor::execute(&mut *conn, statement).await {
                return WorkloadReport::failed(
                    DbSystem::Mysql,
                    executed,
                    statement_error(statement, &err),
                );
            }
            executed += 1;
        }

        for statement in plan.read_sequence() {
            // Results are drained so the statement completes server-side.
            if let Err(err) = Executor::fetch_all(&mut *conn, statement).await {
                return WorkloadReport::failed(
                    DbSystem::Mysql,
                    executed,
                    statement_error(statement, &err),
                );
            }
            executed += 1;
        }

        WorkloadReport::succeeded(DbSystem::Mysql, executed)
    }
}

fn statement_error(statement: &str, err: &sqlx::Error) -> WorkloadError {
    WorkloadError::Statement {
        statement: statement.to_owned(),
        message: err.to_string(),
    }
}

async fn performance_schema_check(conn: &mut MySqlConnection) -> CapabilityCheck {
    let row =
        Executor::fetch_optional(&mut *conn, "SHOW VARIABLES LIKE 'performance_schema'").await;
    match row {
        Ok(Some(row)) => match row.try_get::<String, _>("Value") {
            Ok(value) if value.eq_ignore_ascii_case("ON") => {
                CapabilityCheck::pass(PERFORMANCE_SCHEMA, "enabled")
            }
            Ok(value) => CapabilityCheck::fail(
                PERFORMANCE_SCHEMA,
                format!("performance_schema is {value}, expected ON"),
            ),
            Err(err) => CapabilityCheck::fail(PERFORMANCE_SCHEMA, err.to_string()),
        },
        Ok(None) => CapabilityCheck::fail(PERFORMANCE_SCHEMA, "variable not reported by server"),
        Err(err) => CapabilityCheck::fail(PERFORMANCE_SCHEMA, err.to_string()),
    }
}

async fn digest_consumer_check(conn: &mut MySqlConnection) -> CapabilityCheck {
    let enabled = sqlx::query_scalar::<_, String>(
        "SELECT CAST(enabled AS CHAR) FROM performance_schema.setup_consumers WHERE name = 'statements_digest'",
    )
    .fetch_optional(&mut *conn)
    .await;
    match enabled {
        Ok(Some(value)) if value.eq_ignore_ascii_case("YES") => {
            CapabilityCheck::pass(STATEMENTS_DIGEST, "consumer enabled")
        }
        Ok(Some(value)) => CapabilityCheck::fail(
            STATEMENTS_DIGEST,
            format!("consumer is {value}, expected YES"),
        ),
        Ok(None) => CapabilityCheck::fail(STATEMENTS_DIGEST, "consumer not found"),
        Err(err) => CapabilityCheck::fail(STATEMENTS_DIGEST, err.to_string()),
    }
}

async fn close(conn: MySqlConnection) {
    if let Err(err) = conn.close().await {
        tracing::debug!(error = %err, "error while closing MySQL connection");
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    fn system(&self) -> DbSystem {
        DbSystem::Mysql
    }

    async fn probe(&self) -> ProbeReport {
        let target = self.target();
        tracing::info!(%target, "testing MySQL connection");

        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(%target, error = %err, "failed to connect to MySQL");
                return ProbeReport::unreachable(target, err);
            }
        };

        let report = match sqlx::query_scalar::<_, String>("SELECT VERSION()")
            .fetch_one(&mut conn)
            .await
        {
            Ok(version) => {
                tracing::info!(%version, "connected to MySQL");
                ProbeReport::connected(target, Some(version))
                    .with_check(performance_schema_check(&mut conn).await)
                    .with_check(digest_consumer_check(&mut conn).await)
            }
            Err(err) => ProbeReport::unreachable(target, format!("version query failed: {err}")),
        };
        close(conn).await;

        for check in report.checks() {
            if check.passed {
                tracing::info!(check = check.name, "MySQL prerequisite satisfied");
            } else {
                tracing::error!(check = check.name, detail = %check.detail, "MySQL prerequisite missing");
            }
        }
        report
    }

    async fn generate_workload(&self) -> WorkloadReport {
        tracing::info!("generating test data in MySQL");

        let mut conn = match self.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(error = %err, "failed to generate MySQL test data");
                return WorkloadReport::failed(DbSystem::Mysql, 0, WorkloadError::Connect(err));
            }
        };
        let report = self.run_plan(&mut conn).await;
        close(conn).await;

        match &report.error {
            None => tracing::info!(
                statements = report.statements_executed,
                "generated test data in MySQL"
            ),
            Some(err) => tracing::error!(error = %err, "failed to generate MySQL test data"),
        }
        report
    }
}
