pub mod mysql {
    pub const DEFAULT_HOST: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 3307;
    pub const DEFAULT_USER: &str = "root";
    pub const DEFAULT_PASSWORD: &str = "password";
    /// Schema the end-to-end workload creates and writes to.
    pub const WORKLOAD_DATABASE: &str = "test_e2e";
    /// Schema the processors-mode workload creates and writes to.
    pub const PROCESSORS_DATABASE: &str = "test_qan";
}

pub mod postgres {
    pub const DEFAULT_HOST: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 5433;
    pub const DEFAULT_USER: &str = "monitor_user";
    pub const DEFAULT_PASSWORD: &str = "password";
    pub const DEFAULT_DATABASE: &str = "postgres";
}

pub mod druid {
    pub const DEFAULT_HOST: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 8888;
    pub const DEFAULT_DATASOURCE: &str = "qan_db";
    pub const STATUS_PATH: &str = "/status";
    pub const SQL_PATH: &str = "/druid/v2/sql";
}

pub mod jupyter {
    pub const DEFAULT_URL: &str = "http://localhost:8888";
}

pub mod stack {
    pub const DEFAULT_COMPOSE_FILE: &str = "../../docker-compose.yml";
    pub const DEFAULT_COMPOSE_PROGRAM: &str = "docker-compose";
}

pub mod scripts {
    pub const DEFAULT_DIR: &str = "otel-collector/extension/qanprocessor/test/scripts";
    pub const MYSQL_SCRIPT: &str = "run_mysql_test.sh";
    pub const POSTGRES_SCRIPT: &str = "run_postgres_test.sh";
    pub const DEFAULT_PSQL_BIN: &str = "/usr/bin";
    /// Lines of script stdout echoed into the log after a successful run.
    pub const OUTPUT_TAIL_LINES: usize = 10;
}

pub mod timing {
    /// Propagation delay between workload injection and ingestion checks.
    pub const DEFAULT_WAIT_SECS: u64 = 60;
    /// Pause after bringing the stack up, before the first probe.
    pub const DEFAULT_SETTLE_SECS: u64 = 30;
    pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_WINDOW_SECS: u64 = 60 * 60;
    pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;
    /// Deadline for `docker-compose up`; the child is killed once it passes.
    pub const DEFAULT_BOOTSTRAP_TIMEOUT_SECS: u64 = 600;
    pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 300;
}

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const LOG_TARGETS: &[&str] = &["qan_harness", "qan_harness_exec"];
