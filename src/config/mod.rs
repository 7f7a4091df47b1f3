//! Immutable run configuration.
//!
//! A [`HarnessConfig`] is assembled once, from built-in defaults, an optional
//! TOML file, and command-line overrides (in that order of precedence), then
//! validated and shared read-only with every stage of the run.

pub mod constants;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection parameters for the MySQL-compatible engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MySqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database the end-to-end workload is written into.
    pub database: String,
    /// Database the processors-mode workload is written into.
    pub processors_database: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        use constants::mysql::*;
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            database: WORKLOAD_DATABASE.to_owned(),
            processors_database: PROCESSORS_DATABASE.to_owned(),
        }
    }
}

impl MySqlConfig {
    /// Copy whose workload database is the processors-mode schema.
    pub fn for_processors(&self) -> Self {
        Self {
            database: self.processors_database.clone(),
            ..self.clone()
        }
    }
}

/// Connection parameters for the PostgreSQL-compatible engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        use constants::postgres::*;
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            database: DEFAULT_DATABASE.to_owned(),
        }
    }
}

/// Analytical store (Druid router) endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DruidConfig {
    pub host: String,
    pub port: u16,
    /// Datasource the QAN pipeline ingests into.
    pub datasource: String,
}

impl Default for DruidConfig {
    fn default() -> Self {
        use constants::druid::*;
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            datasource: DEFAULT_DATASOURCE.to_owned(),
        }
    }
}

impl DruidConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct JupyterConfig {
    pub url: String,
}

impl Default for JupyterConfig {
    fn default() -> Self {
        Self {
            url: constants::jupyter::DEFAULT_URL.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StackConfig {
    /// Reuse services that are already running instead of starting them.
    pub use_existing: bool,
    pub compose_file: PathBuf,
    pub compose_program: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            use_existing: false,
            compose_file: PathBuf::from(constants::stack::DEFAULT_COMPOSE_FILE),
            compose_program: constants::stack::DEFAULT_COMPOSE_PROGRAM.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Directory holding `run_mysql_test.sh` and `run_postgres_test.sh`.
    pub dir: PathBuf,
    /// Exported to the PostgreSQL script as `PSQL_BIN`.
    pub psql_bin: String,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(constants::scripts::DEFAULT_DIR),
            psql_bin: constants::scripts::DEFAULT_PSQL_BIN.to_owned(),
        }
    }
}

impl ScriptsConfig {
    pub fn mysql_script(&self) -> PathBuf {
        self.dir.join(constants::scripts::MYSQL_SCRIPT)
    }

    pub fn postgres_script(&self) -> PathBuf {
        self.dir.join(constants::scripts::POSTGRES_SCRIPT)
    }
}

/// Durations are stored in whole seconds so the TOML surface stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Skip the propagation wait entirely.
    pub skip_wait: bool,
    pub wait_secs: u64,
    pub settle_secs: u64,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub db_connect_timeout_secs: u64,
    /// Width of the trailing ingestion window.
    pub window_secs: u64,
    pub bootstrap_timeout_secs: u64,
    pub script_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        use constants::timing::*;
        Self {
            skip_wait: false,
            wait_secs: DEFAULT_WAIT_SECS,
            settle_secs: DEFAULT_SETTLE_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_connect_timeout_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS,
            db_connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            window_secs: DEFAULT_WINDOW_SECS,
            bootstrap_timeout_secs: DEFAULT_BOOTSTRAP_TIMEOUT_SECS,
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
        }
    }
}

impl TimingConfig {
    /// Effective propagation wait; zero when the wait is skipped.
    pub fn propagation_wait(&self) -> Duration {
        if self.skip_wait {
            Duration::ZERO
        } else {
            Duration::from_secs(self.wait_secs)
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http_connect_timeout_secs)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub mysql: MySqlConfig,
    pub postgres: PostgresConfig,
    pub druid: DruidConfig,
    pub jupyter: JupyterConfig,
    pub stack: StackConfig,
    pub scripts: ScriptsConfig,
    pub timing: TimingConfig,
    /// Tracing level used when `RUST_LOG` is not set.
    pub log_level: Option<String>,
}

impl HarnessConfig {
    /// Reads a TOML file; sections and keys that are absent keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse harness config")
    }

    pub fn log_level(&self) -> &str {
        self.log_level
            .as_deref()
            .unwrap_or(constants::DEFAULT_LOG_LEVEL)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.mysql.host.trim().is_empty(), "mysql.host must not be empty");
        ensure!(self.mysql.port > 0, "mysql.port must be non-zero");
        ensure!(!self.mysql.user.is_empty(), "mysql.user must not be empty");
        ensure!(
            is_identifier(&self.mysql.database),
            "mysql.database must be a plain identifier (letters, digits, underscore), got `{}`",
            self.mysql.database
        );
        ensure!(
            is_identifier(&self.mysql.processors_database),
            "mysql.processors_database must be a plain identifier (letters, digits, underscore), got `{}`",
            self.mysql.processors_database
        );

        ensure!(
            !self.postgres.host.trim().is_empty(),
            "postgres.host must not be empty"
        );
        ensure!(self.postgres.port > 0, "postgres.port must be non-zero");
        ensure!(!self.postgres.user.is_empty(), "postgres.user must not be empty");
        ensure!(
            !self.postgres.database.is_empty(),
            "postgres.database must not be empty"
        );

        ensure!(!self.druid.host.trim().is_empty(), "druid.host must not be empty");
        ensure!(self.druid.port > 0, "druid.port must be non-zero");
        ensure!(
            is_identifier(&self.druid.datasource),
            "druid.datasource must be a plain identifier, got `{}`",
            self.druid.datasource
        );

        ensure!(
            self.jupyter.url.starts_with("http://") || self.jupyter.url.starts_with("https://"),
            "jupyter.url must be an http(s) URL, got `{}`",
            self.jupyter.url
        );

        ensure!(
            !self.stack.compose_program.trim().is_empty(),
            "stack.compose_program must not be empty"
        );

        ensure!(
            self.timing.http_timeout_secs > 0,
            "timing.http_timeout_secs must be at least 1"
        );
        ensure!(
            self.timing.http_connect_timeout_secs > 0,
            "timing.http_connect_timeout_secs must be at least 1"
        );
        ensure!(
            self.timing.db_connect_timeout_secs > 0,
            "timing.db_connect_timeout_secs must be at least 1"
        );
        ensure!(
            self.timing.bootstrap_timeout_secs > 0,
            "timing.bootstrap_timeout_secs must be at least 1"
        );
        ensure!(
            self.timing.script_timeout_secs > 0,
            "timing.script_timeout_secs must be at least 1"
        );
        ensure!(
            (1..=constants::timing::MAX_WINDOW_SECS).contains(&self.timing.window_secs),
            "timing.window_secs must be between 1 and {}, got {}",
            constants::timing::MAX_WINDOW_SECS,
            self.timing.window_secs
        );

        if let Some(level) = &self.log_level {
            ensure!(
                matches!(
                    level.as_str(),
                    "trace" | "debug" | "info" | "warn" | "error" | "off"
                ),
                "log_level must be one of trace, debug, info, warn, error, off"
            );
        }

        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
