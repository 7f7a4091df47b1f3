//! Command-line surface.
//!
//! Every override is optional so values from `--config` survive unless a flag
//! is given explicitly. Defaults live in [`crate::config::constants`].

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::HarnessConfig;
use crate::orchestrator::RunMode;

#[derive(Debug, Parser)]
#[command(name = "qan-harness")]
#[command(about = "End-to-end verification of the QAN telemetry pipeline")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file; command-line flags take precedence
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error, off)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Disable colored output (also honored via NO_COLOR)
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Verify the full pipeline: databases, collection, Druid ingestion and JupyterLab (default)
    E2e(E2eArgs),

    /// Verify the MySQL and PostgreSQL QAN processors directly
    ///
    /// Checks connectivity and statement statistics on both engines, generates
    /// test data, then runs the processor test scripts.
    Processors(ProcessorArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct DatabaseArgs {
    /// MySQL host (default: localhost)
    #[arg(long)]
    pub mysql_host: Option<String>,

    /// MySQL port (default: 3307)
    #[arg(long)]
    pub mysql_port: Option<u16>,

    /// MySQL username (default: root)
    #[arg(long)]
    pub mysql_user: Option<String>,

    /// MySQL password (default: password)
    #[arg(long)]
    pub mysql_password: Option<String>,

    /// PostgreSQL host (default: localhost)
    #[arg(long)]
    pub pg_host: Option<String>,

    /// PostgreSQL port (default: 5433)
    #[arg(long)]
    pub pg_port: Option<u16>,

    /// PostgreSQL username (default: monitor_user)
    #[arg(long)]
    pub pg_user: Option<String>,

    /// PostgreSQL password (default: password)
    #[arg(long)]
    pub pg_password: Option<String>,

    /// PostgreSQL database (default: postgres)
    #[arg(long)]
    pub pg_database: Option<String>,
}

impl DatabaseArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        override_with(&mut config.mysql.host, &self.mysql_host);
        override_with(&mut config.mysql.port, &self.mysql_port);
        override_with(&mut config.mysql.user, &self.mysql_user);
        override_with(&mut config.mysql.password, &self.mysql_password);
        override_with(&mut config.postgres.host, &self.pg_host);
        override_with(&mut config.postgres.port, &self.pg_port);
        override_with(&mut config.postgres.user, &self.pg_user);
        override_with(&mut config.postgres.password, &self.pg_password);
        override_with(&mut config.postgres.database, &self.pg_database);
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct E2eArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,

    /// Druid host (default: localhost)
    #[arg(long)]
    pub druid_host: Option<String>,

    /// Druid port (default: 8888)
    #[arg(long)]
    pub druid_port: Option<u16>,

    /// Path to docker-compose.yml (default: ../../docker-compose.yml)
    #[arg(long, value_name = "PATH")]
    pub docker_compose_file: Option<PathBuf>,

    /// Use the running stack instead of starting it with docker-compose
    #[arg(long)]
    pub use_existing: bool,

    /// Skip waiting for data to be collected and ingested
    #[arg(long)]
    pub skip_wait: bool,

    /// Seconds to wait before checking ingestion (default: 60)
    #[arg(long, value_name = "SECS", conflicts_with = "skip_wait")]
    pub wait_secs: Option<u64>,
}

impl E2eArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        self.databases.apply(config);
        override_with(&mut config.druid.host, &self.druid_host);
        override_with(&mut config.druid.port, &self.druid_port);
        override_with(&mut config.stack.compose_file, &self.docker_compose_file);
        override_with(&mut config.timing.wait_secs, &self.wait_secs);
        config.stack.use_existing |= self.use_existing;
        config.timing.skip_wait |= self.skip_wait;
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct ProcessorArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,

    /// Directory containing run_mysql_test.sh and run_postgres_test.sh
    #[arg(long, value_name = "DIR")]
    pub scripts_dir: Option<PathBuf>,

    /// PostgreSQL binary directory passed to the script as PSQL_BIN (default: /usr/bin)
    #[arg(long, value_name = "DIR")]
    pub psql_bin: Option<String>,
}

impl ProcessorArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        self.databases.apply(config);
        override_with(&mut config.scripts.dir, &self.scripts_dir);
        override_with(&mut config.scripts.psql_bin, &self.psql_bin);
    }
}

fn override_with<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(replacement) = value {
        *target = replacement.clone();
    }
}

impl Cli {
    pub fn mode(&self) -> RunMode {
        match self.command {
            Some(Command::Processors(_)) => RunMode::Processors,
            Some(Command::E2e(_)) | None => RunMode::EndToEnd,
        }
    }

    /// Defaults, then the config file, then flags; validated before returning.
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(level) = &self.log_level {
            config.log_level = Some(level.clone());
        }
        match &self.command {
            Some(Command::E2e(args)) => args.apply(&mut config),
            Some(Command::Processors(args)) => args.apply(&mut config),
            None => {}
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_runs_end_to_end_with_defaults() {
        let cli = Cli::try_parse_from(["qan-harness"]).expect("parse");
        assert_eq!(cli.mode(), RunMode::EndToEnd);
        assert_eq!(cli.load_config().expect("config"), HarnessConfig::default());
    }

    #[test]
    fn e2e_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "qan-harness",
            "e2e",
            "--mysql-port",
            "3306",
            "--pg-database",
            "qan",
            "--druid-host",
            "druid.internal",
            "--use-existing",
            "--skip-wait",
        ])
        .expect("parse");
        let config = cli.load_config().expect("config");

        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.postgres.database, "qan");
        assert_eq!(config.druid.base_url(), "http://druid.internal:8888");
        assert!(config.stack.use_existing);
        assert!(config.timing.skip_wait);
    }

    #[test]
    fn skip_wait_conflicts_with_wait_secs() {
        let parsed =
            Cli::try_parse_from(["qan-harness", "e2e", "--skip-wait", "--wait-secs", "5"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn processors_mode_takes_script_options() {
        let cli = Cli::try_parse_from([
            "qan-harness",
            "processors",
            "--scripts-dir",
            "/opt/scripts",
            "--psql-bin",
            "/usr/lib/postgresql/16/bin",
        ])
        .expect("parse");
        assert_eq!(cli.mode(), RunMode::Processors);

        let config = cli.load_config().expect("config");
        assert_eq!(
            config.scripts.postgres_script(),
            PathBuf::from("/opt/scripts/run_postgres_test.sh")
        );
        assert_eq!(config.scripts.psql_bin, "/usr/lib/postgresql/16/bin");
    }

    #[test]
    fn flags_win_over_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "log_level = \"debug\"\n[mysql]\nhost = \"db.internal\"\nport = 3310\n[timing]\nwait_secs = 5"
        )
        .expect("write");

        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "qan-harness",
            "--config",
            path.as_str(),
            "e2e",
            "--mysql-port",
            "3311",
        ])
        .expect("parse");
        let config = cli.load_config().expect("config");

        assert_eq!(config.mysql.host, "db.internal");
        assert_eq!(config.mysql.port, 3311);
        assert_eq!(config.timing.wait_secs, 5);
        assert_eq!(config.log_level(), "debug");
    }

    #[test]
    fn invalid_override_fails_validation() {
        let cli = Cli::try_parse_from(["qan-harness", "--log-level", "loud"]).expect("parse");
        let err = cli.load_config().expect_err("invalid level");
        assert!(format!("{err:#}").contains("log_level"));
    }
}
