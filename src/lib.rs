//! # qan-harness
//!
//! Verification harness for a query-analytics (QAN) telemetry pipeline. It
//! proves that statement statistics recorded by MySQL and PostgreSQL are
//! picked up by the collector, land in the Druid datasource, and that the
//! JupyterLab front end is reachable.
//!
//! A run is a fixed sequence of stages:
//!
//! 1. optionally bring the stack up with docker-compose,
//! 2. probe both relational engines (connectivity plus statistics capability),
//! 3. drive a small synthetic workload into every engine that probed healthy,
//! 4. probe Druid and wait for propagation,
//! 5. count this run's records in Druid,
//! 6. probe JupyterLab.
//!
//! Each stage records a [`stage::StageResult`]; the run passes only when every
//! recorded result passed. Stages gated on a failed stage are recorded as
//! skipped, never silently dropped.
//!
//! ```no_run
//! use qan_harness::config::HarnessConfig;
//! use qan_harness::orchestrator::{Harness, RunMode};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut config = HarnessConfig::default();
//! config.stack.use_existing = true;
//! config.validate()?;
//!
//! let mode = RunMode::EndToEnd;
//! let outcome = Harness::from_config(config, mode).run(mode).await?;
//! println!(
//!     "{}",
//!     qan_harness::report::render_summary(outcome.mode, &outcome.results, false)
//! );
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod backend;
pub mod cli;
pub mod config;
pub mod ingestion;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod stage;
pub mod styling;
pub mod workload;

pub use orchestrator::{Harness, RunMode, RunOutcome};
pub use stage::{FailureKind, StageKey, StageResult, StageResults};
