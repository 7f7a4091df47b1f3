//! qan-harness binary: parse flags, run the selected mode, print the summary,
//! and exit 0 only when every stage passed.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::process::ExitCode;

use qan_harness::cli::Cli;
use qan_harness::config::HarnessConfig;
use qan_harness::config::constants::LOG_TARGETS;
use qan_harness::orchestrator::Harness;
use qan_harness::{report, styling};

fn main() -> ExitCode {
    let args = Cli::parse();

    if args.no_color || std::env::var_os("NO_COLOR").is_some() || !std::io::stdout().is_terminal()
    {
        styling::disable_colors();
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "run aborted");
            eprintln!("{}", styling::style(format!("Error: {err:#}")).red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli) -> Result<bool> {
    let config = args.load_config()?;
    initialize_tracing(&config);

    // Stages run strictly in sequence; a single-threaded runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let mode = args.mode();
    let harness = Harness::from_config(config, mode);
    let outcome = runtime.block_on(harness.run(mode))?;

    println!(
        "\n{}",
        report::render_summary(mode, &outcome.results, styling::colors_enabled())
    );
    Ok(outcome.passed())
}

/// `RUST_LOG` takes precedence; otherwise the configured level applies to the
/// harness targets only.
fn initialize_tracing(config: &HarnessConfig) {
    let level = config.log_level();
    let filter = LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let result = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(styling::colors_enabled() && std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = result {
        eprintln!("failed to initialize logging: {err}");
    }
}
