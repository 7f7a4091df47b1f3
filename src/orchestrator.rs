//! Staged verification run.
//!
//! A [`Harness`] owns one collaborator per external system and drives them
//! through a fixed, strictly sequential list of phases. Each phase records its
//! [`StageResult`]s before the next one starts, and a stage whose gate did not
//! pass is recorded as skipped instead of being attempted.
//!
//! Stack bootstrap is the only failure that escapes as an error; everything
//! else is folded into the result set.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use qan_harness_exec::{
    CommandExecutor, CommandInvocation, ProcessCommandExecutor, run_collaborator,
};

use crate::analytics::{AnalyticsStore, DruidClient, build_http_client};
use crate::backend::{DatabaseBackend, DbSystem, MySqlBackend, PostgresBackend};
use crate::config::HarnessConfig;
use crate::config::constants::scripts::OUTPUT_TAIL_LINES;
use crate::ingestion::{IngestionReport, IngestionVerifier, TimeWindow};
use crate::probe::{HttpProbe, ServiceProbe};
use crate::report;
use crate::stage::{FailureKind, StageKey, StageResult, StageResults};

pub const STACK_BOOTSTRAP: &str = "stack-bootstrap";
pub const MYSQL_SCRIPT: &str = "mysql-processor-script";
pub const POSTGRES_SCRIPT: &str = "postgres-processor-script";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Full pipeline: relational engines through to the analytical store and
    /// presentation service.
    EndToEnd,
    /// Relational engines and their processor scripts only.
    Processors,
}

impl RunMode {
    /// Stage keys a complete run records, in report order.
    pub const fn stage_keys(self) -> &'static [StageKey] {
        match self {
            Self::EndToEnd => &[
                StageKey::MysqlConnection,
                StageKey::PostgresqlConnection,
                StageKey::DruidConnection,
                StageKey::MysqlTestData,
                StageKey::PostgresqlTestData,
                StageKey::OtelCollection,
                StageKey::DruidIngestion,
                StageKey::JupyterConnection,
            ],
            Self::Processors => &[
                StageKey::MysqlConnection,
                StageKey::PostgresqlConnection,
                StageKey::MysqlPerfSchema,
                StageKey::PostgresqlStats,
                StageKey::MysqlTestData,
                StageKey::PostgresqlTestData,
                StageKey::MysqlProcessorScript,
                StageKey::PostgresqlProcessorScript,
            ],
        }
    }

    pub const fn phases(self) -> &'static [RunPhase] {
        match self {
            Self::EndToEnd => &[
                RunPhase::NotStarted,
                RunPhase::StackReady,
                RunPhase::BackendsProbed,
                RunPhase::WorkloadInjected,
                RunPhase::WaitElapsed,
                RunPhase::IngestionVerified,
                RunPhase::PresentationProbed,
                RunPhase::Done,
            ],
            Self::Processors => &[
                RunPhase::NotStarted,
                RunPhase::StackReady,
                RunPhase::BackendsProbed,
                RunPhase::WorkloadInjected,
                RunPhase::ScriptsExecuted,
                RunPhase::Done,
            ],
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::EndToEnd => "END-TO-END TEST",
            Self::Processors => "QAN PROCESSOR TEST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    NotStarted,
    StackReady,
    BackendsProbed,
    WorkloadInjected,
    WaitElapsed,
    IngestionVerified,
    PresentationProbed,
    ScriptsExecuted,
    Done,
}

/// The run's only suspension point.
#[async_trait]
pub trait Pause: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Sleeps on the tokio timer; a zero duration returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// External systems a run talks to.
pub struct Collaborators {
    pub mysql: Box<dyn DatabaseBackend>,
    pub postgres: Box<dyn DatabaseBackend>,
    pub store: Box<dyn AnalyticsStore>,
    pub http: Box<dyn ServiceProbe>,
    pub executor: Box<dyn CommandExecutor>,
    pub pause: Box<dyn Pause>,
}

impl Collaborators {
    /// Real network clients and process execution, configured from `config`.
    /// The MySQL workload schema depends on `mode`.
    pub fn live(config: &HarnessConfig, mode: RunMode) -> Self {
        let timing = &config.timing;
        let client = build_http_client(timing.http_connect_timeout(), timing.http_timeout());
        let mysql = match mode {
            RunMode::EndToEnd => config.mysql.clone(),
            RunMode::Processors => config.mysql.for_processors(),
        };
        Self {
            mysql: Box::new(MySqlBackend::new(mysql, timing.db_connect_timeout())),
            postgres: Box::new(PostgresBackend::new(
                config.postgres.clone(),
                timing.db_connect_timeout(),
            )),
            store: Box::new(DruidClient::new(config.druid.base_url(), client.clone())),
            http: Box::new(HttpProbe::new(client)),
            executor: Box::new(ProcessCommandExecutor::new()),
            pause: Box::new(TokioPause),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub results: StageResults,
    /// Phases entered, in order.
    pub phases: Vec<RunPhase>,
    pub ingestion: Option<IngestionReport>,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        report::aggregate(&self.results)
    }
}

/// Results and phase trail accumulated while a run is in flight.
struct RunState {
    results: StageResults,
    phases: Vec<RunPhase>,
    ingestion: Option<IngestionReport>,
}

impl RunState {
    fn new() -> Self {
        Self {
            results: StageResults::new(),
            phases: vec![RunPhase::NotStarted],
            ingestion: None,
        }
    }

    fn record(&mut self, result: StageResult) {
        if result.is_passed() {
            tracing::info!(stage = %result.key(), "stage passed");
        } else {
            tracing::warn!(
                stage = %result.key(),
                category = result.failure().map(FailureKind::label).unwrap_or_default(),
                detail = result.detail().unwrap_or_default(),
                "stage failed"
            );
        }
        self.results.record(result);
    }

    fn advance(&mut self, phase: RunPhase) {
        tracing::debug!(?phase, "entering phase");
        self.phases.push(phase);
    }

    fn finish(self, mode: RunMode) -> RunOutcome {
        RunOutcome {
            mode,
            results: self.results,
            phases: self.phases,
            ingestion: self.ingestion,
        }
    }
}

pub struct Harness {
    config: HarnessConfig,
    collaborators: Collaborators,
}

impl Harness {
    pub fn new(config: HarnessConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn from_config(config: HarnessConfig, mode: RunMode) -> Self {
        let collaborators = Collaborators::live(&config, mode);
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn backends(&self) -> [&dyn DatabaseBackend; 2] {
        [
            self.collaborators.mysql.as_ref(),
            self.collaborators.postgres.as_ref(),
        ]
    }

    /// Executes every phase of `mode` in order.
    ///
    /// Returns `Err` only when the stack bootstrap fails; no report should be
    /// produced in that case.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome> {
        tracing::info!(?mode, "starting {}", mode.title().to_lowercase());
        let mut state = RunState::new();

        match mode {
            RunMode::EndToEnd => {
                self.prepare_stack().await?;
                state.advance(RunPhase::StackReady);
                self.run_end_to_end(&mut state).await;
            }
            RunMode::Processors => {
                state.advance(RunPhase::StackReady);
                self.run_processors(&mut state).await;
            }
        }

        state.advance(RunPhase::Done);
        Ok(state.finish(mode))
    }

    async fn prepare_stack(&self) -> Result<()> {
        let stack = &self.config.stack;
        if stack.use_existing {
            tracing::info!("using existing stack (skipping startup)");
            return Ok(());
        }

        let invocation = CommandInvocation::new(STACK_BOOTSTRAP, stack.compose_program.clone())
            .with_args([
                "-f".to_owned(),
                stack.compose_file.display().to_string(),
                "up".to_owned(),
                "-d".to_owned(),
            ])
            .with_timeout(self.config.timing.bootstrap_timeout());
        tracing::info!(command = %invocation.display_command(), "starting stack");

        let outcome =
            run_collaborator(self.collaborators.executor.as_ref(), &invocation, 0).await;
        if !outcome.ok {
            tracing::error!(error = %outcome.output, "failed to start stack");
            bail!("failed to start stack: {}", outcome.output);
        }

        let settle = self.config.timing.settle();
        tracing::info!(?settle, "stack started, waiting for services to initialize");
        self.collaborators.pause.pause(settle).await;
        Ok(())
    }

    async fn run_end_to_end(&self, state: &mut RunState) {
        for backend in self.backends() {
            let report = backend.probe().await;
            state.record(report.to_stage_result(backend.system().connection_key()));
        }
        state.advance(RunPhase::BackendsProbed);

        for backend in self.backends() {
            let gates = [backend.system().connection_key()];
            let result = self.inject_workload(&state.results, backend, &gates).await;
            state.record(result);
        }
        state.advance(RunPhase::WorkloadInjected);

        let status_url = self.collaborators.store.status_url();
        tracing::info!(url = %status_url, "testing analytical store connection");
        let store_probe = self.collaborators.http.probe(&status_url).await;
        state.record(store_probe.to_stage_result(StageKey::DruidConnection));

        let wait = self.config.timing.propagation_wait();
        if wait.is_zero() {
            tracing::info!("skipping wait period");
        } else {
            tracing::info!(?wait, "waiting for data to be collected and ingested");
        }
        self.collaborators.pause.pause(wait).await;
        state.advance(RunPhase::WaitElapsed);

        match state.results.first_failed_gate(&[StageKey::DruidConnection]) {
            Some(gate) => {
                tracing::warn!(%gate, "skipping ingestion verification");
                state.record(StageResult::skipped(StageKey::OtelCollection, gate));
                state.record(StageResult::skipped(StageKey::DruidIngestion, gate));
            }
            None => match TimeWindow::trailing(self.config.timing.window()) {
                Some(window) => {
                    let verifier = IngestionVerifier::new(
                        self.collaborators.store.as_ref(),
                        &self.config.druid.datasource,
                    );
                    let ingestion = verifier.verify(window, &DbSystem::ALL).await;
                    for result in ingestion.stage_results() {
                        state.record(result);
                    }
                    state.ingestion = Some(ingestion);
                }
                None => {
                    let detail = format!(
                        "ingestion window of {}s is out of range",
                        self.config.timing.window_secs
                    );
                    tracing::error!(%detail, "skipping ingestion verification");
                    for key in [StageKey::OtelCollection, StageKey::DruidIngestion] {
                        state.record(StageResult::failed(
                            key,
                            FailureKind::ExecutionFailure,
                            detail.clone(),
                        ));
                    }
                }
            },
        }
        state.advance(RunPhase::IngestionVerified);

        tracing::info!(url = %self.config.jupyter.url, "testing presentation service connection");
        let presentation = self.collaborators.http.probe(&self.config.jupyter.url).await;
        state.record(presentation.to_stage_result(StageKey::JupyterConnection));
        state.advance(RunPhase::PresentationProbed);
    }

    async fn run_processors(&self, state: &mut RunState) {
        for backend in self.backends() {
            let system = backend.system();
            let report = backend.probe().await;
            state.record(report.connection_result(system.connection_key()));
            state.record(report.capability_result(system.capability_key(), system.connection_key()));
        }
        state.advance(RunPhase::BackendsProbed);

        for backend in self.backends() {
            let system = backend.system();
            let gates = [system.connection_key(), system.capability_key()];
            let result = self.inject_workload(&state.results, backend, &gates).await;
            state.record(result);
        }
        state.advance(RunPhase::WorkloadInjected);

        for system in DbSystem::ALL {
            let key = system.script_key();
            let result = match state.results.first_failed_gate(&[system.test_data_key()]) {
                Some(gate) => StageResult::skipped(key, gate),
                None => self.run_script(system).await,
            };
            state.record(result);
        }
        state.advance(RunPhase::ScriptsExecuted);
    }

    async fn inject_workload(
        &self,
        results: &StageResults,
        backend: &dyn DatabaseBackend,
        gates: &[StageKey],
    ) -> StageResult {
        let key = backend.system().test_data_key();
        if let Some(gate) = results.first_failed_gate(gates) {
            tracing::warn!(system = %backend.system(), %gate, "skipping test data generation");
            return StageResult::skipped(key, gate);
        }
        backend.generate_workload().await.to_stage_result()
    }

    fn script_invocation(&self, system: DbSystem) -> CommandInvocation {
        let scripts = &self.config.scripts;
        match system {
            DbSystem::Mysql => {
                let mysql = &self.config.mysql;
                CommandInvocation::new(MYSQL_SCRIPT, scripts.mysql_script().display().to_string())
                    .with_env("MYSQL_HOST", mysql.host.clone())
                    .with_env("MYSQL_PORT", mysql.port.to_string())
                    .with_env("MYSQL_USER", mysql.user.clone())
                    .with_env("MYSQL_PASSWORD", mysql.password.clone())
            }
            DbSystem::Postgresql => {
                let postgres = &self.config.postgres;
                CommandInvocation::new(
                    POSTGRES_SCRIPT,
                    scripts.postgres_script().display().to_string(),
                )
                .with_env("PG_HOST", postgres.host.clone())
                .with_env("PG_PORT", postgres.port.to_string())
                .with_env("PG_USER", postgres.user.clone())
                .with_env("PG_PASS", postgres.password.clone())
                .with_env("PG_DB", postgres.database.clone())
                .with_env("PSQL_BIN", scripts.psql_bin.clone())
            }
        }
    }

    async fn run_script(&self, system: DbSystem) -> StageResult {
        let invocation = self
            .script_invocation(system)
            .with_timeout(self.config.timing.script_timeout());
        tracing::info!(%system, script = %invocation.program, "running QAN processor test script");

        let outcome = run_collaborator(
            self.collaborators.executor.as_ref(),
            &invocation,
            OUTPUT_TAIL_LINES,
        )
        .await;
        let key = system.script_key();
        if outcome.ok {
            tracing::info!(%system, "QAN processor test script completed");
            for line in &outcome.stdout_tail {
                tracing::info!(%system, "  {line}");
            }
            StageResult::passed(key, outcome.stdout_tail.last().cloned().unwrap_or_default())
        } else {
            tracing::error!(%system, error = %outcome.output, "QAN processor test script failed");
            StageResult::failed(key, FailureKind::ExecutionFailure, outcome.output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsError, Row};
    use crate::probe::{CapabilityCheck, ProbeReport};
    use crate::workload::{WorkloadError, WorkloadReport};
    use qan_harness_exec::{CommandOutput, DryRunCommandExecutor};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeBackend {
        system: DbSystem,
        probe: ProbeReport,
        workload: WorkloadReport,
        workload_calls: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn healthy(system: DbSystem) -> Self {
            Self {
                system,
                probe: ProbeReport::connected(system.tag(), Some("test".into()))
                    .with_check(CapabilityCheck::pass("statistics", "enabled")),
                workload: WorkloadReport::succeeded(system, 9),
                workload_calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn unreachable(system: DbSystem) -> Self {
            Self {
                probe: ProbeReport::unreachable(system.tag(), "connection refused"),
                ..Self::healthy(system)
            }
        }

        fn incapable(system: DbSystem) -> Self {
            Self {
                probe: ProbeReport::connected(system.tag(), Some("test".into()))
                    .with_check(CapabilityCheck::fail("statistics", "disabled")),
                ..Self::healthy(system)
            }
        }

        fn failing_workload(system: DbSystem) -> Self {
            Self {
                workload: WorkloadReport::failed(
                    system,
                    2,
                    WorkloadError::Statement {
                        statement: "INSERT".into(),
                        message: "denied".into(),
                    },
                ),
                ..Self::healthy(system)
            }
        }
    }

    #[async_trait]
    impl DatabaseBackend for FakeBackend {
        fn system(&self) -> DbSystem {
            self.system
        }

        async fn probe(&self) -> ProbeReport {
            self.probe.clone()
        }

        async fn generate_workload(&self) -> WorkloadReport {
            self.workload_calls.fetch_add(1, Ordering::SeqCst);
            self.workload.clone()
        }
    }

    /// Table present; answers counts from a fixed map and records query ids.
    #[derive(Default)]
    struct FakeStore {
        counts: Vec<(&'static str, u64)>,
        query_ids: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AnalyticsStore for FakeStore {
        async fn sql(&self, _query: &str, query_id: &str) -> Result<Vec<Row>, AnalyticsError> {
            self.query_ids.lock().expect("lock").push(query_id.to_owned());
            let row = if query_id == "test-tables" {
                json!({"TABLE_NAME": "qan_db"})
            } else {
                let count = self
                    .counts
                    .iter()
                    .find(|(id, _)| *id == query_id)
                    .map_or(0, |(_, count)| *count);
                json!({"count": count})
            };
            Ok(vec![row.as_object().cloned().unwrap_or_default()])
        }

        fn status_url(&self) -> String {
            "http://druid/status".into()
        }
    }

    /// URLs listed in `down` are unreachable; everything else answers 2xx.
    #[derive(Default)]
    struct FakeHttp {
        down: Vec<&'static str>,
    }

    #[async_trait]
    impl ServiceProbe for FakeHttp {
        async fn probe(&self, url: &str) -> ProbeReport {
            if self.down.iter().any(|down| *down == url) {
                ProbeReport::unreachable(url, "connection refused")
            } else {
                ProbeReport::connected(url, None).with_check(CapabilityCheck::pass("http_status", "200"))
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPause(Arc<Mutex<Vec<Duration>>>);

    impl RecordingPause {
        fn durations(&self) -> Vec<Duration> {
            self.0.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl Pause for RecordingPause {
        async fn pause(&self, duration: Duration) {
            self.0.lock().expect("lock").push(duration);
        }
    }

    struct Fixture {
        config: HarnessConfig,
        mysql: FakeBackend,
        postgres: FakeBackend,
        store: FakeStore,
        http: FakeHttp,
        executor: DryRunCommandExecutor,
        pause: RecordingPause,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = HarnessConfig::default();
            config.stack.use_existing = true;
            Self {
                config,
                mysql: FakeBackend::healthy(DbSystem::Mysql),
                postgres: FakeBackend::healthy(DbSystem::Postgresql),
                store: FakeStore {
                    counts: vec![("test-mysql-count", 3), ("test-mysql-test-count", 2)],
                    ..Default::default()
                },
                http: FakeHttp::default(),
                executor: DryRunCommandExecutor::new(),
                pause: RecordingPause::default(),
            }
        }

        fn harness(self) -> Harness {
            Harness::new(
                self.config,
                Collaborators {
                    mysql: Box::new(self.mysql),
                    postgres: Box::new(self.postgres),
                    store: Box::new(self.store),
                    http: Box::new(self.http),
                    executor: Box::new(self.executor),
                    pause: Box::new(self.pause),
                },
            )
        }
    }

    fn failed_keys(outcome: &RunOutcome) -> Vec<StageKey> {
        outcome.results.failed().map(StageResult::key).collect()
    }

    #[tokio::test]
    async fn healthy_end_to_end_run_passes_every_stage() {
        let fixture = Fixture::new();
        let pause = fixture.pause.clone();
        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert!(outcome.passed(), "failed: {:?}", failed_keys(&outcome));
        assert_eq!(outcome.results.len(), RunMode::EndToEnd.stage_keys().len());
        assert_eq!(outcome.phases, RunMode::EndToEnd.phases());
        assert_eq!(pause.durations(), vec![Duration::from_secs(60)]);

        let ingestion = outcome.ingestion.expect("ingestion report");
        let mysql = ingestion.backend(DbSystem::Mysql).expect("mysql counts");
        assert_eq!(mysql.fingerprint_count(), Some(2));
    }

    #[tokio::test]
    async fn postgres_probe_failure_skips_its_workload() {
        let mut fixture = Fixture::new();
        fixture.postgres = FakeBackend::unreachable(DbSystem::Postgresql);
        let pg_calls = fixture.postgres.workload_calls.clone();
        let mysql_calls = fixture.mysql.workload_calls.clone();

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert_eq!(pg_calls.load(Ordering::SeqCst), 0);
        assert_eq!(mysql_calls.load(Ordering::SeqCst), 1);
        let pg_data = outcome
            .results
            .get(StageKey::PostgresqlTestData)
            .expect("recorded");
        assert_eq!(pg_data.failure(), Some(FailureKind::Skipped));
        assert_eq!(
            failed_keys(&outcome),
            vec![StageKey::PostgresqlConnection, StageKey::PostgresqlTestData]
        );
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn missing_statistics_extension_skips_postgres_workload() {
        let mut fixture = Fixture::new();
        fixture.postgres = FakeBackend::incapable(DbSystem::Postgresql);
        let pg_calls = fixture.postgres.workload_calls.clone();

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert_eq!(pg_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            outcome
                .results
                .get(StageKey::PostgresqlConnection)
                .and_then(StageResult::failure),
            Some(FailureKind::CapabilityMissing)
        );
        assert_eq!(
            outcome
                .results
                .get(StageKey::PostgresqlTestData)
                .and_then(StageResult::failure),
            Some(FailureKind::Skipped)
        );
        assert!(outcome.results.passed(StageKey::MysqlTestData));
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn out_of_range_window_fails_ingestion_without_querying() {
        let mut fixture = Fixture::new();
        fixture.config.timing.window_secs = u64::MAX;
        let query_ids = fixture.store.query_ids.clone();

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert!(query_ids.lock().expect("lock").is_empty());
        for key in [StageKey::OtelCollection, StageKey::DruidIngestion] {
            let result = outcome.results.get(key).expect("recorded");
            assert_eq!(result.failure(), Some(FailureKind::ExecutionFailure));
        }
        assert!(outcome.results.passed(StageKey::JupyterConnection));
        assert_eq!(outcome.phases, RunMode::EndToEnd.phases());
    }

    #[tokio::test]
    async fn store_outage_skips_ingestion_without_querying() {
        let mut fixture = Fixture::new();
        fixture.http.down = vec!["http://druid/status"];
        let query_ids = fixture.store.query_ids.clone();

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert!(query_ids.lock().expect("lock").is_empty());
        assert!(outcome.ingestion.is_none());
        for key in [StageKey::OtelCollection, StageKey::DruidIngestion] {
            let result = outcome.results.get(key).expect("recorded");
            assert_eq!(result.failure(), Some(FailureKind::Skipped));
        }
        assert!(outcome.results.passed(StageKey::JupyterConnection));
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn single_failing_stage_fails_the_run() {
        let mut fixture = Fixture::new();
        fixture.http.down = vec!["http://localhost:8888"];

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert_eq!(outcome.results.iter().filter(|r| r.is_passed()).count(), 7);
        assert_eq!(failed_keys(&outcome), vec![StageKey::JupyterConnection]);
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn skip_wait_pauses_for_zero_and_still_verifies() {
        let mut fixture = Fixture::new();
        fixture.config.timing.skip_wait = true;
        let pause = fixture.pause.clone();
        let query_ids = fixture.store.query_ids.clone();

        let outcome = fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        assert_eq!(pause.durations(), vec![Duration::ZERO]);
        assert!(outcome.phases.contains(&RunPhase::WaitElapsed));
        assert_eq!(
            query_ids.lock().expect("lock").first().map(String::as_str),
            Some("test-tables")
        );
        assert!(outcome.results.passed(StageKey::DruidIngestion));
    }

    #[tokio::test]
    async fn bootstrap_runs_compose_then_settles() {
        let mut fixture = Fixture::new();
        fixture.config.stack.use_existing = false;
        let executor = fixture.executor.clone();
        let pause = fixture.pause.clone();

        fixture.harness().run(RunMode::EndToEnd).await.expect("run");

        let invocations = executor.logged_invocations();
        let bootstrap = invocations.first().expect("bootstrap invoked");
        assert_eq!(bootstrap.name, STACK_BOOTSTRAP);
        assert_eq!(bootstrap.program, "docker-compose");
        assert_eq!(
            bootstrap.args,
            vec!["-f", "../../docker-compose.yml", "up", "-d"]
        );
        assert_eq!(bootstrap.timeout, Some(Duration::from_secs(600)));
        assert_eq!(
            pause.durations(),
            vec![Duration::from_secs(30), Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn bootstrap_failure_is_fatal() {
        let mut fixture = Fixture::new();
        fixture.config.stack.use_existing = false;
        fixture.executor = DryRunCommandExecutor::new()
            .respond_with(STACK_BOOTSTRAP, CommandOutput::failure(1, "no such file"));
        let mysql_calls = fixture.mysql.workload_calls.clone();

        let err = fixture
            .harness()
            .run(RunMode::EndToEnd)
            .await
            .expect_err("bootstrap should fail");

        assert!(err.to_string().contains("no such file"));
        assert_eq!(mysql_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn processors_run_scripts_with_connection_env() {
        let fixture = Fixture::new();
        let executor = fixture.executor.clone();

        let outcome = fixture.harness().run(RunMode::Processors).await.expect("run");

        assert!(outcome.passed(), "failed: {:?}", failed_keys(&outcome));
        assert_eq!(outcome.phases, RunMode::Processors.phases());
        assert_eq!(executor.invocation_names(), vec![MYSQL_SCRIPT, POSTGRES_SCRIPT]);

        let invocations = executor.logged_invocations();
        let pg = invocations.get(1).expect("postgres script");
        assert_eq!(pg.env_value("PG_PORT"), Some("5433"));
        assert_eq!(pg.env_value("PG_PASS"), Some("password"));
        assert_eq!(pg.env_value("PSQL_BIN"), Some("/usr/bin"));
        assert!(pg.program.ends_with("run_postgres_test.sh"));
        assert!(
            invocations
                .iter()
                .all(|invocation| invocation.timeout == Some(Duration::from_secs(300)))
        );
    }

    #[tokio::test]
    async fn processors_gate_workload_on_capability() {
        let mut fixture = Fixture::new();
        fixture.mysql = FakeBackend::incapable(DbSystem::Mysql);
        let mysql_calls = fixture.mysql.workload_calls.clone();
        let executor = fixture.executor.clone();

        let outcome = fixture.harness().run(RunMode::Processors).await.expect("run");

        assert_eq!(mysql_calls.load(Ordering::SeqCst), 0);
        assert!(outcome.results.passed(StageKey::MysqlConnection));
        assert_eq!(
            outcome
                .results
                .get(StageKey::MysqlPerfSchema)
                .and_then(StageResult::failure),
            Some(FailureKind::CapabilityMissing)
        );
        assert_eq!(
            outcome
                .results
                .get(StageKey::MysqlProcessorScript)
                .and_then(StageResult::failure),
            Some(FailureKind::Skipped)
        );
        assert_eq!(executor.invocation_names(), vec![POSTGRES_SCRIPT]);
    }

    #[tokio::test]
    async fn failed_workload_blocks_its_script() {
        let mut fixture = Fixture::new();
        fixture.postgres = FakeBackend::failing_workload(DbSystem::Postgresql);
        let executor = fixture.executor.clone();

        let outcome = fixture.harness().run(RunMode::Processors).await.expect("run");

        assert_eq!(
            failed_keys(&outcome),
            vec![StageKey::PostgresqlTestData, StageKey::PostgresqlProcessorScript]
        );
        assert_eq!(executor.invocation_names(), vec![MYSQL_SCRIPT]);
    }

    #[tokio::test]
    async fn failing_script_is_an_execution_failure() {
        let mut fixture = Fixture::new();
        fixture.executor = DryRunCommandExecutor::new()
            .respond_with(MYSQL_SCRIPT, CommandOutput::failure(2, "digest missing"));

        let outcome = fixture.harness().run(RunMode::Processors).await.expect("run");

        let script = outcome
            .results
            .get(StageKey::MysqlProcessorScript)
            .expect("recorded");
        assert_eq!(script.failure(), Some(FailureKind::ExecutionFailure));
        assert_eq!(
            script.detail(),
            Some("mysql-processor-script exited with status 2: digest missing")
        );
    }
}
