//! Stage keys, per-stage results, and the ordered result set a run produces.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Stable identifier of a recorded stage. The string form is what reports and
/// logs show and must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    MysqlConnection,
    PostgresqlConnection,
    DruidConnection,
    MysqlPerfSchema,
    PostgresqlStats,
    MysqlTestData,
    PostgresqlTestData,
    MysqlProcessorScript,
    PostgresqlProcessorScript,
    OtelCollection,
    DruidIngestion,
    JupyterConnection,
}

impl StageKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MysqlConnection => "mysql_connection",
            Self::PostgresqlConnection => "postgresql_connection",
            Self::DruidConnection => "druid_connection",
            Self::MysqlPerfSchema => "mysql_perf_schema",
            Self::PostgresqlStats => "postgresql_stats",
            Self::MysqlTestData => "mysql_test_data",
            Self::PostgresqlTestData => "postgresql_test_data",
            Self::MysqlProcessorScript => "mysql_processor_script",
            Self::PostgresqlProcessorScript => "postgresql_processor_script",
            Self::OtelCollection => "otel_collection",
            Self::DruidIngestion => "druid_ingestion",
            Self::JupyterConnection => "jupyter_connection",
        }
    }

    /// Title-cased label used in the summary table (`mysql_test_data` -> `Mysql Test Data`).
    pub fn display_name(self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage failed. Drives which remediation hints are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend could not be reached at all.
    Connectivity,
    /// Reachable, but a required instrumentation feature is disabled.
    CapabilityMissing,
    /// Reachable and capable, but the expected records were not observed.
    DataAbsence,
    /// A setup step (DDL, DML, script) failed after connecting.
    ExecutionFailure,
    /// Not attempted because a gating stage failed.
    Skipped,
}

impl FailureKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::CapabilityMissing => "capability missing",
            Self::DataAbsence => "data absent",
            Self::ExecutionFailure => "execution failure",
            Self::Skipped => "skipped",
        }
    }
}

/// Outcome of one stage. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    key: StageKey,
    passed: bool,
    failure: Option<FailureKind>,
    detail: Option<String>,
}

impl StageResult {
    pub fn passed(key: StageKey, detail: impl Into<String>) -> Self {
        Self {
            key,
            passed: true,
            failure: None,
            detail: non_empty(detail.into()),
        }
    }

    pub fn failed(key: StageKey, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            key,
            passed: false,
            failure: Some(kind),
            detail: non_empty(detail.into()),
        }
    }

    /// Records that `key` was not attempted because `gate` did not pass.
    pub fn skipped(key: StageKey, gate: StageKey) -> Self {
        Self::failed(
            key,
            FailureKind::Skipped,
            format!("not attempted: {gate} did not pass"),
        )
    }

    pub fn key(&self) -> StageKey {
        self.key
    }

    pub fn is_passed(&self) -> bool {
        self.passed
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

fn non_empty(detail: String) -> Option<String> {
    if detail.trim().is_empty() {
        None
    } else {
        Some(detail)
    }
}

/// Ordered mapping from stage key to result, in the order stages completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageResults {
    entries: IndexMap<StageKey, StageResult>,
}

impl StageResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result. A key is written once; a second result for the same
    /// key is dropped and `false` is returned.
    pub fn record(&mut self, result: StageResult) -> bool {
        if self.entries.contains_key(&result.key) {
            tracing::warn!(stage = %result.key, "ignoring duplicate stage result");
            return false;
        }
        self.entries.insert(result.key, result);
        true
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = StageResult>) {
        for result in results {
            self.record(result);
        }
    }

    pub fn get(&self, key: StageKey) -> Option<&StageResult> {
        self.entries.get(&key)
    }

    /// Whether `key` was recorded and passed. Absent keys count as not passed.
    pub fn passed(&self, key: StageKey) -> bool {
        self.entries.get(&key).is_some_and(StageResult::is_passed)
    }

    /// First gate in `gates` that has not passed, if any.
    pub fn first_failed_gate(&self, gates: &[StageKey]) -> Option<StageKey> {
        gates.iter().copied().find(|gate| !self.passed(*gate))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = StageKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageResult> {
        self.entries.values().filter(|result| !result.passed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a StageResults {
    type Item = &'a StageResult;
    type IntoIter = indexmap::map::Values<'a, StageKey, StageResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl FromIterator<StageResult> for StageResults {
    fn from_iter<I: IntoIterator<Item = StageResult>>(iter: I) -> Self {
        let mut results = Self::new();
        results.extend(iter);
        results
    }
}
