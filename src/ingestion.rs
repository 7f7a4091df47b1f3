//! Ingestion verification against the analytical store.
//!
//! Three phases, in order: confirm the datasource exists (short-circuit if not
//! or if the catalog call fails), count rows per backend system tag inside
//! the run's time window, then count the subset whose statement sample
//! contains the backend's workload fingerprint. A failed count for one
//! backend never prevents counting the other.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::analytics::{AnalyticsError, AnalyticsStore, Row};
use crate::backend::DbSystem;
use crate::stage::{FailureKind, StageKey, StageResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIME_COLUMN: &str = "\"__time\"";
const SYSTEM_COLUMN: &str = "\"db.system\"";
const SAMPLE_COLUMN: &str = "\"db.statement.sample\"";

/// Half-open `[start, end)` interval scoping ingestion queries to this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// `None` when `span` reaches past the representable time range.
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Option<Self> {
        let span = chrono::Duration::from_std(span).ok()?;
        let start = end.checked_sub_signed(span)?;
        Some(Self { start, end })
    }

    /// Window of width `span` ending now.
    pub fn trailing(span: Duration) -> Option<Self> {
        Self::ending_at(Utc::now(), span)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `start` is included, `end` is excluded.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Druid SQL predicate with the same bounds as [`TimeWindow::contains`].
    pub fn sql_predicate(&self) -> String {
        format!(
            "{TIME_COLUMN} >= TIMESTAMP '{}' AND {TIME_COLUMN} < TIMESTAMP '{}'",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) UTC",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

/// What the catalog lookup found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLookup {
    Found,
    Missing,
    Failed(String),
}

/// Counts observed for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendIngestion {
    pub system: DbSystem,
    /// Rows tagged with the backend's system inside the window.
    pub rows: Result<u64, String>,
    /// Subset of `rows` whose statement sample contains the fingerprint.
    /// `None` when the coarse count failed and the fingerprint query was not sent.
    pub fingerprint_rows: Option<Result<u64, String>>,
}

impl BackendIngestion {
    pub fn rows_found(&self) -> bool {
        matches!(self.rows, Ok(count) if count > 0)
    }

    pub fn fingerprint_count(&self) -> Option<u64> {
        match &self.fingerprint_rows {
            Some(Ok(count)) => Some(*count),
            _ => None,
        }
    }

    fn summary(&self) -> String {
        let rows = match &self.rows {
            Ok(count) => format!("{count} rows"),
            Err(err) => format!("count failed ({err})"),
        };
        match &self.fingerprint_rows {
            Some(Ok(count)) => format!(
                "{}: {rows}, {count} matching '{}'",
                self.system.tag(),
                self.system.fingerprint()
            ),
            Some(Err(err)) => format!(
                "{}: {rows}, fingerprint count failed ({err})",
                self.system.tag()
            ),
            None => format!("{}: {rows}", self.system.tag()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub datasource: String,
    pub window: TimeWindow,
    pub table: TableLookup,
    pub backends: Vec<BackendIngestion>,
}

impl IngestionReport {
    pub fn table_exists(&self) -> bool {
        self.table == TableLookup::Found
    }

    pub fn backend(&self, system: DbSystem) -> Option<&BackendIngestion> {
        self.backends.iter().find(|backend| backend.system == system)
    }

    /// At least one backend's collector is delivering rows.
    pub fn collection_observed(&self) -> bool {
        self.backends.iter().any(BackendIngestion::rows_found)
    }

    /// Table exists and at least one backend has rows in the window.
    pub fn succeeded(&self) -> bool {
        self.table_exists() && self.collection_observed()
    }

    fn counts_summary(&self) -> String {
        let parts: Vec<String> = self.backends.iter().map(BackendIngestion::summary).collect();
        format!("{} in window {}", parts.join("; "), self.window)
    }

    fn table_failure(&self) -> Option<StageResult> {
        match &self.table {
            TableLookup::Found => None,
            TableLookup::Missing => Some(StageResult::failed(
                StageKey::DruidIngestion,
                FailureKind::DataAbsence,
                format!("datasource {} not found", self.datasource),
            )),
            TableLookup::Failed(err) => Some(StageResult::failed(
                StageKey::DruidIngestion,
                FailureKind::ExecutionFailure,
                format!("catalog lookup failed: {err}"),
            )),
        }
    }

    /// `otel_collection` then `druid_ingestion`.
    pub fn stage_results(&self) -> Vec<StageResult> {
        if let Some(table_failure) = self.table_failure() {
            let reason = table_failure.detail().unwrap_or_default().to_owned();
            return vec![
                StageResult::failed(
                    StageKey::OtelCollection,
                    FailureKind::Skipped,
                    format!("not evaluated: {reason}"),
                ),
                table_failure,
            ];
        }

        let summary = self.counts_summary();
        let collection = if self.collection_observed() {
            StageResult::passed(StageKey::OtelCollection, summary.clone())
        } else {
            StageResult::failed(StageKey::OtelCollection, FailureKind::DataAbsence, summary.clone())
        };
        let ingestion = if self.succeeded() {
            StageResult::passed(StageKey::DruidIngestion, summary)
        } else {
            StageResult::failed(StageKey::DruidIngestion, FailureKind::DataAbsence, summary)
        };
        vec![collection, ingestion]
    }
}

pub struct IngestionVerifier<'a> {
    store: &'a dyn AnalyticsStore,
    datasource: &'a str,
}

impl<'a> IngestionVerifier<'a> {
    pub fn new(store: &'a dyn AnalyticsStore, datasource: &'a str) -> Self {
        Self { store, datasource }
    }

    pub async fn verify(&self, window: TimeWindow, systems: &[DbSystem]) -> IngestionReport {
        tracing::info!(datasource = self.datasource, %window, "checking data ingestion");

        let table = self.lookup_table().await;
        let mut report = IngestionReport {
            datasource: self.datasource.to_owned(),
            window,
            table,
            backends: Vec::new(),
        };

        match &report.table {
            TableLookup::Found => {
                tracing::info!(datasource = self.datasource, "datasource found");
            }
            TableLookup::Missing => {
                tracing::error!(datasource = self.datasource, "datasource not found");
                return report;
            }
            TableLookup::Failed(err) => {
                tracing::error!(datasource = self.datasource, error = %err, "failed to list tables");
                return report;
            }
        }

        for system in systems.iter().copied() {
            report.backends.push(self.count_backend(window, system).await);
        }

        if report.succeeded() {
            tracing::info!("found QAN data in the analytical store");
        } else {
            tracing::error!(%window, "no QAN data found in the analytical store");
        }
        report
    }

    async fn lookup_table(&self) -> TableLookup {
        let query = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = 'druid'";
        match self.store.sql(query, "test-tables").await {
            Ok(rows) => {
                let found = rows.iter().any(|row| {
                    row.get("TABLE_NAME").and_then(Value::as_str) == Some(self.datasource)
                });
                if found {
                    TableLookup::Found
                } else {
                    TableLookup::Missing
                }
            }
            Err(err) => TableLookup::Failed(err.to_string()),
        }
    }

    async fn count_backend(&self, window: TimeWindow, system: DbSystem) -> BackendIngestion {
        let rows = self
            .count(
                &count_query(self.datasource, window, system, None),
                &format!("test-{}-count", system.query_tag()),
            )
            .await;

        match &rows {
            Ok(count) => {
                tracing::info!(system = system.tag(), count, "QAN records in window");
            }
            Err(err) => {
                tracing::error!(system = system.tag(), error = %err, "failed to count QAN records");
                return BackendIngestion {
                    system,
                    rows,
                    fingerprint_rows: None,
                };
            }
        }

        let fingerprint_rows = self
            .count(
                &count_query(self.datasource, window, system, Some(system.fingerprint())),
                &format!("test-{}-test-count", system.query_tag()),
            )
            .await;
        match &fingerprint_rows {
            Ok(count) => tracing::info!(
                system = system.tag(),
                fingerprint = system.fingerprint(),
                count,
                "test query records in window"
            ),
            Err(err) => tracing::warn!(
                system = system.tag(),
                error = %err,
                "failed to count test query records"
            ),
        }

        BackendIngestion {
            system,
            rows,
            fingerprint_rows: Some(fingerprint_rows),
        }
    }

    async fn count(&self, query: &str, query_id: &str) -> Result<u64, String> {
        let rows = self
            .store
            .sql(query, query_id)
            .await
            .map_err(|err: AnalyticsError| err.to_string())?;
        parse_count(&rows)
    }
}

/// `COUNT(*)` over the datasource for one system tag, optionally narrowed to
/// statement samples containing `fingerprint`.
pub fn count_query(
    datasource: &str,
    window: TimeWindow,
    system: DbSystem,
    fingerprint: Option<&str>,
) -> String {
    let mut query = format!(
        "SELECT COUNT(*) AS \"count\" FROM \"{datasource}\" WHERE {} AND {SYSTEM_COLUMN} = {}",
        window.sql_predicate(),
        sql_literal(system.tag())
    );
    if let Some(fingerprint) = fingerprint {
        query.push_str(&format!(
            " AND {SAMPLE_COLUMN} LIKE {}",
            sql_literal(&format!("%{fingerprint}%"))
        ));
    }
    query
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn parse_count(rows: &[Row]) -> Result<u64, String> {
    let row = rows
        .first()
        .ok_or_else(|| "count query returned no rows".to_owned())?;
    let value = row
        .get("count")
        .ok_or_else(|| "count column missing from result".to_owned())?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|raw| raw.parse().ok()))
        .ok_or_else(|| format!("count is not a non-negative integer: {value}"))
}
