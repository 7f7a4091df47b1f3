//! Verdict aggregation and the printed summary.

use crate::orchestrator::RunMode;
use crate::stage::{FailureKind, StageKey, StageResult, StageResults};
use crate::styling::{StyledString, style};

const GENERAL_HINTS: &[&str] = &[
    "Database configuration: Ensure Performance Schema and pg_stat_statements are enabled",
    "Network connectivity: Check that services can communicate with each other",
    "Startup timing: The stack might need more time to fully initialize",
];

/// True iff every recorded result passed. An empty set is vacuously true.
pub fn aggregate(results: &StageResults) -> bool {
    results.iter().all(StageResult::is_passed)
}

/// Remediation for a failed stage, if one is known.
pub fn hint(key: StageKey) -> Option<&'static str> {
    let hint = match key {
        StageKey::MysqlConnection => {
            "MySQL Connection: Ensure MySQL is running and credentials are correct"
        }
        StageKey::PostgresqlConnection => {
            "PostgreSQL Connection: Ensure PostgreSQL is running and credentials are correct"
        }
        StageKey::MysqlPerfSchema => {
            "MySQL Performance Schema: Enable performance_schema and statements_digest in MySQL"
        }
        StageKey::PostgresqlStats => {
            "PostgreSQL Stats: Enable pg_stat_statements extension in PostgreSQL"
        }
        StageKey::DruidConnection => {
            "Druid Connection: Ensure the Druid router is running and its status endpoint responds"
        }
        StageKey::OtelCollection => {
            "OTel Collection: Check that the collector's QAN processors are running and exporting"
        }
        StageKey::DruidIngestion => {
            "Druid Ingestion: Check that the ingestion supervisor for the QAN datasource is running"
        }
        StageKey::JupyterConnection => "JupyterLab: Ensure the JupyterLab service is running",
        StageKey::MysqlTestData | StageKey::PostgresqlTestData => return None,
        StageKey::MysqlProcessorScript | StageKey::PostgresqlProcessorScript => {
            "Processor Scripts: Ensure the test scripts exist and are executable"
        }
    };
    Some(hint)
}

/// Results in `order` first, then anything else in completion order.
fn ordered<'a>(results: &'a StageResults, order: &[StageKey]) -> Vec<&'a StageResult> {
    let mut rows: Vec<&StageResult> = order.iter().filter_map(|key| results.get(*key)).collect();
    rows.extend(results.iter().filter(|result| !order.contains(&result.key())));
    rows
}

fn status_cell(passed: bool) -> StyledString {
    if passed {
        style("✓ PASSED").green()
    } else {
        style("✗ FAILED").red()
    }
}

/// Bordered two-column grid of stage name and status.
pub fn render_table(results: &StageResults, order: &[StageKey], color: bool) -> String {
    let rows: Vec<(String, StyledString)> = ordered(results, order)
        .into_iter()
        .map(|result| (result.key().display_name(), status_cell(result.is_passed())))
        .collect();

    let name_width = rows
        .iter()
        .map(|(name, _)| name.chars().count())
        .chain(std::iter::once("Test".len()))
        .max()
        .unwrap_or_default();
    let status_width = rows
        .iter()
        .map(|(_, status)| status.width())
        .chain(std::iter::once("Status".len()))
        .max()
        .unwrap_or_default();

    let border = |fill: char| {
        format!(
            "+{}+{}+\n",
            fill.to_string().repeat(name_width + 2),
            fill.to_string().repeat(status_width + 2)
        )
    };

    let mut out = border('-');
    out.push_str(&format!(
        "| {:<name_width$} | {:<status_width$} |\n",
        "Test", "Status"
    ));
    out.push_str(&border('='));
    for (name, status) in &rows {
        let pad = " ".repeat(status_width - status.width());
        out.push_str(&format!(
            "| {name:<name_width$} | {}{pad} |\n",
            status.render(color)
        ));
        out.push_str(&border('-'));
    }
    out
}

fn success_message(mode: RunMode) -> &'static [&'static str] {
    match mode {
        RunMode::EndToEnd => &[
            "Congratulations! The end-to-end test has verified the full data flow:",
            "1. Test data was generated in MySQL and PostgreSQL",
            "2. Data was collected by OpenTelemetry QAN processors",
            "3. Data was successfully ingested into Druid",
            "4. All components of the stack are operational",
        ],
        RunMode::Processors => &[
            "Congratulations! The QAN processor test was successful.",
            "Both MySQL and PostgreSQL QAN processors are working correctly and can collect query data.",
        ],
    }
}

fn failure_headline(mode: RunMode) -> &'static str {
    match mode {
        RunMode::EndToEnd => {
            "The end-to-end test failed. Please check the individual test results above."
        }
        RunMode::Processors => {
            "The QAN processor test failed. Please check the individual test results above."
        }
    }
}

/// Full summary: table, verdict line, and either the success note or the
/// failed stages with remediation hints.
pub fn render_summary(mode: RunMode, results: &StageResults, color: bool) -> String {
    let passed = aggregate(results);
    let mut out = format!("=== {} SUMMARY ===\n", mode.title());
    out.push_str(&render_table(results, mode.stage_keys(), color));

    let verdict = if passed {
        style("PASSED").green().bold()
    } else {
        style("FAILED").red().bold()
    };
    out.push_str(&format!("\nOverall Status: {}\n\n", verdict.render(color)));

    if passed {
        let mut lines = success_message(mode).iter();
        if let Some(first) = lines.next() {
            out.push_str(&format!("{}\n", style(first).green().render(color)));
        }
        for line in lines {
            out.push_str(&format!("{line}\n"));
        }
        return out;
    }

    out.push_str(&format!(
        "{}\n",
        style(failure_headline(mode)).red().render(color)
    ));

    let failed = ordered(results, mode.stage_keys())
        .into_iter()
        .filter(|result| !result.is_passed())
        .collect::<Vec<_>>();
    out.push_str("\nFailed stages:\n");
    for result in &failed {
        let category = result.failure().map_or("failed", FailureKind::label);
        let name = result.key().display_name();
        match result.detail() {
            Some(detail) => out.push_str(&format!("- {name} [{category}]: {detail}\n")),
            None => out.push_str(&format!("- {name} [{category}]\n")),
        }
    }

    out.push_str("\nCommon issues and solutions:\n");
    for line in GENERAL_HINTS {
        out.push_str(&format!("- {line}\n"));
    }
    let mut shown: Vec<&str> = Vec::new();
    for result in &failed {
        // Skipped stages inherit the hint of the gate that failed.
        if result.failure() == Some(FailureKind::Skipped) {
            continue;
        }
        if let Some(text) = hint(result.key())
            && !shown.contains(&text)
        {
            shown.push(text);
            out.push_str(&format!("- {text}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn results(entries: Vec<StageResult>) -> StageResults {
        entries.into_iter().collect()
    }

    #[test]
    fn aggregate_is_logical_and() {
        assert!(aggregate(&StageResults::new()));
        assert!(aggregate(&results(vec![
            StageResult::passed(StageKey::MysqlConnection, ""),
            StageResult::passed(StageKey::JupyterConnection, ""),
        ])));
        assert!(!aggregate(&results(vec![
            StageResult::passed(StageKey::MysqlConnection, ""),
            StageResult::skipped(StageKey::MysqlTestData, StageKey::MysqlPerfSchema),
        ])));
    }

    #[test]
    fn table_follows_report_order_not_completion_order() {
        let results = results(vec![
            StageResult::passed(StageKey::PostgresqlConnection, ""),
            StageResult::failed(StageKey::MysqlConnection, FailureKind::Connectivity, "refused"),
        ]);
        let table = render_table(&results, RunMode::EndToEnd.stage_keys(), false);
        assert_eq!(
            table,
            "\
+-----------------------+----------+
| Test                  | Status   |
+=======================+==========+
| Mysql Connection      | ✗ FAILED |
+-----------------------+----------+
| Postgresql Connection | ✓ PASSED |
+-----------------------+----------+
"
        );
    }

    #[test]
    fn passing_summary_congratulates() {
        let results = results(vec![StageResult::passed(StageKey::MysqlConnection, "")]);
        let summary = render_summary(RunMode::Processors, &results, false);
        assert!(summary.starts_with("=== QAN PROCESSOR TEST SUMMARY ===\n"));
        assert!(summary.contains("\nOverall Status: PASSED\n"));
        assert!(summary.contains("The QAN processor test was successful."));
        assert!(!summary.contains("Common issues"));
    }

    #[test]
    fn failing_summary_lists_categories_and_hints() {
        let results = results(vec![
            StageResult::passed(StageKey::MysqlConnection, "version 8.0.36"),
            StageResult::failed(
                StageKey::MysqlPerfSchema,
                FailureKind::CapabilityMissing,
                "statements_digest: consumer is NO",
            ),
            StageResult::skipped(StageKey::MysqlTestData, StageKey::MysqlPerfSchema),
        ]);
        let summary = render_summary(RunMode::Processors, &results, false);

        let tail = summary
            .split_once("Failed stages:\n")
            .map(|(_, tail)| tail)
            .expect("failure section");
        assert_eq!(
            tail,
            "\
- Mysql Perf Schema [capability missing]: statements_digest: consumer is NO
- Mysql Test Data [skipped]: not attempted: mysql_perf_schema did not pass

Common issues and solutions:
- Database configuration: Ensure Performance Schema and pg_stat_statements are enabled
- Network connectivity: Check that services can communicate with each other
- Startup timing: The stack might need more time to fully initialize
- MySQL Performance Schema: Enable performance_schema and statements_digest in MySQL
"
        );
        assert!(summary.contains("\nOverall Status: FAILED\n"));
    }

    #[test]
    fn colored_table_keeps_alignment() {
        let results = results(vec![StageResult::passed(StageKey::DruidIngestion, "")]);
        let plain = render_table(&results, &[], false);
        let colored = render_table(&results, &[], true);
        assert_eq!(plain.lines().count(), colored.lines().count());
        assert!(colored.contains("\u{1b}["));
    }
}
