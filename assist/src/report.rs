use std::{collections::BTreeMap, path::PathBuf};

use json::{JsonContainerTrait, JsonValueTrait};
use prettytable::{Attr, Cell, Row, Table};
use rpcbench_core::{
    metrics::{ClientMetrics, MetricSummary, RunReport},
    types::BenchResult,
};

use crate::load_report;

const RESULT_COLUMNS: usize = 13;

/// # Report Command
///
/// The main entry point for the `report` command, responsible for orchestrating the
/// entire report generation process.
pub fn report(path: Option<PathBuf>) -> BenchResult<()> {
    let report = load_report(path, 1)?;
    print_report_pretty(&report);
    Ok(())
}

/// # Print Report Pretty
///
/// A helper function to print a run report in a human-readable format.
fn print_report_pretty(report: &RunReport) {
    if report.interrupted {
        println!("run {} was interrupted, results are partial", report.run_id);
    }
    if let Some(err) = &report.collection_error {
        println!("metrics collection failed: {err}");
    }
    print_configuration_table(&report.configuration);
    print_environment_table(report);
    print_results_table(&report.clients);
    print_connection_table(&report.clients);
    print_system_table(report);
    print_distributions_table(report);
}

/// Flattens the configuration two levels deep: one entry per top level section, holding
/// `key: value` lines of its members.
fn configuration_entries(configuration: &json::Value) -> Vec<(String, String)> {
    let Some(obj) = configuration.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .map(|(key, value)| {
            let mut inner_content = String::new();
            if let Some(inner_obj) = value.as_object() {
                for (inner_key, inner_value) in inner_obj.iter() {
                    if inner_value.is_object() {
                        let pretty = json::to_string_pretty(inner_value).unwrap_or_default();
                        inner_content.push_str(&format!("{inner_key}: {pretty}\n"));
                    } else {
                        inner_content.push_str(&format!("{inner_key}: {inner_value}\n"));
                    }
                }
            } else {
                inner_content.push_str(&format!("{key}: {value}\n"));
            }
            (key.to_owned(), inner_content.trim_end().to_owned())
        })
        .collect()
}

/// # Print Configuration Table
///
/// A helper function to print the run configuration in a pretty table.
fn print_configuration_table(configuration: &json::Value) {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Configuration").with_style(Attr::Bold),
        Cell::new("Values").with_style(Attr::Bold),
    ]));
    for (key, content) in configuration_entries(configuration) {
        table.add_row(Row::new(vec![Cell::new(&key), Cell::new(&content)]));
    }
    table.printstd();
}

fn print_environment_table(report: &RunReport) {
    let env = &report.environment;
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Environment").with_style(Attr::Bold),
        Cell::new("Values").with_style(Attr::Bold),
    ]));
    let rows = [
        ("Run", report.run_id.clone()),
        ("Duration (s)", report.finished_at.saturating_sub(report.started_at).to_string()),
        ("OS", format!("{} {}", env.os, env.os_version)),
        ("Kernel", env.kernel_version.clone()),
        ("Host", env.hostname.clone()),
        ("Arch", env.arch.clone()),
        ("CPU", format!("{} ({} cores)", env.cpu_model, env.cpu_cores)),
        ("Memory (MB)", format!("{:.0}", env.total_memory_mb)),
    ];
    for (key, value) in rows {
        table.add_row(Row::new(vec![Cell::new(key), Cell::new(&value)]));
    }
    table.printstd();
}

/// # Print Results Table
///
/// Per-method summaries of every client, followed by the client-wide rollup.
fn print_results_table(clients: &BTreeMap<String, ClientMetrics>) {
    let mut table = Table::new();
    let header = [
        "Method", "Requests", "Errors", "Err %", "Min", "Avg", "P50", "P90", "P95", "P99", "Max",
        "Stddev", "Req/s",
    ];
    table.add_row(Row::new(
        header
            .iter()
            .map(|h| Cell::new(h).with_style(Attr::Bold))
            .collect(),
    ));

    for (name, client) in clients {
        table.add_row(Row::new(vec![Cell::new(&format!("[{name}]"))
            .with_style(Attr::Bold)
            .with_hspan(RESULT_COLUMNS)]));
        for (method, summary) in &client.methods {
            add_summary_row!(table, &format!("  {method}"), reported(summary));
        }
        add_summary_row!(table, "  All methods", reported(&client.latency));
        let tallies = [
            ("  Error types", &client.error_types),
            ("  Status codes", &client.status_codes),
        ];
        for (label, tally) in tallies {
            if tally.is_empty() {
                continue;
            }
            table.add_row(Row::new(vec![
                Cell::new(label),
                Cell::new(&format_tally(tally)).with_hspan(RESULT_COLUMNS - 1),
            ]));
        }
    }
    table.printstd();
}

fn print_connection_table(clients: &BTreeMap<String, ClientMetrics>) {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Client").with_style(Attr::Bold),
        Cell::new("Connecting (ms)").with_style(Attr::Bold),
        Cell::new("TLS (ms)").with_style(Attr::Bold),
        Cell::new("Waiting (ms)").with_style(Attr::Bold),
    ]));
    for (name, client) in clients {
        let c = &client.connection;
        table.add_row(Row::new(vec![
            Cell::new(name),
            Cell::new(&ms(c.connecting_ms)),
            Cell::new(&ms(c.tls_handshaking_ms)),
            Cell::new(&ms(c.waiting_ms)),
        ]));
    }
    table.printstd();
}

fn print_system_table(report: &RunReport) {
    let avg = &report.system_average;
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new(&format!("System ({} samples)", avg.samples)).with_style(Attr::Bold),
        Cell::new("Average").with_style(Attr::Bold),
    ]));
    let rows = [
        ("CPU %", ms(avg.cpu_percent)),
        ("Memory (MB)", ms(avg.memory_mb)),
        ("Memory %", ms(avg.memory_percent)),
        ("Net sent (B/sample)", format!("{:.0}", avg.network_sent_bytes)),
        ("Net recv (B/sample)", format!("{:.0}", avg.network_received_bytes)),
        ("Disk read (B/sample)", format!("{:.0}", avg.disk_read_bytes)),
        ("Disk write (B/sample)", format!("{:.0}", avg.disk_written_bytes)),
        ("Open connections", ms(avg.open_connections)),
        ("Concurrent tasks", ms(avg.concurrent_tasks)),
    ];
    for (key, value) in rows {
        table.add_row(Row::new(vec![Cell::new(key), Cell::new(&value)]));
    }
    table.printstd();
}

fn print_distributions_table(report: &RunReport) {
    if report.distributions.is_empty() {
        return;
    }
    let mut table = Table::new();
    let header = [
        "Client", "Method", "Count", "Mean", "P50", "P99", "Stddev", "Skew", "Kurt", "IQR",
        "MAD", "Jitter", "Outliers",
    ];
    table.add_row(Row::new(
        header
            .iter()
            .map(|h| Cell::new(h).with_style(Attr::Bold))
            .collect(),
    ));
    for (client, methods) in &report.distributions {
        for (method, d) in methods {
            table.add_row(Row::new(vec![
                Cell::new(client),
                Cell::new(method),
                Cell::new(&d.count.to_string()),
                Cell::new(&ms(d.mean)),
                Cell::new(&ms(d.p50)),
                Cell::new(&ms(d.p99)),
                Cell::new(&ms(d.std_dev)),
                Cell::new(&format!("{:.3}", d.skewness)),
                Cell::new(&format!("{:.3}", d.kurtosis)),
                Cell::new(&ms(d.iqr)),
                Cell::new(&ms(d.mad)),
                Cell::new(&ms(d.jitter)),
                Cell::new(&d.outliers.len().to_string()),
            ]));
        }
    }
    table.printstd();
}

/// Summaries without any request or latency are shown as missing.
fn reported(summary: &MetricSummary) -> Option<&MetricSummary> {
    Some(summary).filter(|s| s.count > 0 || s.max > 0.0 || s.avg > 0.0)
}

fn format_tally(tally: &BTreeMap<String, u64>) -> String {
    tally
        .iter()
        .map(|(key, count)| format!("{key}: {count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn ms(value: f64) -> String {
    format!("{value:.2}")
}

/// # Add Summary Row
///
/// A helper macro to add one method (or rollup) summary to the results table.
macro_rules! add_summary_row {
    ($table:expr, $label:expr, $summary:expr) => {
        let row = if let Some(s) = $summary {
            vec![
                Cell::new($label),
                Cell::new(&s.count.to_string()),
                Cell::new(&s.error_count.to_string()),
                Cell::new(&ms(s.error_rate)),
                Cell::new(&ms(s.min)),
                Cell::new(&ms(s.avg)),
                Cell::new(&ms(s.p50)),
                Cell::new(&ms(s.p90)),
                Cell::new(&ms(s.p95)),
                Cell::new(&ms(s.p99)),
                Cell::new(&ms(s.max)),
                Cell::new(&ms(s.std_dev)),
                Cell::new(&ms(s.throughput)),
            ]
        } else {
            let mut row = vec![Cell::new($label)];
            row.extend((1..RESULT_COLUMNS).map(|_| Cell::new("---")));
            row
        };
        $table.add_row(Row::new(row));
    };
}

use add_summary_row;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn configuration_is_flattened_per_section() {
        let configuration: json::Value = json::from_str(
            r#"{"run": {"id": "r1", "clients": ["geth"]}, "sampler": {"interval": 1}, "name": "x"}"#,
        )
        .unwrap();
        let entries = configuration_entries(&configuration);
        let run = entries.iter().find(|(k, _)| k == "run").unwrap();
        assert!(run.1.contains(r#"id: "r1""#));
        assert!(run.1.contains("clients: "));
        let name = entries.iter().find(|(k, _)| k == "name").unwrap();
        assert_eq!(name.1, r#"name: "x""#);
    }

    #[test]
    fn non_object_configuration_is_empty() {
        assert!(configuration_entries(&json::Value::default()).is_empty());
    }

    #[test]
    fn tallies_are_listed_in_key_order() {
        let tally = BTreeMap::from([("500".to_owned(), 2), ("200".to_owned(), 40)]);
        assert_eq!(format_tally(&tally), "200: 40, 500: 2");
    }

    #[test]
    fn empty_summaries_are_not_reported() {
        assert!(reported(&MetricSummary::default()).is_none());
        let summary = MetricSummary {
            count: 3,
            ..Default::default()
        };
        assert!(reported(&summary).is_some());
    }
}
