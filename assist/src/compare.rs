use rpcbench_core::{
    metrics::{ClientMetrics, RunReport},
    types::BenchResult,
};
use std::path::PathBuf;

use prettytable::{
    color::{GREEN, RED},
    Attr, Cell, Row, Table,
};

use crate::load_report;

/// One metric of one client in both runs.
#[derive(Debug, PartialEq)]
struct Comparison {
    label: String,
    this: f64,
    that: f64,
    lower_is_better: bool,
}

impl Comparison {
    /// Relative change of `this` against the `that` baseline, in percent. Moving away
    /// from a zero baseline is an unbounded change.
    fn change(&self) -> f64 {
        if self.that == 0.0 {
            return match self.this.partial_cmp(&0.0) {
                Some(std::cmp::Ordering::Greater) => f64::INFINITY,
                Some(std::cmp::Ordering::Less) => f64::NEG_INFINITY,
                _ => 0.0,
            };
        }
        (self.this - self.that) / self.that * 100.0
    }

    fn better(&self) -> bool {
        if self.lower_is_better {
            self.this <= self.that
        } else {
            self.this >= self.that
        }
    }

    fn regressed(&self, sensitivity: f64) -> bool {
        !self.better() && self.change().abs() > sensitivity
    }
}

pub fn compare(
    this: Option<PathBuf>,
    that: Option<PathBuf>,
    sensitivity: u8,
    silent: bool,
) -> BenchResult<()> {
    // without explicit paths the newest run is compared against the one before it
    let that_nth = if this.is_none() { 2 } else { 1 };
    let this = load_report(this, 1)?;
    let that = load_report(that, that_nth)?;
    let sensitivity = sensitivity as f64;

    let comparisons = comparisons(&this, &that);
    let regressions = comparisons
        .iter()
        .filter(|c| c.regressed(sensitivity))
        .count();
    if regressions == 0 && silent {
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Metric").with_style(Attr::Bold),
        Cell::new(&this.run_id).with_style(Attr::Bold),
        Cell::new(&that.run_id).with_style(Attr::Bold),
        Cell::new("Change").with_style(Attr::Bold),
    ]));
    for comparison in &comparisons {
        let mut cell = Cell::new(&format!("{:>+03.1}%", comparison.change()));
        if comparison.better() {
            cell.style(Attr::ForegroundColor(GREEN));
        } else {
            cell.style(Attr::ForegroundColor(RED));
            if comparison.regressed(sensitivity) {
                cell.style(Attr::Bold);
            }
        }
        table.add_row(Row::new(vec![
            Cell::new(&comparison.label),
            Cell::new(&format!("{:.2}", comparison.this)),
            Cell::new(&format!("{:.2}", comparison.that)),
            cell,
        ]));
    }
    table.printstd();

    if regressions > 0 {
        return Err(format!("{regressions} metrics regressed by more than {sensitivity}%").into());
    }
    Ok(())
}

/// Metrics of every client present in both runs.
fn comparisons(this: &RunReport, that: &RunReport) -> Vec<Comparison> {
    this.clients
        .iter()
        .filter_map(|(name, client)| Some((name, client, that.clients.get(name)?)))
        .flat_map(|(name, this, that)| client_comparisons(name, this, that))
        .collect()
}

fn client_comparisons(name: &str, this: &ClientMetrics, that: &ClientMetrics) -> Vec<Comparison> {
    let (a, b) = (&this.latency, &that.latency);
    let metric = |stat: &str, this: f64, that: f64, lower_is_better: bool| Comparison {
        label: format!("{name} {stat}"),
        this,
        that,
        lower_is_better,
    };
    vec![
        metric("Avg (ms)", a.avg, b.avg, true),
        metric("P50 (ms)", a.p50, b.p50, true),
        metric("P95 (ms)", a.p95, b.p95, true),
        metric("P99 (ms)", a.p99, b.p99, true),
        metric("Error Rate (%)", this.error_rate, that.error_rate, true),
        metric("Throughput (req/s)", a.throughput, b.throughput, false),
    ]
}
