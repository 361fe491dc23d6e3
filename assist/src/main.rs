use std::{fs, path::PathBuf};

use args::AssistCommand;
use rpcbench_core::{consts::RUNS_OUTPUT_PATH, metrics::RunReport, types::BenchResult};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

fn main() -> BenchResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cmd = AssistCommand::from_args();
    match cmd {
        AssistCommand::Report { results } => report::report(results)?,
        AssistCommand::Cleanup { all } => cleanup::cleanup(all)?,
        AssistCommand::Compare {
            sensitivity,
            silent,
            this,
            that,
        } => compare::compare(this, that, sensitivity, silent)?,
    }
    Ok(())
}

/// Path of the `nth` newest report in the runs directory, starting at 1.
fn latest_run_output_path(nth: usize) -> BenchResult<PathBuf> {
    let dir = fs::read_dir(RUNS_OUTPUT_PATH).map_err(|err| {
        format!("failed to read output directory {RUNS_OUTPUT_PATH} for benchmark runs: {err}")
    })?;
    let mut outputs: Vec<_> = dir
        .filter_map(|e| e.map(|e| e.path()).ok().filter(|p| p.is_file()))
        .collect();
    // names embed a zero padded timestamp, lexical order is chronological
    outputs.sort();
    tracing::debug!(?outputs, "found run reports");
    nth.checked_sub(1)
        .and_then(|skip| outputs.into_iter().rev().nth(skip))
        .ok_or_else(|| format!("{RUNS_OUTPUT_PATH} has fewer than {nth} run reports").into())
}

fn load_report(path: Option<PathBuf>, nth: usize) -> BenchResult<RunReport> {
    let path = match path {
        Some(path) => path,
        None => latest_run_output_path(nth)?,
    };
    let output = fs::read_to_string(&path)
        .map_err(|err| format!("failed to read run report {}: {err}", path.display()))?;
    json::from_str(&output).map_err(Into::into)
}

mod args;
mod cleanup;
mod compare;
mod report;
