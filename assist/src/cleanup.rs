use rpcbench_core::{consts::RUNS_OUTPUT_PATH, types::BenchResult};
use std::fs;

use crate::latest_run_output_path;

pub fn cleanup(all: bool) -> BenchResult<()> {
    if all {
        tracing::info!("removing every run report");
        let _ = fs::remove_dir_all(RUNS_OUTPUT_PATH);
        return Ok(());
    }
    if !fs::exists(RUNS_OUTPUT_PATH).unwrap_or_default() {
        return Ok(());
    }
    let last = latest_run_output_path(1)?;
    fs::remove_file(&last)?;
    println!("removed: {}", last.display());
    Ok(())
}
