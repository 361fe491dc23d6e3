use std::path::PathBuf;
use structopt::StructOpt;

/// # RPC Bench Assist Command-Line Interface
///
/// Defines the command-line arguments for the `rpcbench-assist` utility, which inspects,
/// compares and cleans up the run reports written by the observer.
#[derive(StructOpt, Debug)]
#[structopt(name = "rpcbench-assist", rename_all = "kebab-case")]
pub enum AssistCommand {
    /// ## Report
    ///
    /// Prints the environment, per-client metrics and resource usage of one run.
    Report {
        /// The path to the run report, the newest one when omitted.
        #[structopt(parse(from_os_str))]
        results: Option<PathBuf>,
    },
    /// ## Compare
    ///
    /// Compares the per-client metrics of two runs, highlighting regressions and
    /// improvements.
    Compare {
        /// The path to the newer run report.
        #[structopt(parse(from_os_str))]
        this: Option<PathBuf>,
        /// The path to the baseline run report.
        #[structopt(parse(from_os_str))]
        that: Option<PathBuf>,
        /// Suppress the output if no regression is detected.
        #[structopt(long)]
        silent: bool,
        /// Relative change (percent) beyond which a worse value counts as a regression.
        #[structopt(long, default_value = "10")]
        sensitivity: u8,
    },
    /// ## Cleanup
    ///
    /// Removes the newest run report, or every report with `--all`.
    Cleanup {
        #[structopt(long, short)]
        all: bool,
    },
}
