use std::time::Duration;

use clap::Args;
use serde::Serialize;

use relpipe::orchestrator::{self, RunOptions};
use relpipe::{RunResult, RunStatus};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    /// Compute the release without writing files, tagging or publishing
    #[arg(long)]
    dry_run: bool,

    /// Deadline in seconds for each step's git commands and HTTP requests
    #[arg(long, value_name = "SECS")]
    step_timeout: Option<u64>,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum RunOutput {
    #[serde(rename = "release.run")]
    Run { result: RunResult },
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let root = global.root()?;
    let options = RunOptions {
        dry_run: args.dry_run,
        step_timeout: args.step_timeout.map(Duration::from_secs),
    };

    let result = orchestrator::run_in_dir(&root, global.config.as_deref(), options)?;

    if result.status == RunStatus::Failed {
        let step = result.failed_step.as_deref().unwrap_or("unknown");
        let message = result
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("step failed");
        eprintln!("relpipe: step '{}' failed: {}", step, message);
    }

    let exit_code = result.exit_code();
    Ok((RunOutput::Run { result }, exit_code))
}
