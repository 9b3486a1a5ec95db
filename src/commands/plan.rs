use clap::Args;
use serde::Serialize;

use relpipe::config;
use relpipe::local_files::LocalFs;
use relpipe::pipeline::PlanStep;
use relpipe::Pipeline;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlanArgs {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePlan {
    pub config_path: String,
    pub branches: Vec<String>,
    pub tag_format: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum PlanOutput {
    #[serde(rename = "release.plan")]
    Plan { plan: ReleasePlan },
}

/// Validate the configured pipeline and describe what each step would do.
pub fn run(_args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let root = global.root()?;
    let (path, spec) = config::resolve(&LocalFs::new(), &root, global.config.as_deref())?;
    let pipeline = Pipeline::from_spec(&spec)?;

    let plan = ReleasePlan {
        config_path: path.display().to_string(),
        branches: spec.branches.clone(),
        tag_format: spec.tag_format.clone(),
        steps: pipeline.plan(),
    };
    Ok((PlanOutput::Plan { plan }, 0))
}
