use clap::Args;
use serde::Serialize;

use relpipe::steps::{StepContract, StepKind};

use super::CmdResult;

#[derive(Args)]
pub struct StepsArgs {}

#[derive(Serialize)]
pub struct StepInfo {
    pub id: &'static str,
    pub kind: StepKind,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    #[serde(flatten)]
    pub contract: StepContract,
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum StepsOutput {
    #[serde(rename = "release.steps")]
    List { steps: Vec<StepInfo> },
}

pub fn run(_args: StepsArgs) -> CmdResult<StepsOutput> {
    let steps = StepKind::ALL
        .into_iter()
        .map(|kind| StepInfo {
            id: kind.id(),
            kind,
            aliases: kind.names(),
            description: kind.description(),
            contract: kind.contract(),
        })
        .collect();
    Ok((StepsOutput::List { steps }, 0))
}
