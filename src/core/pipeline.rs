use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::context::{Field, ReleaseContext};
use crate::error::{Error, Hint, Result, ValidationProblem};
use crate::steps::{Effect, Step, StepContract, StepEnv, StepFailure, StepFlow, StepKind};
use crate::version;

pub const DEFAULT_TAG_FORMAT: &str = "v${version}";

pub fn default_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

fn default_tag_format() -> String {
    DEFAULT_TAG_FORMAT.to_string()
}

/// One configured step: a name and its raw options.
///
/// Written in config files as `"name"` or `["name", { ...options }]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl StepConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Map::new(),
        }
    }

    /// Options from a JSON object; any other value leaves the options empty.
    pub fn with_options(mut self, options: Value) -> Self {
        if let Value::Object(map) = options {
            self.options = map;
        }
        self
    }
}

impl<'de> Deserialize<'de> for StepConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Pair(String, Map<String, Value>),
            Single([String; 1]),
            Table {
                name: String,
                #[serde(default)]
                options: Map<String, Value>,
            },
        }

        Ok(match Raw::deserialize(deserializer).map_err(|_| {
            serde::de::Error::custom(
                "expected a step name or a [name, options] pair",
            )
        })? {
            Raw::Name(name) => StepConfig::new(name),
            Raw::Single([name]) => StepConfig::new(name),
            Raw::Pair(name, options) | Raw::Table { name, options } => StepConfig { name, options },
        })
    }
}

fn deserialize_branches<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Branch {
        Name(String),
        Object { name: String },
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Branches {
        One(Branch),
        Many(Vec<Branch>),
    }

    let branches = match Branches::deserialize(deserializer)? {
        Branches::One(branch) => vec![branch],
        Branches::Many(branches) => branches,
    };
    Ok(branches
        .into_iter()
        .map(|b| match b {
            Branch::Name(name) | Branch::Object { name } => name,
        })
        .collect())
}

/// A release pipeline as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(
        default = "default_branches",
        deserialize_with = "deserialize_branches"
    )]
    pub branches: Vec<String>,
    #[serde(default)]
    pub repository_url: String,
    #[serde(default = "default_tag_format")]
    pub tag_format: String,
    #[serde(default, alias = "plugins")]
    pub steps: Vec<StepConfig>,
}

impl Default for PipelineSpec {
    fn default() -> Self {
        Self {
            branches: default_branches(),
            repository_url: String::new(),
            tag_format: default_tag_format(),
            steps: Vec::new(),
        }
    }
}

impl PipelineSpec {
    /// Branch names may be glob patterns such as `release/*`.
    pub fn allows_branch(&self, branch: &str) -> bool {
        self.branches.iter().any(|pattern| {
            pattern == branch
                || glob::Pattern::new(pattern)
                    .map(|p| p.matches(branch))
                    .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

/// Error detail reported for a failed step or run.
#[derive(Debug, Clone, Serialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
            hints: err.hints.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub name: String,
    pub kind: StepKind,
    pub status: RunStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl StepOutcome {
    fn skipped(step: &PlannedStep, reason: impl Into<String>) -> Self {
        Self {
            name: step.name.clone(),
            kind: step.step.kind(),
            status: RunStatus::Skipped,
            duration_ms: 0,
            reason: Some(reason.into()),
            error: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

fn build_summary(outcomes: &[StepOutcome], status: RunStatus, dry_run: bool) -> RunSummary {
    let count = |wanted: RunStatus| outcomes.iter().filter(|o| o.status == wanted).count();

    let next_actions = match status {
        RunStatus::Failed => vec![
            "Fix the failing step and re-run; completed steps were not rolled back".to_string(),
        ],
        RunStatus::Success if dry_run => {
            vec!["Re-run without --dry-run to publish the release".to_string()]
        }
        _ => Vec::new(),
    };

    RunSummary {
        total_steps: outcomes.len(),
        succeeded: count(RunStatus::Success),
        failed: count(RunStatus::Failed),
        skipped: count(RunStatus::Skipped),
        next_actions,
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
    pub summary: RunSummary,
    pub context: ReleaseContext,
}

impl RunResult {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success | RunStatus::Skipped => 0,
            RunStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub name: String,
    pub step: Step,
}

/// What `plan` reports for each step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub name: String,
    pub kind: StepKind,
    #[serde(flatten)]
    pub contract: StepContract,
    pub in_dry_run: DryRunAction,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DryRunAction {
    Run,
    ComputeOnly,
    Skip,
}

/// A validated, ordered sequence of steps.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PlannedStep>,
    step_timeout: Option<Duration>,
}

impl Pipeline {
    /// Validate the whole spec and build the pipeline; every problem is reported at once.
    pub fn from_spec(spec: &PipelineSpec) -> Result<Self> {
        let mut problems = Vec::new();

        if let Err(err) = version::validate_tag_format(&spec.tag_format) {
            problems.push(ValidationProblem {
                index: None,
                step: None,
                field: Some("tagFormat".to_string()),
                problem: err.message,
            });
        }
        if spec.branches.is_empty() {
            problems.push(ValidationProblem {
                index: None,
                step: None,
                field: Some("branches".to_string()),
                problem: "at least one release branch is required".to_string(),
            });
        }

        match validate_steps(&spec.steps) {
            Ok(steps) if problems.is_empty() => Ok(Self {
                steps,
                step_timeout: None,
            }),
            Ok(_) => Err(Error::config_validation(problems)),
            Err(mut step_problems) => {
                problems.append(&mut step_problems);
                Err(Error::config_validation(problems))
            }
        }
    }

    pub fn from_steps(configs: &[StepConfig]) -> Result<Self> {
        let steps = validate_steps(configs).map_err(Error::config_validation)?;
        Ok(Self {
            steps,
            step_timeout: None,
        })
    }

    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn plan(&self) -> Vec<PlanStep> {
        self.steps
            .iter()
            .map(|planned| {
                let contract = planned.step.contract();
                PlanStep {
                    name: planned.name.clone(),
                    kind: planned.step.kind(),
                    contract,
                    in_dry_run: match contract.effect {
                        Effect::Pure => DryRunAction::Run,
                        Effect::Filesystem => DryRunAction::ComputeOnly,
                        Effect::Vcs | Effect::Network => DryRunAction::Skip,
                    },
                }
            })
            .collect()
    }

    /// Check every step's preconditions before anything runs. No-op in dry runs.
    pub fn verify(&self, env: &StepEnv) -> Result<()> {
        if env.dry_run {
            return Ok(());
        }
        for planned in &self.steps {
            planned.step.verify(&planned.name, env)?;
        }
        Ok(())
    }

    /// Report every step as skipped without running anything.
    pub fn skip_all(&self, context: ReleaseContext, reason: &str, dry_run: bool) -> RunResult {
        let steps: Vec<StepOutcome> = self
            .steps
            .iter()
            .map(|planned| StepOutcome::skipped(planned, reason))
            .collect();
        RunResult {
            status: RunStatus::Skipped,
            reason: Some(reason.to_string()),
            failed_step: None,
            error: None,
            dry_run,
            summary: build_summary(&steps, RunStatus::Skipped, dry_run),
            steps,
            context,
        }
    }

    /// Run the steps in order, stopping at the first failure or halt.
    pub fn run(&self, context: ReleaseContext, env: &StepEnv) -> RunResult {
        let mut context = context;
        let mut outcomes = Vec::with_capacity(self.steps.len());
        let mut status = RunStatus::Success;
        let mut reason: Option<String> = None;
        let mut failed_step: Option<String> = None;
        let mut error: Option<StepError> = None;

        for planned in &self.steps {
            if status != RunStatus::Success {
                let why = match status {
                    RunStatus::Failed => "previous step failed",
                    _ => reason.as_deref().unwrap_or("release halted"),
                };
                outcomes.push(StepOutcome::skipped(planned, why));
                continue;
            }

            let contract = planned.step.contract();
            if env.dry_run && contract.effect.is_external() {
                log_status!("release", "Skipping {} (dry run)", planned.name);
                outcomes.push(StepOutcome::skipped(planned, "dry run"));
                continue;
            }

            log_status!("release", "Running {}", planned.name);
            let started = Instant::now();
            let step_env = env.with_deadline(self.step_timeout.map(|t| started + t));
            let warnings_before = context.warnings.len();

            let (step_status, step_reason, step_error) =
                match planned.step.execute(&planned.name, context, &step_env) {
                    Ok(StepFlow::Continue(next)) => {
                        context = next;
                        (RunStatus::Success, None, None)
                    }
                    Ok(StepFlow::Halt(next, why)) => {
                        context = next;
                        status = RunStatus::Skipped;
                        reason = Some(why.clone());
                        (RunStatus::Success, Some(why), None)
                    }
                    Err(failure) => {
                        let StepFailure {
                            context: partial,
                            error: err,
                        } = *failure;
                        context = partial;
                        log_status!("release", "{} failed: {}", planned.name, err.message);
                        let detail = StepError::from(&err);
                        status = RunStatus::Failed;
                        failed_step = Some(planned.name.clone());
                        error = Some(detail.clone());
                        (RunStatus::Failed, None, Some(detail))
                    }
                };

            let duration_ms = started.elapsed().as_millis() as u64;
            log_status!(
                "release",
                "{} finished in {}ms ({:?})",
                planned.name,
                duration_ms,
                step_status
            );
            outcomes.push(StepOutcome {
                name: planned.name.clone(),
                kind: planned.step.kind(),
                status: step_status,
                duration_ms,
                reason: step_reason,
                error: step_error,
                warnings: context.warnings[warnings_before..].to_vec(),
            });
        }

        RunResult {
            summary: build_summary(&outcomes, status, env.dry_run),
            status,
            reason,
            failed_step,
            error,
            dry_run: env.dry_run,
            steps: outcomes,
            context,
        }
    }
}

/// Schema, duplicate and ordering checks, in that order, collecting every problem.
fn validate_steps(configs: &[StepConfig]) -> std::result::Result<Vec<PlannedStep>, Vec<ValidationProblem>> {
    let mut problems = Vec::new();
    if configs.is_empty() {
        problems.push(ValidationProblem {
            index: None,
            step: None,
            field: Some("steps".to_string()),
            problem: "pipeline has no steps".to_string(),
        });
        return Err(problems);
    }

    let mut parsed: Vec<(usize, PlannedStep)> = Vec::with_capacity(configs.len());
    for (index, config) in configs.iter().enumerate() {
        match Step::parse(&config.name, &config.options) {
            Ok(step) => parsed.push((
                index,
                PlannedStep {
                    name: config.name.clone(),
                    step,
                },
            )),
            Err(err) => problems.extend(err.validation_problems().into_iter().map(|mut p| {
                p.index = Some(index);
                p
            })),
        }
    }

    let mut seen = HashSet::new();
    for (index, planned) in &parsed {
        let kind = planned.step.kind();
        if !seen.insert(kind) && !kind.contract().idempotent {
            problems.push(ValidationProblem {
                index: Some(*index),
                step: Some(planned.name.clone()),
                field: None,
                problem: format!("'{}' may appear only once in a pipeline", kind.id()),
            });
        }
    }

    let mut available: HashSet<Field> = Field::seeded().iter().copied().collect();
    for (index, planned) in &parsed {
        let contract = planned.step.contract();
        for field in contract.requires {
            if available.contains(field) {
                continue;
            }
            let suggestion = StepKind::provider_of(*field)
                .map(|kind| format!("; add '{}' before it", kind.id()))
                .unwrap_or_default();
            problems.push(ValidationProblem {
                index: Some(*index),
                step: Some(planned.name.clone()),
                field: None,
                problem: format!(
                    "requires '{}' which no earlier step provides{}",
                    field, suggestion
                ),
            });
        }
        available.extend(contract.writes.iter().copied());
    }

    if problems.is_empty() {
        Ok(parsed.into_iter().map(|(_, planned)| planned).collect())
    } else {
        Err(problems)
    }
}
