use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidValue,
    ConfigNotFound,
    ConfigParseFailed,
    ConfigValidationFailed,

    ValidationInvalidArgument,

    StepValidationFailed,
    StepExecutionFailed,
    StepTimeout,

    ContextConflict,

    GitCommandFailed,
    RemoteRequestFailed,

    InternalIoError,
    InternalJsonError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigParseFailed => "config.parse_failed",
            ErrorCode::ConfigValidationFailed => "config.validation_failed",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::StepValidationFailed => "step.validation_failed",
            ErrorCode::StepExecutionFailed => "step.execution_failed",
            ErrorCode::StepTimeout => "step.timeout",

            ErrorCode::ContextConflict => "context.conflict",

            ErrorCode::GitCommandFailed => "git.command_failed",
            ErrorCode::RemoteRequestFailed => "remote.request_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
        }
    }

    /// Errors raised before any step runs. Nothing external has been touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConfigInvalidValue
                | ErrorCode::ConfigNotFound
                | ErrorCode::ConfigParseFailed
                | ErrorCode::ConfigValidationFailed
                | ErrorCode::ValidationInvalidArgument
                | ErrorCode::StepValidationFailed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNotFoundDetails {
    pub dir: String,
    pub searched: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseFailedDetails {
    pub path: String,
    pub format: String,
    pub error: String,
}

/// A single problem found while validating a pipeline spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationProblem {
    /// Zero-based position of the step in the pipeline, if the problem belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub problem: String,
}

impl std::fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.index, &self.step) {
            (Some(index), Some(step)) => write!(f, "step #{} '{}'", index + 1, step)?,
            (None, Some(step)) => write!(f, "step '{}'", step)?,
            _ => write!(f, "pipeline")?,
        }
        if let Some(field) = &self.field {
            write!(f, " option '{}'", field)?;
        }
        write!(f, ": {}", self.problem)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValidationDetails {
    pub problems: Vec<ValidationProblem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionDetails {
    pub step: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTimeoutDetails {
    pub operation: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConflictDetails {
    pub field: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequestFailedDetails {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let field = field.into();
        let problem = problem.into();
        let message = format!("Invalid argument '{}': {}", field, problem);
        let details = to_details(InvalidArgumentDetails {
            field,
            problem,
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, message, details)
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        let message = format!("Invalid configuration value for '{}': {}", key, problem);
        Self::new(
            ErrorCode::ConfigInvalidValue,
            message,
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    pub fn config_not_found(dir: impl Into<String>, searched: Vec<String>) -> Self {
        let dir = dir.into();
        Self::new(
            ErrorCode::ConfigNotFound,
            format!("No release configuration found in {}", dir),
            to_details(ConfigNotFoundDetails {
                dir,
                searched: searched.clone(),
            }),
        )
        .with_hint(format!("Create one of: {}", searched.join(", ")))
    }

    pub fn config_parse_failed(
        path: impl Into<String>,
        format: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let format = format.into();
        let error = error.into();
        Self::new(
            ErrorCode::ConfigParseFailed,
            format!("Failed to parse {} as {}: {}", path, format, error),
            to_details(ConfigParseFailedDetails {
                path,
                format,
                error,
            }),
        )
    }

    /// Aggregate of every problem found while validating a pipeline spec.
    pub fn config_validation(problems: Vec<ValidationProblem>) -> Self {
        let message = match problems.as_slice() {
            [single] => format!("Invalid release pipeline: {}", single),
            _ => format!(
                "Invalid release pipeline: {} problems found",
                problems.len()
            ),
        };
        let hints: Vec<Hint> = problems
            .iter()
            .map(|p| Hint {
                message: p.to_string(),
            })
            .collect();

        let mut err = Self::new(
            ErrorCode::ConfigValidationFailed,
            message,
            to_details(ConfigValidationDetails { problems }),
        );
        err.hints = hints;
        err
    }

    /// Returns the individual problems carried by a validation error.
    pub fn validation_problems(&self) -> Vec<ValidationProblem> {
        match self.code {
            ErrorCode::ConfigValidationFailed => self
                .details
                .get("problems")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            ErrorCode::StepValidationFailed => serde_json::from_value(self.details.clone())
                .map(|p| vec![p])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn step_validation(
        step: impl Into<String>,
        field: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = ValidationProblem {
            index: None,
            step: Some(step.into()),
            field,
            problem: problem.into(),
        };
        Self::new(
            ErrorCode::StepValidationFailed,
            format!("Invalid step configuration: {}", problem),
            to_details(&problem),
        )
    }

    pub fn step_execution(step: impl Into<String>, error: impl Into<String>) -> Self {
        let step = step.into();
        let error = error.into();
        Self::new(
            ErrorCode::StepExecutionFailed,
            format!("Step '{}' failed: {}", step, error),
            to_details(StepExecutionDetails {
                step,
                error,
                cause: None,
            }),
        )
    }

    /// Wraps a lower-level failure as the execution error of `step`.
    ///
    /// Timeouts keep their own code so callers can tell them apart.
    pub fn into_step_failure(self, step: &str) -> Self {
        match self.code {
            ErrorCode::StepExecutionFailed | ErrorCode::StepTimeout => self,
            _ => {
                let mut wrapped = Self::new(
                    ErrorCode::StepExecutionFailed,
                    format!("Step '{}' failed: {}", step, self.message),
                    to_details(StepExecutionDetails {
                        step: step.to_string(),
                        error: self.message.clone(),
                        cause: Some(self.code.as_str().to_string()),
                    }),
                );
                wrapped.hints = self.hints;
                wrapped.retryable = self.retryable;
                wrapped
            }
        }
    }

    pub fn step_timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorCode::StepTimeout,
            format!("{} timed out after {}ms", operation, timeout_ms),
            to_details(StepTimeoutDetails {
                operation,
                timeout_ms,
            }),
        )
    }

    pub fn context_conflict(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let field = field.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ContextConflict,
            format!("Release context conflict on '{}': {}", field, problem),
            to_details(ContextConflictDetails { field, problem }),
        )
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn remote_request_failed(
        url: impl Into<String>,
        status: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let error = error.into();
        let message = match status {
            Some(code) => format!("Request to {} failed with status {}: {}", url, code, error),
            None => format!("Request to {} failed: {}", url, error),
        };
        let mut err = Self::new(
            ErrorCode::RemoteRequestFailed,
            message,
            to_details(RemoteRequestFailedDetails { url, status, error }),
        );
        err.retryable = Some(status.map_or(true, |code| code >= 500));
        err
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("IO error ({}): {}", ctx, error),
            None => format!("IO error: {}", error),
        };
        Self::new(
            ErrorCode::InternalIoError,
            message,
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalJsonError,
            format!("JSON error: {}", error),
            to_details(InternalJsonErrorDetails { error, context }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
