//! JSON envelope `{ success, data, error }`, printing, and exit code mapping.

use std::io::{self, Write};

use relpipe::error::Hint;
use relpipe::{Error, ErrorCode, Result};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct CliResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl From<&Error> for CliError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code.as_str(),
            message: err.message.clone(),
            details: err.details.clone(),
            hints: err.hints.clone(),
            retryable: err.retryable,
        }
    }
}

impl CliResponse {
    pub fn from_result(result: &Result<Value>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(CliError::from(err)),
            },
        }
    }
}

/// Serialize a command's output, keeping its exit code; errors map to a code by kind.
pub fn map_cmd_result_to_json<T: Serialize>(result: Result<(T, i32)>) -> (Result<Value>, i32) {
    match result {
        Ok((data, exit_code)) => match serde_json::to_value(data) {
            Ok(value) => (Ok(value), exit_code),
            Err(err) => (
                Err(Error::internal_json(
                    err.to_string(),
                    Some("serialize response".to_string()),
                )),
                1,
            ),
        },
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            (Err(err), exit_code)
        }
    }
}

/// 2 for problems found before any step ran, 1 for everything else.
fn exit_code_for_error(code: ErrorCode) -> i32 {
    if code.is_validation() {
        2
    } else {
        1
    }
}

pub fn print_json_result(result: Result<Value>) -> Result<()> {
    let payload = serde_json::to_string_pretty(&CliResponse::from_result(&result))
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize response".to_string())))?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match writeln!(handle, "{}", payload) {
        Ok(()) => Ok(()),
        // Output piped into a closed reader.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_exit_with_two() {
        let err = Error::config_not_found("/repo", vec![".releaserc".to_string()]);
        let (result, code) = map_cmd_result_to_json::<()>(Err(err));
        assert!(result.is_err());
        assert_eq!(code, 2);
    }

    #[test]
    fn execution_errors_exit_with_one() {
        let err = Error::git_command_failed("git push failed: rejected");
        let (_, code) = map_cmd_result_to_json::<()>(Err(err));
        assert_eq!(code, 1);
    }

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let err = Error::config_not_found("/repo", vec![".releaserc".to_string()]);
        let json = serde_json::to_value(CliResponse::from_result(&Err(err))).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "config.not_found");
        assert_eq!(json["error"]["hints"][0]["message"], "Create one of: .releaserc");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn command_exit_code_is_kept() {
        let (result, code) = map_cmd_result_to_json(Ok((serde_json::json!({ "ok": 1 }), 1)));
        let json = serde_json::to_value(CliResponse::from_result(&result)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["ok"], 1);
        assert_eq!(code, 1);
    }
}
