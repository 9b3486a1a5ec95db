use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::{Error, Result};

use super::{parse_repository, PublishedRelease, ReleaseHost, ReleaseRequest};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];

#[derive(Deserialize)]
struct CreatedRelease {
    id: u64,
    html_url: Option<String>,
    name: Option<String>,
    tag_name: String,
}

/// [`ReleaseHost`] backed by the GitHub REST API.
pub struct GitHubHost {
    api_url: String,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubHost {
    pub fn new(
        api_url: impl Into<String>,
        repository_url: &str,
        token: impl Into<String>,
    ) -> Result<Self> {
        let (owner, repo) = parse_repository(repository_url).ok_or_else(|| {
            Error::config_invalid_value(
                "repositoryUrl",
                Some(repository_url.to_string()),
                "cannot determine GitHub owner and repository",
            )
        })?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner,
            repo,
            token: token.into(),
        })
    }

    /// Build from `GITHUB_TOKEN`/`GH_TOKEN` and `GITHUB_API_URL`.
    /// Returns `Ok(None)` when no token is available.
    pub fn from_env(repository_url: &str) -> Result<Option<Self>> {
        let Some(token) = token_from_env() else {
            return Ok(None);
        };
        let api_url =
            std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(api_url, repository_url, token).map(Some)
    }

    pub fn releases_url(&self) -> String {
        format!("{}/repos/{}/{}/releases", self.api_url, self.owner, self.repo)
    }

    fn issue_comments_url(&self, number: u64) -> String {
        format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_url, self.owner, self.repo, number
        )
    }

    fn client(&self, deadline: Option<Instant>, operation: &str) -> Result<reqwest::blocking::Client> {
        let timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::step_timeout(operation, 0));
                }
                remaining.min(DEFAULT_TIMEOUT)
            }
            None => DEFAULT_TIMEOUT,
        };
        reqwest::blocking::Client::builder()
            .user_agent(format!("relpipe/{}", VERSION))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))
    }

    fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        deadline: Option<Instant>,
        operation: &str,
    ) -> Result<reqwest::blocking::Response> {
        let response = self
            .client(deadline, operation)?
            .post(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    Error::step_timeout(operation, DEFAULT_TIMEOUT.as_millis() as u64)
                } else {
                    Error::remote_request_failed(url, None, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(Error::remote_request_failed(
                url,
                Some(status.as_u16()),
                github_error_message(&text),
            ));
        }
        Ok(response)
    }
}

impl ReleaseHost for GitHubHost {
    fn create_release(
        &self,
        request: &ReleaseRequest,
        deadline: Option<Instant>,
    ) -> Result<PublishedRelease> {
        let url = self.releases_url();
        let body = serde_json::json!({
            "tag_name": request.tag,
            "name": request.name,
            "body": request.notes,
            "draft": request.draft,
            "prerelease": request.prerelease,
        });
        let created: CreatedRelease = self
            .post(&url, &body, deadline, "create GitHub release")?
            .json()
            .map_err(|e| {
                Error::internal_json(e.to_string(), Some("parse GitHub release response".to_string()))
            })?;

        Ok(PublishedRelease {
            name: created.name.unwrap_or_else(|| request.name.clone()),
            tag: created.tag_name,
            url: created.html_url,
            id: Some(created.id),
        })
    }

    fn comment_on_issue(&self, number: u64, body: &str, deadline: Option<Instant>) -> Result<()> {
        let url = self.issue_comments_url(number);
        self.post(
            &url,
            &serde_json::json!({ "body": body }),
            deadline,
            "comment on GitHub issue",
        )?;
        Ok(())
    }
}

pub fn token_from_env() -> Option<String> {
    TOKEN_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
}

/// GitHub error bodies are `{ "message": ..., "errors": [...] }`; fall back to raw text.
fn github_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}
