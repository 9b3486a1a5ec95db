//! Release hosting collaborators.
//!
//! - `github` - GitHub REST implementation of [`ReleaseHost`]

mod github;

pub use github::{token_from_env, GitHubHost};

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Request for a hosted release record.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseRequest {
    pub tag: String,
    pub name: String,
    pub notes: String,
    pub draft: bool,
    pub prerelease: bool,
}

/// A release record created on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedRelease {
    pub name: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Hosting-platform collaborator used by the release publisher.
pub trait ReleaseHost {
    fn create_release(
        &self,
        request: &ReleaseRequest,
        deadline: Option<Instant>,
    ) -> Result<PublishedRelease>;

    fn comment_on_issue(&self, number: u64, body: &str, deadline: Option<Instant>) -> Result<()>;
}

/// Owner and repository name from an HTTPS, `git+https`, `ssh://` or scp-style URL.
pub fn parse_repository(url: &str) -> Option<(String, String)> {
    let url = url.trim().trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/')?.1
    } else {
        // scp-like: git@github.com:owner/repo
        url.split_once(':')?.1
    };
    let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
    let repo = segments.next()?.to_string();
    let owner = segments.next()?.to_string();
    Some((owner, repo))
}

/// Browser URL of the repository, used for compare and commit links in release notes.
pub fn repository_web_url(url: &str) -> Option<String> {
    let (owner, repo) = parse_repository(url)?;
    let trimmed = url.trim();
    let host = if let Some((_, rest)) = trimmed.split_once("://") {
        let authority = rest.split('/').next()?;
        authority.rsplit('@').next()?.to_string()
    } else {
        let (user_host, _) = trimmed.split_once(':')?;
        user_host.rsplit('@').next()?.to_string()
    };
    let host = host.split(':').next()?.to_string();
    if host.is_empty() {
        return None;
    }
    Some(format!("https://{}/{}/{}", host, owner, repo))
}
