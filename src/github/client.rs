use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::GitHubError;
use super::token_cache::InstallationToken;
use super::{GITHUB_API_VERSION, USER_AGENT};

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Cap upstream error bodies before they enter logs or error values.
pub(crate) fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub html_url: String,
    pub owner: RepoOwner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoOwner {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: CommitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentsInfo {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub html_url: String,
}

/// Thin GitHub REST client bound to one installation token.
///
/// Built per request from the cache's current token; it never refreshes
/// the token itself.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: InstallationToken,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: InstallationToken) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        self.http
            .request(method, url)
            .bearer_auth(self.token.token())
            .header(header::ACCEPT, "application/vnd.github+json")
            .header(header::USER_AGENT, USER_AGENT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GitHubError> {
        let response = request
            .send()
            .await
            .map_err(|e| GitHubError::Transport(e.to_string()))?;

        log_rate_limit(&response);

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Status {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GitHubError::Decode(e.to_string()))
    }

    pub async fn get_repo(&self, owner: &str, name: &str) -> Result<Repository, GitHubError> {
        self.execute(self.request(Method::GET, &format!("/repos/{owner}/{name}")))
            .await
    }

    pub async fn get_branch(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<Branch, GitHubError> {
        self.execute(self.request(
            Method::GET,
            &format!("/repos/{owner}/{name}/branches/{branch}"),
        ))
        .await
    }

    /// Create `refs/heads/{branch}` pointing at `sha`. GitHub answers 422
    /// when the ref already exists; callers decide whether that matters.
    pub async fn create_branch_ref(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), GitHubError> {
        let request = self
            .request(Method::POST, &format!("/repos/{owner}/{name}/git/refs"))
            .json(&json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": sha,
            }));
        let _: serde_json::Value = self.execute(request).await?;
        Ok(())
    }

    /// Blob metadata for `path` on `reference`, or `None` if no such file.
    pub async fn file_info(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<ContentsInfo>, GitHubError> {
        let request = self
            .request(
                Method::GET,
                &format!("/repos/{owner}/{name}/contents/{path}"),
            )
            .query(&[("ref", reference)]);
        match self.execute::<ContentsInfo>(request).await {
            Ok(info) => Ok(Some(info)),
            Err(GitHubError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or update a file through the contents API. Pass the current
    /// blob `sha` to update, `None` to create.
    pub async fn put_file(
        &self,
        owner: &str,
        name: &str,
        path: &str,
        branch: &str,
        message: &str,
        content: &str,
        sha: Option<&str>,
    ) -> Result<(), GitHubError> {
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        let request = self
            .request(
                Method::PUT,
                &format!("/repos/{owner}/{name}/contents/{path}"),
            )
            .json(&body);
        let _: serde_json::Value = self.execute(request).await?;
        Ok(())
    }

    pub async fn list_open_pulls(
        &self,
        owner: &str,
        name: &str,
        head: &str,
        base: &str,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let request = self
            .request(Method::GET, &format!("/repos/{owner}/{name}/pulls"))
            .query(&[("state", "open"), ("head", head), ("base", base)]);
        self.execute(request).await
    }

    pub async fn create_pull(
        &self,
        owner: &str,
        name: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest, GitHubError> {
        let request = self
            .request(Method::POST, &format!("/repos/{owner}/{name}/pulls"))
            .json(&json!({
                "title": title,
                "head": head,
                "base": base,
                "body": body,
            }));
        self.execute(request).await
    }

    /// Edit an open pull request. Title and body are patched together so a
    /// hand-edited title converges back to the managed one.
    pub async fn update_pull(
        &self,
        owner: &str,
        name: &str,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<PullRequest, GitHubError> {
        let request = self
            .request(Method::PATCH, &format!("/repos/{owner}/{name}/pulls/{number}"))
            .json(&update_pull_payload(title, body));
        self.execute(request).await
    }
}

fn update_pull_payload(title: &str, body: &str) -> serde_json::Value {
    json!({
        "title": title,
        "body": body,
    })
}

fn log_rate_limit(response: &reqwest::Response) {
    let header_value = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let (Some(remaining), Some(limit)) = (
        header_value("x-ratelimit-remaining"),
        header_value("x-ratelimit-limit"),
    ) {
        debug!(%remaining, %limit, "GitHub API rate limit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_pull_payload_patches_title_and_body() {
        let payload = update_pull_payload("Create or update files: octo:ingestr-x", "new body");
        assert_eq!(payload["title"], "Create or update files: octo:ingestr-x");
        assert_eq!(payload["body"], "new body");
    }

    #[test]
    fn test_truncate_body_passes_short_bodies_through() {
        assert_eq!(truncate_body("  {\"message\":\"nope\"}  "), "{\"message\":\"nope\"}");
    }

    #[test]
    fn test_truncate_body_caps_long_bodies() {
        let body = "x".repeat(10_000);
        let truncated = truncate_body(&body);
        assert_eq!(truncated.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_body_respects_char_boundaries() {
        let body = "ü".repeat(MAX_ERROR_BODY_CHARS + 10);
        let truncated = truncate_body(&body);
        assert_eq!(truncated.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }
}
