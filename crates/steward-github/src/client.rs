use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use steward_core::remote::{parse_subject, RemoteClient, RemoteResponse, SubjectType};
use tracing::debug;

use crate::error::{GitHubError, Result};
use crate::wire::ApiMessage;

pub(crate) const PER_PAGE: usize = 100;

/// Statuses that mean the remote understood the request and refused it on
/// current state rather than failing.
const REFUSED: &[u16] = &[404, 405, 409, 410, 422];

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, repo: &str, token: &str, timeout: Duration) -> Result<Self> {
        let (owner, name) = repo
            .split_once('/')
            .ok_or_else(|| GitHubError::InvalidRepo(repo.to_string()))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(GitHubError::InvalidRepo(repo.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("steward"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| GitHubError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(GitHubError::Client)?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
        })
    }

    /// Build a client with the token read from `token_env`.
    pub fn from_env(api_url: &str, repo: &str, token_env: &str, timeout: Duration) -> Result<Self> {
        let token =
            std::env::var(token_env).map_err(|_| GitHubError::MissingToken(token_env.to_string()))?;
        Self::new(api_url, repo, &token, timeout)
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repo, path)
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path))
    }

    // -----------------------------------------------------------------------
    // Request helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|source| GitHubError::Transport {
            operation: operation.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body);
        debug!(operation, status = status.as_u16(), %message, "github request failed");
        Err(GitHubError::Status {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        self.execute(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|source| GitHubError::Decode {
                operation: operation.to_string(),
                source,
            })
    }

    /// Follow `page` until a short page comes back.
    pub(crate) async fn paged<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        let mut page = 1u32;
        loop {
            let request = self
                .get(path)
                .query(query)
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let chunk: Vec<T> = self.json(operation, request).await?;
            let len = chunk.len();
            rows.extend(chunk);
            if len < PER_PAGE {
                return Ok(rows);
            }
            page += 1;
        }
    }

    async fn mutate(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> steward_core::Result<RemoteResponse> {
        match self.execute(operation, request).await {
            Ok(_) => Ok(RemoteResponse::Done),
            Err(GitHubError::Status {
                status, message, ..
            }) if REFUSED.contains(&status) => Ok(RemoteResponse::Rejected(format!(
                "{operation} refused ({status}): {message}"
            ))),
            Err(e) => Err(e.into_execution()),
        }
    }
}

fn number_of(subject: &str) -> std::result::Result<(SubjectType, u64), RemoteResponse> {
    parse_subject(subject)
        .ok_or_else(|| RemoteResponse::Rejected(format!("{subject} is not a GitHub subject")))
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

impl RemoteClient for GitHubClient {
    async fn comment(&self, subject: &str, body: &str) -> steward_core::Result<RemoteResponse> {
        let (_, number) = match number_of(subject) {
            Ok(n) => n,
            Err(rejected) => return Ok(rejected),
        };
        let request = self
            .http
            .post(self.url(&format!("issues/{number}/comments")))
            .json(&json!({ "body": body }));
        self.mutate("comment", request).await
    }

    async fn add_labels(
        &self,
        subject: &str,
        labels: &[String],
    ) -> steward_core::Result<RemoteResponse> {
        let (_, number) = match number_of(subject) {
            Ok(n) => n,
            Err(rejected) => return Ok(rejected),
        };
        let request = self
            .http
            .post(self.url(&format!("issues/{number}/labels")))
            .json(&json!({ "labels": labels }));
        self.mutate("add labels", request).await
    }

    async fn close(&self, subject: &str) -> steward_core::Result<RemoteResponse> {
        let (_, number) = match number_of(subject) {
            Ok(n) => n,
            Err(rejected) => return Ok(rejected),
        };
        let request = self
            .http
            .patch(self.url(&format!("issues/{number}")))
            .json(&json!({ "state": "closed" }));
        self.mutate("close", request).await
    }

    async fn merge(&self, subject: &str, method: Option<&str>) -> steward_core::Result<RemoteResponse> {
        let number = match number_of(subject) {
            Ok((SubjectType::PullRequest, n)) => n,
            Ok((SubjectType::Issue, _)) => {
                return Ok(RemoteResponse::Rejected(format!(
                    "{subject} is an issue, not a pull request"
                )))
            }
            Err(rejected) => return Ok(rejected),
        };
        let request = self
            .http
            .put(self.url(&format!("pulls/{number}/merge")))
            .json(&json!({ "merge_method": method.unwrap_or("merge") }));
        self.mutate("merge", request).await
    }
}
