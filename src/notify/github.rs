use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::NotifyError;

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullInfo {
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelInfo>,
}

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<CommitInfo>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    labels: Vec<LabelInfo>,
}

#[derive(Debug, Deserialize)]
struct CommentInfo {
    body: Option<String>,
}

/// Thin adapter over the issue tracker's REST API. All calls carry a 10 s
/// timeout and are retried once on a 5xx; 4xx surfaces directly.
pub struct GithubClient {
    http: reqwest::Client,
    repo: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(repo: &str, timeout_secs: u64) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("fleetctl")
            .build()
            .map_err(|e| NotifyError::Http {
                context: "client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            repo: repo.to_string(),
            token: std::env::var("GITHUB_TOKEN").ok(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{API_BASE}/repos/{}/{path}", self.repo))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute(
        &self,
        context: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, NotifyError> {
        let mut last_reason = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                debug!("retrying issue-tracker call ({context}) after 5xx");
            }
            let result = build().send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status.is_server_error() && attempt == 0 {
                        last_reason = format!("server error {status}");
                        continue;
                    }
                    return Err(NotifyError::Api {
                        status: status.as_u16(),
                        context: context.to_string(),
                    });
                }
                Err(e) if attempt == 0 => {
                    last_reason = e.to_string();
                    continue;
                }
                Err(e) => {
                    return Err(NotifyError::Http {
                        context: context.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(NotifyError::Http {
            context: context.to_string(),
            reason: last_reason,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, context: &str, path: &str) -> Result<T, NotifyError> {
        let resp = self
            .execute(context, || self.request(reqwest::Method::GET, path))
            .await?;
        resp.json().await.map_err(|e| NotifyError::Http {
            context: context.to_string(),
            reason: format!("invalid payload: {e}"),
        })
    }

    /// Commits between two build refs, oldest first
    pub async fn compare_commits(
        &self,
        old: &str,
        new: &str,
    ) -> Result<Vec<CommitInfo>, NotifyError> {
        let resp: CompareResponse = self
            .get_json("compare", &format!("compare/{old}...{new}"))
            .await?;
        Ok(resp.commits)
    }

    pub async fn pulls_for_commit(&self, sha: &str) -> Result<Vec<PullInfo>, NotifyError> {
        self.get_json("commit-pulls", &format!("commits/{sha}/pulls"))
            .await
    }

    pub async fn issue_labels(&self, number: u64) -> Result<Vec<String>, NotifyError> {
        let resp: IssueResponse = self.get_json("issue", &format!("issues/{number}")).await?;
        Ok(resp.labels.into_iter().map(|l| l.name).collect())
    }

    pub async fn issue_comments(&self, number: u64) -> Result<Vec<String>, NotifyError> {
        let resp: Vec<CommentInfo> = self
            .get_json("issue-comments", &format!("issues/{number}/comments"))
            .await?;
        Ok(resp.into_iter().filter_map(|c| c.body).collect())
    }

    pub async fn add_label(&self, number: u64, label: &str) -> Result<(), NotifyError> {
        let body = json!({ "labels": [label] });
        self.execute("add-label", || {
            self.request(reqwest::Method::POST, &format!("issues/{number}/labels"))
                .json(&body)
        })
        .await
        .map(|_| ())
    }

    pub async fn comment(&self, number: u64, text: &str) -> Result<(), NotifyError> {
        let body = json!({ "body": text });
        self.execute("comment", || {
            self.request(reqwest::Method::POST, &format!("issues/{number}/comments"))
                .json(&body)
        })
        .await
        .map(|_| ())
    }
}
