use std::collections::BTreeSet;

use futures_util::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::environment::Environment;
use crate::error::NotifyError;

pub mod github;

pub use github::{GithubClient, PullInfo};

/// Label and comment applied to work that has reached production
pub const LIVE_LABEL: &str = "live";
const COMMENT_MARKER: &str = "This is now live on";

/// Parallelism cap for per-commit and per-target tracker calls
const FANOUT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    /// Skip notification entirely
    Off,
    /// Enumerate what would be labelled, write nothing
    Preview,
    /// Apply labels and comments
    Send,
}

impl std::str::FromStr for NotifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(NotifyMode::Off),
            "preview" => Ok(NotifyMode::Preview),
            "send" => Ok(NotifyMode::Send),
            other => Err(format!("unknown notify mode {other:?} (off, preview, send)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    PullRequest,
    Issue,
}

/// A pull request or issue that should be marked live
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotifyTarget {
    pub number: u64,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyOutcome {
    pub number: u64,
    pub action: String,
    pub detail: Option<String>,
}

/// Issue numbers referenced by closing keywords in a pull request body
pub fn linked_issues(body: &str) -> Vec<u64> {
    // Pattern is fixed at compile time
    let pattern =
        Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+#(\d+)").unwrap();
    pattern
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Expand pull requests into the deduplicated set of notification targets:
/// each PR itself plus every issue its body closes.
pub fn collect_targets(pulls: &[PullInfo]) -> Vec<NotifyTarget> {
    let mut targets = BTreeSet::new();
    for pull in pulls {
        targets.insert(NotifyTarget {
            number: pull.number,
            kind: TargetKind::PullRequest,
        });
        if let Some(body) = &pull.body {
            for issue in linked_issues(body) {
                targets.insert(NotifyTarget {
                    number: issue,
                    kind: TargetKind::Issue,
                });
            }
        }
    }
    targets.into_iter().collect()
}

pub fn live_comment(env: Environment, version: &str) -> String {
    format!(
        "{COMMENT_MARKER} {} (https://{}), version {}.",
        env.name(),
        env.external_hostname(),
        version
    )
}

/// Walks the commit range between two releases and marks the associated
/// pull requests and issues as live.
///
/// Partial failure never aborts the run; every target gets an outcome.
pub struct Dispatcher<'a> {
    gh: &'a GithubClient,
    env: Environment,
    mode: NotifyMode,
}

impl<'a> Dispatcher<'a> {
    pub fn new(gh: &'a GithubClient, env: Environment, mode: NotifyMode) -> Self {
        Self { gh, env, mode }
    }

    pub async fn dispatch(
        &self,
        old_version: &str,
        new_version: &str,
    ) -> Result<Vec<NotifyOutcome>, NotifyError> {
        if self.mode == NotifyMode::Off {
            return Ok(Vec::new());
        }

        let commits = self.gh.compare_commits(old_version, new_version).await?;
        info!(
            "🔎 {} commits between {} and {}",
            commits.len(),
            old_version,
            new_version
        );

        let mut pulls: Vec<PullInfo> = Vec::new();
        let mut results = stream::iter(commits.iter())
            .map(|commit| async move { (commit.sha.clone(), self.gh.pulls_for_commit(&commit.sha).await) })
            .buffer_unordered(FANOUT);
        let mut outcomes = Vec::new();
        while let Some((sha, result)) = results.next().await {
            match result {
                Ok(found) => pulls.extend(found),
                Err(e) => {
                    warn!("pull lookup for {sha} failed: {e}");
                    outcomes.push(NotifyOutcome {
                        number: 0,
                        action: "commit-skipped".to_string(),
                        detail: Some(format!("{sha}: {e}")),
                    });
                }
            }
        }

        let targets = collect_targets(&pulls);
        info!("🎯 {} notification targets", targets.len());

        for target in targets {
            outcomes.push(self.notify_one(&target, new_version).await);
        }
        Ok(outcomes)
    }

    async fn notify_one(&self, target: &NotifyTarget, version: &str) -> NotifyOutcome {
        let number = target.number;

        let labels = match self.gh.issue_labels(number).await {
            Ok(labels) => labels,
            Err(e) => {
                return NotifyOutcome {
                    number,
                    action: "failed".to_string(),
                    detail: Some(e.to_string()),
                };
            }
        };
        if labels.iter().any(|l| l == LIVE_LABEL) {
            return NotifyOutcome {
                number,
                action: "already-live".to_string(),
                detail: None,
            };
        }

        let comments = match self.gh.issue_comments(number).await {
            Ok(comments) => comments,
            Err(e) => {
                return NotifyOutcome {
                    number,
                    action: "failed".to_string(),
                    detail: Some(e.to_string()),
                };
            }
        };
        if comments.iter().any(|c| c.contains(COMMENT_MARKER)) {
            return NotifyOutcome {
                number,
                action: "already-commented".to_string(),
                detail: None,
            };
        }

        if self.mode == NotifyMode::Preview {
            return NotifyOutcome {
                number,
                action: "would-notify".to_string(),
                detail: None,
            };
        }

        let comment = live_comment(self.env, version);
        if let Err(e) = self.gh.add_label(number, LIVE_LABEL).await {
            return NotifyOutcome {
                number,
                action: "failed".to_string(),
                detail: Some(e.to_string()),
            };
        }
        if let Err(e) = self.gh.comment(number, &comment).await {
            return NotifyOutcome {
                number,
                action: "failed".to_string(),
                detail: Some(format!("labelled but comment failed: {e}")),
            };
        }
        NotifyOutcome {
            number,
            action: "notified".to_string(),
            detail: None,
        }
    }
}
