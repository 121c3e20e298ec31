use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum MergeableState {
    #[serde(rename = "behind")]
    Behind,

    #[serde(rename = "clean")]
    Clean,

    #[serde(rename = "dirty")]
    Dirty,

    #[serde(rename = "blocked")]
    Blocked,

    #[serde(rename = "unstable")]
    Unstable,

    #[serde(other, rename = "unknown")]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PullRequestState {
    #[serde(rename = "open")]
    Open,

    #[serde(rename = "closed")]
    Closed,

    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Link {
    pub href: String,
}

impl AsRef<str> for Link {
    fn as_ref(&self) -> &str {
        &self.href
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Links {
    pub statuses: Link,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub login: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ReviewState {
    #[serde(rename = "APPROVED")]
    Approved,

    #[serde(rename = "CHANGES_REQUESTED")]
    ChangesRequested,

    #[serde(rename = "COMMENTED")]
    Commented,

    #[serde(rename = "DISMISSED")]
    Dismissed,

    #[serde(rename = "PENDING")]
    Pending,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PullRequestReview {
    pub user: User,
    pub state: ReviewState,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Branch {
    pub sha: String,

    #[serde(rename = "ref")]
    pub name: String,

    pub repo: Repository,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,

    #[serde(rename = "mergeable_state")]
    pub mergeable_state: MergeableState,

    #[serde(rename = "_links")]
    pub links: Links,

    #[serde(rename = "user")]
    pub creator: User,

    pub assignee: Option<User>,

    pub state: PullRequestState,
    pub title: String,
    pub body: Option<String>,
    pub head: Branch,
    pub base: Branch,
    pub merged: bool,
    pub draft: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BranchProtection {
    #[serde(rename = "required_pull_request_reviews")]
    pub reviews: BranchProtectionReviews,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BranchProtectionReviews {
    #[serde(rename = "required_approving_review_count")]
    pub approvals: u32,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusState {
    #[serde(rename = "success")]
    Success,

    #[serde(rename = "failure")]
    Failure,

    #[serde(rename = "error")]
    Error,

    #[serde(rename = "pending")]
    Pending,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Status {
    pub context: String,
    pub state: StatusState,
    pub target_url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowRunConclusion {
    #[serde(rename = "success")]
    Success,

    #[serde(rename = "failure")]
    Failure,

    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowRun {
    pub id: u64,
    pub workflow_id: u64,
    pub name: String,
    pub head_sha: String,
    pub conclusion: Option<WorkflowRunConclusion>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ActionRuns {
    pub workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: u64,
    pub user: User,
    pub body: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum StatusEventState {
    #[serde(rename = "success")]
    Success,

    #[serde(rename = "failure")]
    Failure,

    #[serde(rename = "error")]
    Error,

    #[serde(rename = "pending")]
    Pending,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoBody {}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct PullRequestIdentifier {
    pub owner: String,
    pub repo: String,
    pub pull_number: u64,
}

impl PullRequestIdentifier {
    pub fn new<O, R>(owner: O, repo: R, pull_number: u64) -> Self
    where
        O: Into<String>,
        R: Into<String>,
    {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            pull_number,
        }
    }

    pub fn from_app_url(url: &str) -> Result<Self, UrlParseError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(r"^https://github.com/([\w_-]+)/([\w_-]+)/pull/([\d]+)$").unwrap();
        }
        if let Some(capture) = RE.captures_iter(url).next() {
            Ok(Self {
                owner: capture[1].into(),
                repo: capture[2].into(),
                pull_number: capture[3].parse().unwrap(),
            })
        } else {
            Err(UrlParseError::MalformedUrl)
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum UrlParseError {
    #[error("malformed URL")]
    MalformedUrl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_request_from_app_url() {
        let pr = PullRequestIdentifier::from_app_url("https://github.com/potato/smasher/pull/1337")
            .unwrap();
        assert_eq!(pr.owner, "potato");
        assert_eq!(pr.repo, "smasher");
        assert_eq!(pr.pull_number, 1337);

        assert!(
            PullRequestIdentifier::from_app_url("https://github.com/potato/smasher/pull/").is_err()
        );
        assert!(PullRequestIdentifier::from_app_url("https://github.com//smasher/pull/").is_err());
        assert!(
            PullRequestIdentifier::from_app_url("https://github.com/potato/pull/1337").is_err()
        );
    }
}
