//! The Store: a durable, upsert-by-natural-key log of every tracked entity. The Model is the
//! runtime source of truth; the Store is its write-through log, so restarts can rehydrate
//! without re-downloading everything from the host.

pub mod sqlite;

use crate::ci::BuildVerdict;
use crate::model::{Mergeable, PullRequest, PullRequestStatus};
use async_trait::async_trait;
use thiserror::Error;

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Sql(#[from] ::sqlx::Error),

    #[error("invalid persisted status: {0}")]
    InvalidStatus(String),

    #[error("invalid persisted mergeability: {0}")]
    InvalidMergeable(String),

    #[error("invalid persisted verdict: {0}")]
    InvalidVerdict(String),
}

/// A rehydrated snapshot of one persisted build result row (`build_res`).
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedBuildResult {
    pub owner: String,
    pub repo: String,
    pub num: u64,
    pub builder: String,
    pub verdict: BuildVerdict,
    pub url: Option<String>,
    pub integration_sha: String,
}

/// Everything a full reload yields, grouped by kind.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub pulls: Vec<PullRequest>,
    pub build_results: Vec<PersistedBuildResult>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_pull(&self, pull: &PullRequest) -> Result<(), Error>;

    async fn delete_pull(&self, owner: &str, repo: &str, num: u64) -> Result<(), Error>;

    async fn record_build(
        &self,
        owner: &str,
        repo: &str,
        num: u64,
        builder: &str,
        verdict: BuildVerdict,
        url: Option<&str>,
        integration_sha: &str,
    ) -> Result<(), Error>;

    async fn set_mergeable(&self, owner: &str, repo: &str, num: u64, mergeable: Mergeable) -> Result<(), Error>;

    async fn record_trigger(&self, branch: &str, requested_sha: &str, produced_sha: &str) -> Result<(), Error>;

    async fn increment_trigger_count(&self, requested_sha: &str) -> Result<(), Error>;

    /// Streams every persisted row so the Model can be rehydrated at startup.
    async fn load_all(&self) -> Result<LoadedState, Error>;
}

pub(crate) fn status_to_str(status: PullRequestStatus) -> &'static str {
    status.as_str()
}

pub(crate) fn status_from_str(value: &str) -> Result<PullRequestStatus, Error> {
    PullRequestStatus::parse(value).ok_or_else(|| Error::InvalidStatus(value.to_string()))
}

pub(crate) fn mergeable_to_str(mergeable: Mergeable) -> &'static str {
    mergeable.as_str()
}

pub(crate) fn mergeable_from_str(value: &str) -> Result<Mergeable, Error> {
    Mergeable::parse(value).ok_or_else(|| Error::InvalidMergeable(value.to_string()))
}

pub(crate) fn verdict_to_str(verdict: &BuildVerdict) -> &'static str {
    match verdict {
        BuildVerdict::Success => "success",
        BuildVerdict::Failure => "failure",
        BuildVerdict::InProgress => "pending",
    }
}

pub(crate) fn verdict_from_str(value: &str) -> Result<BuildVerdict, Error> {
    match value {
        "success" => Ok(BuildVerdict::Success),
        "failure" => Ok(BuildVerdict::Failure),
        "pending" => Ok(BuildVerdict::InProgress),
        other => Err(Error::InvalidVerdict(other.to_string())),
    }
}
