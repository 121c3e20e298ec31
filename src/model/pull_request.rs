use super::state::{Mergeable, PullRequestStatus};
use thiserror::Error;

/// The tracked unit of work. `try_` and `body`/`assignee` use `Option` rather than empty
/// strings so "unset" is unrepresentable as a valid value.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub owner: String,
    pub repo: String,
    pub num: u64,
    pub title: String,
    pub body: Option<String>,
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
    pub assignee: Option<String>,
    pub approved_by: Option<String>,
    pub priority: i64,
    pub rollup: bool,
    pub try_: bool,
    pub mergeable: Mergeable,
    pub status: PullRequestStatus,
    pub integration_sha: Option<String>,
    pub build_url: Option<String>,
    /// Identity granted approval authority over this pull request beyond the repository's
    /// configured reviewer list, via `delegate=USER`/`delegate+`.
    pub delegate: Option<String>,
    /// Bumped on every transition so async callbacks racing a newer transition can recognize
    /// themselves as stale even when the integration SHA happens to coincide.
    pub revision: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvariantError {
    #[error("cannot approve a pull request without setting an approver")]
    ApprovalWithoutApprover,

    #[error("rollup and try cannot both be set on pull request #{0}")]
    RollupAndTry(u64),

    #[error("pull request #{0} entered Testing without an integration sha")]
    TestingWithoutIntegrationSha(u64),
}

impl PullRequest {
    pub fn new(owner: String, repo: String, num: u64, title: String, head_sha: String, head_ref: String, base_ref: String) -> Self {
        Self {
            owner,
            repo,
            num,
            title,
            body: None,
            head_sha,
            head_ref,
            base_ref,
            assignee: None,
            approved_by: None,
            priority: 0,
            rollup: false,
            try_: false,
            mergeable: Mergeable::Unknown,
            status: PullRequestStatus::Pending,
            integration_sha: None,
            build_url: None,
            delegate: None,
            revision: 0,
        }
    }

    pub fn set_delegate(&mut self, user: Option<String>) {
        self.delegate = user;
    }

    /// Whether `login` may issue approval/priority commands on this pull request: a
    /// configured reviewer/admin, or the holder of an active delegation.
    pub fn is_authorized(&self, login: &str, config: &crate::config::RepositoryConfig) -> bool {
        config.is_reviewer(login) || self.delegate.as_deref() == Some(login)
    }

    pub fn bump_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn approve(&mut self, approver: String) -> Result<(), InvariantError> {
        if approver.is_empty() {
            return Err(InvariantError::ApprovalWithoutApprover);
        }
        self.approved_by = Some(approver);
        self.status = PullRequestStatus::Approved;
        self.bump_revision();
        Ok(())
    }

    pub fn unapprove(&mut self) {
        self.approved_by = None;
        self.status = PullRequestStatus::Pending;
        self.bump_revision();
    }

    /// A push to the head ref that changes the head SHA invalidates an existing approval and
    /// resets a Testing pull request back to Pending, discarding any in-flight
    /// build result for the prior SHA (the stale-callback rule is enforced by the revision
    /// bump, not by this method).
    pub fn on_head_changed(&mut self, new_head_sha: String) {
        self.head_sha = new_head_sha;
        self.approved_by = None;
        self.integration_sha = None;
        self.mergeable = Mergeable::Unknown;
        self.status = PullRequestStatus::Pending;
        self.bump_revision();
    }

    pub fn set_rollup(&mut self, rollup: bool) {
        self.rollup = rollup;
        if rollup {
            self.try_ = false;
        }
    }

    pub fn set_try(&mut self, try_: bool) {
        self.try_ = try_;
        if try_ {
            self.rollup = false;
        }
    }

    pub fn set_priority(&mut self, priority: i64) {
        self.priority = priority;
    }

    pub fn begin_testing(&mut self, integration_sha: String) -> Result<(), InvariantError> {
        if integration_sha.is_empty() {
            return Err(InvariantError::TestingWithoutIntegrationSha(self.num));
        }
        self.integration_sha = Some(integration_sha);
        self.status = PullRequestStatus::Testing;
        self.bump_revision();
        Ok(())
    }

    pub fn mark_success(&mut self) {
        self.status = PullRequestStatus::Success;
        self.bump_revision();
    }

    pub fn mark_failure(&mut self) {
        self.status = PullRequestStatus::Failure;
        self.bump_revision();
    }

    pub fn mark_error(&mut self) {
        self.status = PullRequestStatus::Error;
        self.bump_revision();
    }

    /// `retry`/`unapprove` commands and the administrative `force` command all return a pull
    /// request to `Pending` regardless of its current state.
    pub fn reset_to_pending(&mut self) {
        self.status = PullRequestStatus::Pending;
        self.integration_sha = None;
        self.build_url = None;
        self.bump_revision();
    }

    /// Returns a pull request to `Approved` without disturbing its approver: used when a
    /// fast-forward loses a race, or when a rollup member is re-queued after another member
    /// is blamed for the rollup's failure.
    pub fn return_to_queue(&mut self) {
        self.status = PullRequestStatus::Approved;
        self.integration_sha = None;
        self.build_url = None;
        self.bump_revision();
    }

    /// `try` builds never merge: on completion (success or failure) the pull request reports
    /// its build URL and reverts to whatever state it held before the try build started.
    pub fn complete_try(&mut self, build_url: Option<String>) {
        self.status = if self.approved_by.is_some() {
            PullRequestStatus::Approved
        } else {
            PullRequestStatus::Pending
        };
        self.integration_sha = None;
        self.build_url = build_url;
        self.bump_revision();
    }

    /// `retry`: only valid from `Failure`/`Error`.
    pub fn retry(&mut self) -> bool {
        match self.status {
            PullRequestStatus::Failure | PullRequestStatus::Error => {
                self.status = PullRequestStatus::Approved;
                self.bump_revision();
                true
            }
            _ => false,
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        if self.rollup && self.try_ {
            return Err(InvariantError::RollupAndTry(self.num));
        }
        if matches!(self.status, PullRequestStatus::Approved) && self.approved_by.is_none() {
            return Err(InvariantError::ApprovalWithoutApprover);
        }
        if matches!(self.status, PullRequestStatus::Testing) && self.integration_sha.is_none() {
            return Err(InvariantError::TestingWithoutIntegrationSha(self.num));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr() -> PullRequest {
        PullRequest::new(
            "owner".into(),
            "repo".into(),
            1,
            "title".into(),
            "abc".into(),
            "feature".into(),
            "master".into(),
        )
    }

    #[test]
    fn approve_sets_status_and_approver() {
        let mut pull = pr();
        pull.approve("alice".into()).unwrap();
        assert_eq!(pull.status, PullRequestStatus::Approved);
        assert_eq!(pull.approved_by.as_deref(), Some("alice"));
    }

    #[test]
    fn head_change_invalidates_approval() {
        let mut pull = pr();
        pull.approve("alice".into()).unwrap();
        pull.begin_testing("deadbeef".into()).unwrap();
        pull.on_head_changed("newsha".into());
        assert_eq!(pull.status, PullRequestStatus::Pending);
        assert!(pull.approved_by.is_none());
        assert!(pull.integration_sha.is_none());
    }

    #[test]
    fn rollup_and_try_are_mutually_exclusive() {
        let mut pull = pr();
        pull.set_rollup(true);
        pull.set_try(true);
        assert!(pull.rollup == false && pull.try_);
        pull.check_invariants().unwrap();
    }

    #[test]
    fn retry_only_from_failure_or_error() {
        let mut pull = pr();
        assert!(!pull.retry());
        pull.mark_failure();
        assert!(pull.retry());
        assert_eq!(pull.status, PullRequestStatus::Approved);
    }
}
