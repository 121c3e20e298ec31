//! Per-repository supervisor: the sole owner of one [`RepoModel`]. Drains that repository's
//! event queue in arrival order, applies host/CI events and authorized comment commands, writes
//! every mutation through to the [`Store`], and runs the [`Scheduler`] after each event so a
//! newly eligible pull request is picked up without a separate poll loop.

use crate::error::ErrorKind;
use crate::event::Event;
use crate::github::GithubClient;
use crate::model::{PullRequest, RepoModel};
use crate::parser::{self, Command};
use crate::scheduler::Scheduler;
use crate::store::Store;
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] crate::client::Error),

    #[error(transparent)]
    Store(#[from] crate::store::Error),

    #[error(transparent)]
    Parser(#[from] crate::parser::Error),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Client(e) if e.too_many_requests() || e.server_error() => ErrorKind::TransientIO,
            Error::Client(_) => ErrorKind::HostRefusal,
            Error::Parser(_) => ErrorKind::BadCommand,
            Error::Scheduler(e) => e.kind(),
            Error::Store(_) => ErrorKind::InternalInvariant,
        }
    }
}

pub struct Supervisor {
    model: RepoModel,
    store: Arc<dyn Store>,
    scheduler: Scheduler,
    trigger_token: String,
    events: Receiver<Event>,
}

impl Supervisor {
    pub fn new(
        model: RepoModel,
        github: Arc<dyn GithubClient>,
        store: Arc<dyn Store>,
        trigger_token: String,
        events: Receiver<Event>,
    ) -> Self {
        let scheduler = Scheduler::new(github, store.clone());
        Self {
            model,
            store,
            scheduler,
            trigger_token,
            events,
        }
    }

    /// Runs until the queue's sender side is dropped, which happens only at host shutdown.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if let Err(e) = self.handle(event).await {
                warn!(
                    "{}/{}: error handling event: {} ({:?})",
                    self.model.owner,
                    self.model.repo,
                    e,
                    e.kind()
                );
            }
        }
        info!("{}/{}: event queue closed, supervisor exiting", self.model.owner, self.model.repo);
    }

    async fn handle(&mut self, event: Event) -> Result<(), Error> {
        match event {
            Event::PullRequestOpened {
                num,
                title,
                body,
                head_sha,
                head_ref,
                base_ref,
                author,
            } => {
                let mut pull = PullRequest::new(
                    self.model.owner.clone(),
                    self.model.repo.clone(),
                    num,
                    title,
                    head_sha,
                    head_ref,
                    base_ref,
                );
                pull.body = body;
                pull.assignee = Some(author);
                self.model.upsert(pull);
                self.persist(num).await?;
            }
            Event::PullRequestClosed { num } => {
                self.model.remove(num);
                self.store.delete_pull(&self.model.owner, &self.model.repo, num).await?;
            }
            Event::PullRequestSynchronized { num, new_head_sha } => {
                if let Some(pull) = self.model.get_mut(num) {
                    pull.on_head_changed(new_head_sha);
                    self.persist(num).await?;
                }
            }
            Event::Comment { num, commenter, body } => {
                self.handle_comment(num, &commenter, &body).await?;
            }
            Event::PushToBranch { branch, sha } => {
                // Pushes to the integration/protected branches originate from our own merges
                // and pushes to a pull request's head arrive as `PullRequestSynchronized`
                // instead; this is purely an observability hook.
                info!("{}/{}: observed push to {} at {}", self.model.owner, self.model.repo, branch, sha);
            }
            Event::BuildStatus(callback) => {
                self.scheduler.handle_build_result(&mut self.model, callback).await?;
            }
        }
        self.scheduler.tick(&mut self.model).await?;
        Ok(())
    }

    async fn handle_comment(&mut self, num: u64, commenter: &str, body: &str) -> Result<(), Error> {
        let parsed = match parser::parse(&self.trigger_token, commenter, body)? {
            Some(parsed) => parsed,
            None => return Ok(()),
        };
        for command in parsed.commands {
            self.apply_command(num, commenter, command).await?;
        }
        Ok(())
    }

    async fn apply_command(&mut self, num: u64, commenter: &str, command: Command) -> Result<(), Error> {
        if command.requires_admin() && !self.model.config.is_admin(commenter) {
            warn!(
                "{}/{}: #{}: {} is not an admin, ignoring {:?}",
                self.model.owner, self.model.repo, num, commenter, command
            );
            return Ok(());
        }

        if command.requires_authorization() {
            let config = &self.model.config;
            let authorized = match self.model.get(num) {
                Some(pull) => pull.is_authorized(commenter, config),
                None => config.is_reviewer(commenter),
            };
            if !authorized {
                warn!(
                    "{}/{}: #{}: {} is not authorized, ignoring {:?}",
                    self.model.owner, self.model.repo, num, commenter, command
                );
                return Ok(());
            }
        }

        if matches!(command, Command::Clean) {
            self.model.clear_mergeable(num);
            self.persist(num).await?;
            return Ok(());
        }

        let pull = match self.model.get_mut(num) {
            Some(pull) => pull,
            None => return Ok(()),
        };
        match command {
            Command::ApproveSelf { expected_sha } => Self::try_approve(pull, commenter.to_string(), expected_sha),
            Command::ApproveAs { user, expected_sha } => Self::try_approve(pull, user, expected_sha),
            Command::Unapprove => pull.unapprove(),
            Command::SetPriority(priority) => pull.set_priority(priority),
            Command::SetTry(enabled) => pull.set_try(enabled),
            Command::SetRollup(enabled) => pull.set_rollup(enabled),
            Command::Retry => {
                pull.retry();
            }
            Command::Force => pull.reset_to_pending(),
            Command::DelegateTo(user) => pull.set_delegate(Some(user)),
            Command::DelegateToAuthor => {
                let author = pull.assignee.clone();
                pull.set_delegate(author);
            }
            Command::DelegateRevoke => pull.set_delegate(None),
            Command::Clean => unreachable!("handled above"),
        }
        self.persist(num).await?;
        Ok(())
    }

    /// `r+`/`r=USER` may carry an expected head SHA; a mismatch means the commenter reviewed a
    /// version of the pull request that has since moved, so the approval is dropped silently
    /// rather than applied to a commit nobody saw.
    fn try_approve(pull: &mut PullRequest, approver: String, expected_sha: Option<String>) {
        if let Some(expected) = expected_sha {
            if expected != pull.head_sha {
                warn!("#{}: stale approval, expected {} but head is {}", pull.num, expected, pull.head_sha);
                return;
            }
        }
        if let Err(e) = pull.approve(approver) {
            warn!("#{}: approval rejected: {}", pull.num, e);
        }
    }

    async fn persist(&self, num: u64) -> Result<(), Error> {
        if let Some(pull) = self.model.get(num) {
            self.store.upsert_pull(pull).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::github::{Comment, MergeCommit, PullRequest as WirePullRequest, PullRequestIdentifier, StatusEventState};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    fn repository_config_stub() -> RepositoryConfig {
        RepositoryConfig {
            name: "owner/repo".into(),
            reviewers: vec!["alice".into()],
            admins: vec!["root-alice".into()],
            required_builders: vec!["ci".into()],
            integration_branch: "auto".into(),
            protected_branch: "master".into(),
            rollup_cap: 10,
            bisect_on_rollup: false,
            ci: Default::default(),
        }
    }

    struct NullGithub;

    #[async_trait]
    impl GithubClient for NullGithub {
        async fn get_pull_request(&self, _id: &PullRequestIdentifier) -> crate::client::Result<WirePullRequest> {
            unimplemented!()
        }
        async fn list_comments(&self, _id: &PullRequestIdentifier) -> crate::client::Result<Vec<Comment>> {
            Ok(vec![])
        }
        async fn post_comment(&self, _id: &PullRequestIdentifier, _body: &str) -> crate::client::Result<Comment> {
            unimplemented!()
        }
        async fn create_merge(
            &self,
            _owner: &str,
            _repo: &str,
            _base_ref: &str,
            head_sha: &str,
            _commit_message: &str,
        ) -> crate::client::Result<MergeCommit> {
            Ok(MergeCommit {
                sha: format!("merged-{}", head_sha),
            })
        }
        async fn push_branch(&self, _owner: &str, _repo: &str, _branch: &str, _sha: &str) -> crate::client::Result<()> {
            Ok(())
        }
        async fn fast_forward(&self, _owner: &str, _repo: &str, _branch: &str, _sha: &str) -> crate::client::Result<()> {
            Ok(())
        }
        async fn set_status(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
            _state: StatusEventState,
            _target_url: Option<&str>,
            _context: &str,
        ) -> crate::client::Result<()> {
            Ok(())
        }
    }

    struct NullStore;

    #[async_trait]
    impl Store for NullStore {
        async fn upsert_pull(&self, _pull: &PullRequest) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn delete_pull(&self, _owner: &str, _repo: &str, _num: u64) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn record_build(
            &self,
            _owner: &str,
            _repo: &str,
            _num: u64,
            _builder: &str,
            _verdict: crate::ci::BuildVerdict,
            _url: Option<&str>,
            _integration_sha: &str,
        ) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn set_mergeable(
            &self,
            _owner: &str,
            _repo: &str,
            _num: u64,
            _mergeable: crate::model::Mergeable,
        ) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn record_trigger(&self, _branch: &str, _requested_sha: &str, _produced_sha: &str) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn increment_trigger_count(&self, _requested_sha: &str) -> Result<(), crate::store::Error> {
            Ok(())
        }
        async fn load_all(&self) -> Result<crate::store::LoadedState, crate::store::Error> {
            Ok(Default::default())
        }
    }

    fn make_supervisor() -> (Supervisor, mpsc::Sender<Event>) {
        let model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        let (tx, rx) = mpsc::channel(16);
        let supervisor = Supervisor::new(model, Arc::new(NullGithub), Arc::new(NullStore), "@homu".into(), rx);
        (supervisor, tx)
    }

    #[tokio::test]
    async fn opened_then_approved_comment_marks_pull_approved() {
        let (mut supervisor, _tx) = make_supervisor();
        supervisor
            .handle(Event::PullRequestOpened {
                num: 1,
                title: "add feature".into(),
                body: None,
                head_sha: "abc123".into(),
                head_ref: "feature".into(),
                base_ref: "master".into(),
                author: "bob".into(),
            })
            .await
            .unwrap();
        supervisor
            .handle(Event::Comment {
                num: 1,
                commenter: "alice".into(),
                body: "@homu r+".into(),
            })
            .await
            .unwrap();

        let pull = supervisor.model.get(1).unwrap();
        assert_eq!(pull.status, crate::model::PullRequestStatus::Approved);
        assert_eq!(pull.approved_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unauthorized_commenter_is_ignored() {
        let (mut supervisor, _tx) = make_supervisor();
        supervisor
            .handle(Event::PullRequestOpened {
                num: 1,
                title: "add feature".into(),
                body: None,
                head_sha: "abc123".into(),
                head_ref: "feature".into(),
                base_ref: "master".into(),
                author: "bob".into(),
            })
            .await
            .unwrap();
        supervisor
            .handle(Event::Comment {
                num: 1,
                commenter: "mallory".into(),
                body: "@homu r+".into(),
            })
            .await
            .unwrap();

        let pull = supervisor.model.get(1).unwrap();
        assert_eq!(pull.status, crate::model::PullRequestStatus::Pending);
    }

    #[tokio::test]
    async fn stale_sha_approval_is_dropped() {
        let (mut supervisor, _tx) = make_supervisor();
        supervisor
            .handle(Event::PullRequestOpened {
                num: 1,
                title: "add feature".into(),
                body: None,
                head_sha: "abc123".into(),
                head_ref: "feature".into(),
                base_ref: "master".into(),
                author: "bob".into(),
            })
            .await
            .unwrap();
        supervisor
            .handle(Event::Comment {
                num: 1,
                commenter: "alice".into(),
                body: "@homu r+ deadbeef000".into(),
            })
            .await
            .unwrap();

        let pull = supervisor.model.get(1).unwrap();
        assert_eq!(pull.status, crate::model::PullRequestStatus::Pending);
    }

    #[tokio::test]
    async fn non_admin_cannot_force() {
        let (mut supervisor, _tx) = make_supervisor();
        supervisor
            .handle(Event::PullRequestOpened {
                num: 1,
                title: "add feature".into(),
                body: None,
                head_sha: "abc123".into(),
                head_ref: "feature".into(),
                base_ref: "master".into(),
                author: "bob".into(),
            })
            .await
            .unwrap();
        supervisor
            .handle(Event::Comment {
                num: 1,
                commenter: "alice".into(),
                body: "@homu force".into(),
            })
            .await
            .unwrap();

        // alice is a reviewer but not an admin, so `force` (admin-only) is ignored.
        let pull = supervisor.model.get(1).unwrap();
        assert_eq!(pull.status, crate::model::PullRequestStatus::Pending);
    }

    #[tokio::test]
    async fn closed_event_removes_the_pull_request() {
        let (mut supervisor, _tx) = make_supervisor();
        supervisor
            .handle(Event::PullRequestOpened {
                num: 1,
                title: "add feature".into(),
                body: None,
                head_sha: "abc123".into(),
                head_ref: "feature".into(),
                base_ref: "master".into(),
                author: "bob".into(),
            })
            .await
            .unwrap();
        supervisor.handle(Event::PullRequestClosed { num: 1 }).await.unwrap();

        assert!(supervisor.model.get(1).is_none());
    }
}
