//! The Scheduler: picks the next approved pull request to build, constructs the integration
//! commit, and reacts to build results and host feedback. Stateless across ticks; all state
//! lives in the [`RepoModel`] the supervisor hands it.

use crate::ci::{BuildVerdict, CiCallback};
use crate::error::ErrorKind;
use crate::github::{GithubClient, StatusEventState};
use crate::model::{BuildResult, PullRequest, RepoModel};
use crate::store::Store;
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] crate::client::Error),

    #[error(transparent)]
    Store(#[from] crate::store::Error),

    #[error("pull request #{0} violated an invariant: {1}")]
    Invariant(u64, #[source] crate::model::InvariantError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Client(e) if e.too_many_requests() || e.server_error() => ErrorKind::TransientIO,
            Error::Client(_) => ErrorKind::HostRefusal,
            Error::Store(_) | Error::Invariant(..) => ErrorKind::InternalInvariant,
        }
    }
}

pub struct Scheduler {
    github: Arc<dyn GithubClient>,
    store: Arc<dyn Store>,
}

impl Scheduler {
    pub fn new(github: Arc<dyn GithubClient>, store: Arc<dyn Store>) -> Self {
        Self { github, store }
    }

    /// Runs one scheduling pass. Call after every Model mutation, build result, or timer tick;
    /// a no-op if something is already `Testing`.
    pub async fn tick(&self, model: &mut RepoModel) -> Result<(), Error> {
        if model.testing_pull().is_some() {
            return Ok(());
        }

        let candidates = model.candidates_sorted();
        let top = match candidates.first() {
            Some(top) => *top,
            None => return Ok(()),
        };

        if top.try_ {
            let num = top.num;
            info!("{}/{}: starting try build for #{}", model.owner, model.repo, num);
            return self.start_build(model, &[num]).await;
        }

        let cap = model.config.rollup_cap;
        let rollup_nums: Vec<u64> = candidates
            .iter()
            .take_while(|p| p.rollup)
            .take(cap)
            .map(|p| p.num)
            .collect();

        if rollup_nums.is_empty() {
            let num = top.num;
            info!("{}/{}: starting build for #{}", model.owner, model.repo, num);
            self.start_build(model, &[num]).await
        } else {
            info!(
                "{}/{}: starting rollup build for {:?}",
                model.owner, model.repo, rollup_nums
            );
            self.start_build(model, &rollup_nums).await
        }
    }

    /// Builds the integration commit for `nums` (one pull request, or a rollup's constituents
    /// in queue order), pushes it to the integration branch, and transitions every constituent
    /// to `Testing`.
    async fn start_build(&self, model: &mut RepoModel, nums: &[u64]) -> Result<(), Error> {
        let owner = model.owner.clone();
        let repo = model.repo.clone();
        let protected_branch = model.config.protected_branch.clone();
        let integration_branch = model.config.integration_branch.clone();

        let mut base_ref = protected_branch;
        let mut integration_sha = String::new();
        for &num in nums {
            let pull = model.get(num).expect("scheduled candidate vanished from model");
            let message = commit_message(pull, nums.len() > 1);
            let merge = self
                .github
                .create_merge(&owner, &repo, &base_ref, &pull.head_sha, &message)
                .await?;
            self.github
                .push_branch(&owner, &repo, &integration_branch, &merge.sha)
                .await?;
            integration_sha = merge.sha;
            base_ref = integration_branch.clone();
        }

        self.store
            .record_trigger(&integration_branch, &integration_sha, &integration_sha)
            .await?;
        model.record_trigger(integration_branch, integration_sha.clone(), integration_sha.clone());

        model.active_rollup = if nums.len() > 1 { Some(nums.to_vec()) } else { None };

        for &num in nums {
            let pull = model.get_mut(num).expect("scheduled candidate vanished from model");
            pull.begin_testing(integration_sha.clone())
                .map_err(|e| Error::Invariant(num, e))?;
            let snapshot = pull.clone();
            self.store.upsert_pull(&snapshot).await?;
        }
        Ok(())
    }

    /// Applies an incoming CI callback: records the build result against every pull request
    /// still building at that SHA (the stale-callback rule discards the rest implicitly, since
    /// a pull request whose integration SHA has moved on no longer matches).
    pub async fn handle_build_result(&self, model: &mut RepoModel, callback: CiCallback) -> Result<(), Error> {
        let nums: Vec<u64> = model
            .iter()
            .filter(|p| p.integration_sha.as_deref() == Some(callback.sha.as_str()))
            .map(|p| p.num)
            .collect();
        if nums.is_empty() {
            warn!(
                "{}/{}: discarding stale build callback for {} ({})",
                model.owner, model.repo, callback.sha, callback.builder
            );
            return Ok(());
        }

        for &num in &nums {
            model.record_build_result(BuildResult {
                owner: model.owner.clone(),
                repo: model.repo.clone(),
                num,
                builder: callback.builder.clone(),
                verdict: callback.verdict.clone(),
                url: callback.url.clone(),
                integration_sha: callback.sha.clone(),
            });
            self.store
                .record_build(
                    &model.owner,
                    &model.repo,
                    num,
                    &callback.builder,
                    callback.verdict.clone(),
                    callback.url.as_deref(),
                    &callback.sha,
                )
                .await?;
        }

        match callback.verdict {
            BuildVerdict::InProgress => Ok(()),
            BuildVerdict::Failure => self.on_failure(model, &nums).await,
            BuildVerdict::Success => self.on_maybe_success(model, &nums, &callback.sha).await,
        }
    }

    async fn on_failure(&self, model: &mut RepoModel, nums: &[u64]) -> Result<(), Error> {
        let bisect = model.config.bisect_on_rollup;
        for (i, &num) in nums.iter().enumerate() {
            let pull = match model.get(num) {
                Some(pull) => pull,
                None => continue,
            };
            if pull.try_ {
                let build_url = pull.build_url.clone();
                let pull = model.get_mut(num).unwrap();
                pull.complete_try(build_url);
            } else if nums.len() > 1 && bisect && i > 0 {
                model.get_mut(num).unwrap().return_to_queue();
            } else {
                model.get_mut(num).unwrap().mark_failure();
            }
            let snapshot = model.get(num).unwrap().clone();
            self.store.upsert_pull(&snapshot).await?;
        }
        model.active_rollup = None;
        Ok(())
    }

    async fn on_maybe_success(&self, model: &mut RepoModel, nums: &[u64], integration_sha: &str) -> Result<(), Error> {
        let required = model.config.required_builders.clone();
        let all_green = required.iter().all(|builder| {
            model
                .fresh_build_results(nums[0])
                .iter()
                .any(|r| &r.builder == builder && r.verdict == BuildVerdict::Success)
        });
        if !all_green {
            return Ok(());
        }

        if model.get(nums[0]).map(|p| p.try_).unwrap_or(false) {
            let pull = model.get_mut(nums[0]).unwrap();
            let build_url = pull.build_url.clone();
            pull.complete_try(build_url);
            let snapshot = model.get(nums[0]).unwrap().clone();
            self.store.upsert_pull(&snapshot).await?;
            return Ok(());
        }

        let protected_branch = model.config.protected_branch.clone();
        match self
            .github
            .fast_forward(&model.owner, &model.repo, &protected_branch, integration_sha)
            .await
        {
            Ok(()) => {
                for &num in nums {
                    model.get_mut(num).unwrap().mark_success();
                    let snapshot = model.get(num).unwrap().clone();
                    self.store.upsert_pull(&snapshot).await?;
                    self.github
                        .set_status(
                            &model.owner,
                            &model.repo,
                            integration_sha,
                            StatusEventState::Success,
                            None,
                            "homu",
                        )
                        .await?;
                }
                model.active_rollup = None;
                Ok(())
            }
            Err(e) if e.conflict() || e.unprocessable_entity() => {
                info!(
                    "{}/{}: fast-forward of {} lost a race, re-queueing",
                    model.owner, model.repo, integration_sha
                );
                for &num in nums {
                    model.get_mut(num).unwrap().return_to_queue();
                    let snapshot = model.get(num).unwrap().clone();
                    self.store.upsert_pull(&snapshot).await?;
                }
                model.active_rollup = None;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn commit_message(pull: &PullRequest, rollup: bool) -> String {
    let approver = pull.approved_by.as_deref().unwrap_or("unknown");
    let kind = if rollup { "Rollup merge" } else { "Auto merge" };
    format!(
        "{} of #{} - {}, r={}\n\n{}",
        kind, pull.num, pull.head_ref, approver, pull.title
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::github::{Comment, MergeCommit, PullRequest as WirePullRequest, PullRequestIdentifier};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn repository_config_stub() -> RepositoryConfig {
        toml_like_config()
    }

    fn toml_like_config() -> RepositoryConfig {
        RepositoryConfig {
            name: "owner/repo".into(),
            reviewers: vec!["alice".into()],
            admins: vec![],
            required_builders: vec!["ci".into()],
            integration_branch: "auto".into(),
            protected_branch: "master".into(),
            rollup_cap: 10,
            bisect_on_rollup: false,
            ci: Default::default(),
        }
    }

    struct FakeGithub {
        merges: Mutex<Vec<(String, String)>>,
        fast_forward_result: Mutex<Result<(), crate::client::Error>>,
    }

    impl FakeGithub {
        fn new() -> Self {
            Self {
                merges: Mutex::new(Vec::new()),
                fast_forward_result: Mutex::new(Ok(())),
            }
        }
    }

    #[async_trait]
    impl GithubClient for FakeGithub {
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
            base_ref: &str,
            head_sha: &str,
            _commit_message: &str,
        ) -> crate::client::Result<crate::github::MergeCommit> {
            self.merges.lock().unwrap().push((base_ref.into(), head_sha.into()));
            Ok(MergeCommit {
                sha: format!("merged-{}", head_sha),
            })
        }

        async fn push_branch(&self, _owner: &str, _repo: &str, _branch: &str, _sha: &str) -> crate::client::Result<()> {
            Ok(())
        }

        async fn fast_forward(&self, _owner: &str, _repo: &str, _branch: &str, _sha: &str) -> crate::client::Result<()> {
            let mut result = self.fast_forward_result.lock().unwrap();
            std::mem::replace(&mut *result, Ok(()))
        }

        async fn set_status(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
            _state: crate::github::StatusEventState,
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
            _verdict: BuildVerdict,
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

    fn approved_pull(num: u64, priority: i64) -> PullRequest {
        let mut pull = PullRequest::new(
            "owner".into(),
            "repo".into(),
            num,
            "title".into(),
            "headsha".into(),
            "feature".into(),
            "master".into(),
        );
        pull.approve("alice".into()).unwrap();
        pull.set_priority(priority);
        pull
    }

    #[tokio::test]
    async fn picks_highest_priority_candidate_and_begins_testing() {
        let mut model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        model.upsert(approved_pull(1, 0));
        model.upsert(approved_pull(2, 5));

        let github = Arc::new(FakeGithub::new());
        let scheduler = Scheduler::new(github.clone(), Arc::new(NullStore));
        scheduler.tick(&mut model).await.unwrap();

        assert!(model.testing_pull().is_some());
        assert_eq!(model.testing_pull().unwrap().num, 2);
    }

    #[tokio::test]
    async fn does_nothing_while_something_is_testing() {
        let mut model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        let mut testing = approved_pull(1, 0);
        testing.begin_testing("abc".into()).unwrap();
        model.upsert(testing);
        model.upsert(approved_pull(2, 10));

        let github = Arc::new(FakeGithub::new());
        let scheduler = Scheduler::new(github, Arc::new(NullStore));
        scheduler.tick(&mut model).await.unwrap();

        assert_eq!(model.get(2).unwrap().status, crate::model::PullRequestStatus::Approved);
    }

    #[tokio::test]
    async fn success_on_every_required_builder_fast_forwards_and_marks_success() {
        let mut model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        let mut pull = approved_pull(1, 0);
        pull.begin_testing("deadbeef".into()).unwrap();
        model.upsert(pull);

        let github = Arc::new(FakeGithub::new());
        let scheduler = Scheduler::new(github, Arc::new(NullStore));
        let callback = CiCallback {
            owner: "owner".into(),
            repo: "repo".into(),
            builder: "ci".into(),
            sha: "deadbeef".into(),
            verdict: BuildVerdict::Success,
            url: None,
        };
        scheduler.handle_build_result(&mut model, callback).await.unwrap();

        assert_eq!(model.get(1).unwrap().status, crate::model::PullRequestStatus::Success);
    }

    #[tokio::test]
    async fn stale_callback_for_superseded_sha_is_discarded() {
        let mut model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        let mut pull = approved_pull(1, 0);
        pull.begin_testing("deadbeef".into()).unwrap();
        pull.on_head_changed("newsha".into());
        model.upsert(pull);

        let github = Arc::new(FakeGithub::new());
        let scheduler = Scheduler::new(github, Arc::new(NullStore));
        let callback = CiCallback {
            owner: "owner".into(),
            repo: "repo".into(),
            builder: "ci".into(),
            sha: "deadbeef".into(),
            verdict: BuildVerdict::Success,
            url: None,
        };
        scheduler.handle_build_result(&mut model, callback).await.unwrap();

        assert_eq!(model.get(1).unwrap().status, crate::model::PullRequestStatus::Pending);
    }

    #[tokio::test]
    async fn fast_forward_conflict_returns_pull_to_the_queue() {
        let mut model = RepoModel::new("owner".into(), "repo".into(), repository_config_stub());
        let mut pull = approved_pull(1, 0);
        pull.begin_testing("deadbeef".into()).unwrap();
        model.upsert(pull);

        let github = Arc::new(FakeGithub::new());
        *github.fast_forward_result.lock().unwrap() = Err(crate::client::Error::Http(reqwest::StatusCode::CONFLICT));
        let scheduler = Scheduler::new(github, Arc::new(NullStore));
        let callback = CiCallback {
            owner: "owner".into(),
            repo: "repo".into(),
            builder: "ci".into(),
            sha: "deadbeef".into(),
            verdict: BuildVerdict::Success,
            url: None,
        };
        scheduler.handle_build_result(&mut model, callback).await.unwrap();

        assert_eq!(model.get(1).unwrap().status, crate::model::PullRequestStatus::Approved);
        assert!(model.get(1).unwrap().integration_sha.is_none());
    }
}
