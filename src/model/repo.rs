use super::build::{BuildResult, BuildTrigger};
use super::pull_request::PullRequest;
use super::state::{Mergeable, PullRequestStatus};
use crate::config::RepositoryConfig;
use std::cmp::Reverse;
use std::collections::HashMap;

/// In-memory registry of every tracked pull request for one repository, plus that repository's
/// configuration. Exactly one [`crate::supervisor::Supervisor`] owns a `RepoModel`, so no
/// intra-repository locking is required.
pub struct RepoModel {
    pub owner: String,
    pub repo: String,
    pub config: RepositoryConfig,
    pulls: HashMap<u64, PullRequest>,
    build_results: HashMap<(u64, String), BuildResult>,
    mergeability: HashMap<u64, Mergeable>,
    triggers: HashMap<String, BuildTrigger>,
    /// The constituent pull-request ids of the rollup currently being tested, if any.
    pub active_rollup: Option<Vec<u64>>,
}

impl RepoModel {
    pub fn new(owner: String, repo: String, config: RepositoryConfig) -> Self {
        Self {
            owner,
            repo,
            config,
            pulls: HashMap::new(),
            build_results: HashMap::new(),
            mergeability: HashMap::new(),
            triggers: HashMap::new(),
            active_rollup: None,
        }
    }

    pub fn get(&self, num: u64) -> Option<&PullRequest> {
        self.pulls.get(&num)
    }

    pub fn get_mut(&mut self, num: u64) -> Option<&mut PullRequest> {
        self.pulls.get_mut(&num)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PullRequest> {
        self.pulls.values()
    }

    /// A pull request is created in the Model on the first host event that mentions it.
    /// Returns the existing record if one is already tracked.
    pub fn upsert(&mut self, pull: PullRequest) -> &mut PullRequest {
        self.pulls.entry(pull.num).or_insert(pull)
    }

    /// Removed when closed, merged, or its head ref is deleted.
    pub fn remove(&mut self, num: u64) -> Option<PullRequest> {
        self.build_results.retain(|(n, _), _| *n != num);
        self.mergeability.remove(&num);
        self.pulls.remove(&num)
    }

    pub fn len(&self) -> usize {
        self.pulls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulls.is_empty()
    }

    /// Invariant: at most one pull request in `Testing` at a time.
    pub fn testing_pull(&self) -> Option<&PullRequest> {
        let mut found = None;
        for pull in self.pulls.values() {
            if pull.status == PullRequestStatus::Testing {
                debug_assert!(found.is_none(), "more than one pull request in Testing");
                found = Some(pull);
            }
        }
        found
    }

    pub fn set_mergeable(&mut self, num: u64, mergeable: Mergeable) {
        self.mergeability.insert(num, mergeable);
        if let Some(pull) = self.pulls.get_mut(&num) {
            pull.mergeable = mergeable;
        }
    }

    pub fn clear_mergeable(&mut self, num: u64) {
        self.mergeability.remove(&num);
        if let Some(pull) = self.pulls.get_mut(&num) {
            pull.mergeable = Mergeable::Unknown;
        }
    }

    pub fn record_build_result(&mut self, result: BuildResult) {
        self.build_results
            .insert((result.num, result.builder.clone()), result);
    }

    /// Build results for `num` whose SHA matches the pull request's current integration SHA
    /// (the stale-callback rule: a result for a superseded SHA is ignored).
    pub fn fresh_build_results(&self, num: u64) -> Vec<&BuildResult> {
        let current_sha = match self.pulls.get(&num).and_then(|p| p.integration_sha.as_deref()) {
            Some(sha) => sha,
            None => return Vec::new(),
        };
        self.build_results
            .iter()
            .filter(|((n, _), result)| *n == num && result.integration_sha == current_sha)
            .map(|(_, result)| result)
            .collect()
    }

    pub fn record_trigger(&mut self, branch: String, requested_sha: String, produced_sha: String) {
        match self.triggers.get_mut(&requested_sha) {
            Some(trigger) => trigger.increment(),
            None => {
                let trigger = BuildTrigger::new(branch, requested_sha.clone(), produced_sha);
                self.triggers.insert(requested_sha, trigger);
            }
        }
    }

    pub fn trigger(&self, requested_sha: &str) -> Option<&BuildTrigger> {
        self.triggers.get(requested_sha)
    }

    /// Rehydrates a freshly constructed `RepoModel` from a full store load, filtered down to
    /// this repository's rows. Called once at startup before a supervisor starts draining its
    /// event queue.
    pub fn rehydrate(&mut self, loaded: &crate::store::LoadedState) {
        for pull in &loaded.pulls {
            if pull.owner == self.owner && pull.repo == self.repo {
                self.upsert(pull.clone());
            }
        }
        for result in &loaded.build_results {
            if result.owner == self.owner && result.repo == self.repo {
                self.record_build_result(BuildResult {
                    owner: result.owner.clone(),
                    repo: result.repo.clone(),
                    num: result.num,
                    builder: result.builder.clone(),
                    verdict: result.verdict.clone(),
                    url: result.url.clone(),
                    integration_sha: result.integration_sha.clone(),
                });
            }
        }
    }

    /// Derived view used by the Scheduler: every `Approved` pull request, ordered by (a) `try`
    /// first, (b) higher priority first, (c) non-`rollup` first within a priority tier, (d)
    /// lower pull-request id first. Ties are broken deterministically by id.
    pub fn candidates_sorted(&self) -> Vec<&PullRequest> {
        let mut candidates: Vec<&PullRequest> = self
            .pulls
            .values()
            .filter(|p| p.status.is_queued())
            .collect();
        candidates.sort_by_key(|p| QueueKey::from(*p));
        candidates
    }
}

/// A sortable projection of the fields the queue orders by. Field declaration order matches
/// the tie-breaking order exactly, so the derived `Ord` does the right thing under a plain
/// ascending sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    try_rank: u8,
    priority: Reverse<i64>,
    rollup_rank: u8,
    num: u64,
}

impl From<&PullRequest> for QueueKey {
    fn from(pull: &PullRequest) -> Self {
        Self {
            try_rank: if pull.try_ { 0 } else { 1 },
            priority: Reverse(pull.priority),
            rollup_rank: if pull.rollup { 1 } else { 0 },
            num: pull.num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::pull_request::PullRequest;

    fn make(num: u64, priority: i64, rollup: bool, try_: bool) -> PullRequest {
        let mut pull = PullRequest::new(
            "o".into(),
            "r".into(),
            num,
            "t".into(),
            "sha".into(),
            "head".into(),
            "base".into(),
        );
        pull.priority = priority;
        pull.rollup = rollup;
        pull.try_ = try_;
        pull.status = PullRequestStatus::Approved;
        pull.approved_by = Some("alice".into());
        pull
    }

    fn model_with(pulls: Vec<PullRequest>) -> RepoModel {
        let mut model = RepoModel::new("o".into(), "r".into(), repository_config_stub());
        for pull in pulls {
            model.upsert(pull);
        }
        model
    }

    fn repository_config_stub() -> RepositoryConfig {
        RepositoryConfig {
            name: "o/r".into(),
            reviewers: vec![],
            admins: vec![],
            required_builders: vec!["ci".into()],
            integration_branch: "auto".into(),
            protected_branch: "master".into(),
            rollup_cap: 10,
            bisect_on_rollup: false,
            ci: Default::default(),
        }
    }

    #[test]
    fn try_wins_over_everything() {
        let model = model_with(vec![make(1, 10, false, false), make(2, 0, false, true)]);
        let candidates = model.candidates_sorted();
        assert_eq!(candidates[0].num, 2);
    }

    #[test]
    fn higher_priority_wins_when_no_try() {
        let model = model_with(vec![make(7, 0, false, false), make(8, 5, false, false)]);
        let candidates = model.candidates_sorted();
        assert_eq!(candidates[0].num, 8);
    }

    #[test]
    fn already_testing_pr_does_not_block_new_higher_priority_arrival_from_sorting() {
        // Ordering itself doesn't know about "already testing" - that's the Scheduler's job
        // (it only looks at the queue once nothing is Testing).
        let model = model_with(vec![make(9, 0, false, false), make(10, 5, false, false)]);
        let candidates = model.candidates_sorted();
        assert_eq!(candidates[0].num, 10);
    }

    #[test]
    fn rollup_breaks_ties_within_same_priority() {
        let model = model_with(vec![make(9, 0, false, false), make(10, 0, true, false)]);
        let candidates = model.candidates_sorted();
        assert_eq!(candidates[0].num, 9);
    }

    #[test]
    fn lower_id_breaks_remaining_ties() {
        let model = model_with(vec![make(10, 0, false, false), make(9, 0, false, false)]);
        let candidates = model.candidates_sorted();
        assert_eq!(candidates[0].num, 9);
    }
}
