use crate::ci::BuildVerdict;

/// Keyed by `(repo, pull-request id, builder name)`. A pull request is green
/// only when every required builder reports [`BuildVerdict::Success`] for the same
/// `integration_sha`; rows whose `integration_sha` doesn't match the pull request's current one
/// are stale and the Scheduler must ignore them (the stale-callback rule).
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub owner: String,
    pub repo: String,
    pub num: u64,
    pub builder: String,
    pub verdict: BuildVerdict,
    pub url: Option<String>,
    pub integration_sha: String,
}

/// Provenance for a push to the integration branch. Prevents a
/// push webhook from racing a build the Scheduler just started for the same SHA.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTrigger {
    pub branch: String,
    pub requested_sha: String,
    pub produced_sha: String,
    pub build_count: u32,
}

impl BuildTrigger {
    pub fn new(branch: String, requested_sha: String, produced_sha: String) -> Self {
        Self {
            branch,
            requested_sha,
            produced_sha,
            build_count: 1,
        }
    }

    pub fn increment(&mut self) {
        self.build_count += 1;
    }
}
