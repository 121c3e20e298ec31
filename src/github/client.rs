use super::models::{
    Comment, NoBody, PullRequest, PullRequestIdentifier, StatusEventState,
};
use crate::client::{ApiClient, Result};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};

/// Narrow capability interface the Scheduler and Supervisor program against: `{getPR,
/// listComments, postComment, createMerge, pushBranch, fastForward, setStatus}`.
#[async_trait]
pub trait GithubClient: Send + Sync {
    async fn get_pull_request(&self, id: &PullRequestIdentifier) -> Result<PullRequest>;

    async fn list_comments(&self, id: &PullRequestIdentifier) -> Result<Vec<Comment>>;

    async fn post_comment(&self, id: &PullRequestIdentifier, body: &str) -> Result<Comment>;

    /// Merges `head_sha` into `base_ref` without reference to any pull request, producing the
    /// speculative integration commit the Scheduler pushes to the integration branch.
    async fn create_merge(
        &self,
        owner: &str,
        repo: &str,
        base_ref: &str,
        head_sha: &str,
        commit_message: &str,
    ) -> Result<MergeCommit>;

    /// Force-updates `branch` to `sha`; used to place a freshly built integration commit.
    async fn push_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()>;

    /// Updates `branch` to `sha` without forcing; fails (HTTP 422/409) if the branch has moved,
    /// which the Scheduler treats as a lost race and re-runs.
    async fn fast_forward(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()>;

    async fn set_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: StatusEventState,
        target_url: Option<&str>,
        context: &str,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct DefaultGithubClient {
    client: ApiClient,
}

impl DefaultGithubClient {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            client: ApiClient::from_credentials(username, password),
        }
    }

    fn make_pull_request_url(id: &PullRequestIdentifier) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/pulls/{}",
            id.owner, id.repo, id.pull_number
        )
    }

    fn make_repo_url(owner: &str, repo: &str, path: &str) -> String {
        format!("https://api.github.com/repos/{}/{}/{}", owner, repo, path)
    }
}

#[async_trait]
impl GithubClient for DefaultGithubClient {
    async fn get_pull_request(&self, id: &PullRequestIdentifier) -> Result<PullRequest> {
        let url = Self::make_pull_request_url(id);
        self.client.get(&url).await
    }

    async fn list_comments(&self, id: &PullRequestIdentifier) -> Result<Vec<Comment>> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/issues/{}/comments",
            id.owner, id.repo, id.pull_number
        );
        self.client.get(&url).await
    }

    async fn post_comment(&self, id: &PullRequestIdentifier, body: &str) -> Result<Comment> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/issues/{}/comments",
            id.owner, id.repo, id.pull_number
        );
        let request_body = CreateCommentRequest { body: body.into() };
        self.client.post(&url, &request_body).await
    }

    async fn create_merge(
        &self,
        owner: &str,
        repo: &str,
        base_ref: &str,
        head_sha: &str,
        commit_message: &str,
    ) -> Result<MergeCommit> {
        let url = Self::make_repo_url(owner, repo, "merges");
        let request_body = CreateMergeRequest {
            base: base_ref.into(),
            head: head_sha.into(),
            commit_message: commit_message.into(),
        };
        self.client.post(&url, &request_body).await
    }

    async fn push_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()> {
        self.update_ref(owner, repo, branch, sha, true).await
    }

    async fn fast_forward(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()> {
        self.update_ref(owner, repo, branch, sha, false).await
    }

    async fn set_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: StatusEventState,
        target_url: Option<&str>,
        context: &str,
    ) -> Result<()> {
        let url = Self::make_repo_url(owner, repo, &format!("statuses/{}", sha));
        let request_body = CreateStatusRequest {
            state,
            target_url: target_url.map(String::from),
            context: context.into(),
        };
        let _: NoBody = self.client.post(&url, &request_body).await?;
        Ok(())
    }
}

impl DefaultGithubClient {
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<()> {
        let url = Self::make_repo_url(owner, repo, &format!("git/refs/heads/{}", branch));
        let request_body = UpdateRefRequest {
            sha: sha.into(),
            force,
        };
        let _: NoBody = self.client.patch(&url, &request_body).await?;
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MergeCommit {
    pub sha: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct CreateCommentRequest {
    body: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct CreateMergeRequest {
    base: String,
    head: String,
    commit_message: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct UpdateRefRequest {
    sha: String,
    force: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct CreateStatusRequest {
    state: StatusEventState,
    target_url: Option<String>,
    context: String,
}
