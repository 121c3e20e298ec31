pub mod client;
pub mod models;

pub use client::{DefaultGithubClient, GithubClient, MergeCommit};
pub use models::{
    ActionRuns, Branch, BranchProtection, Comment, Link, Links, MergeableState, NoBody,
    PullRequest, PullRequestIdentifier, PullRequestReview, PullRequestState, Repository,
    ReviewState, Status, StatusEventState, StatusState, User, WorkflowRun, WorkflowRunConclusion,
};
