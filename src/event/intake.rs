//! Webhook HTTP endpoints. Handlers authenticate the inbound payload, normalize it to an
//! [`Event`], and enqueue it on the owning repository's bounded queue. Handlers never touch a
//! [`crate::model::RepoModel`] directly; only a supervisor does that.

use crate::ci::{
    buildbot::BuildbotProvider, jenkins::JenkinsProvider, solano::SolanoProvider, travis::TravisProvider, verify_hmac_sha1,
    CiProvider,
};
use crate::common::RepoMap;
use crate::config::RepositoryConfig;
use crate::event::Event;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use log::warn;
use serde_derive::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

pub type RepoKey = (String, String);

pub struct IntakeStateInner {
    pub github_webhook_secret: String,
    pub repo_config: RepoMap<RepositoryConfig>,
    pub queues: HashMap<RepoKey, Sender<Event>>,
}

pub type IntakeState = Arc<IntakeStateInner>;

pub fn router(state: IntakeState) -> Router {
    Router::new()
        .route("/github", post(github_webhook))
        .route("/buildbot", post(buildbot_webhook))
        .route("/travis", post(travis_webhook))
        .route("/jenkins", post(jenkins_webhook))
        .route("/solano", post(solano_webhook))
        .route("/callback", get(oauth_callback))
        .route("/", get(status_dashboard))
        .with_state(state)
}

async fn enqueue(state: &IntakeStateInner, owner: &str, repo: &str, event: Event) -> Result<StatusCode, StatusCode> {
    let key = (owner.to_string(), repo.to_string());
    let sender = state.queues.get(&key).ok_or(StatusCode::NOT_FOUND)?;
    match sender.try_send(event) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(TrySendError::Full(_)) => {
            warn!("{}/{}: supervisor queue full, applying backpressure", owner, repo);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(TrySendError::Closed(_)) => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Deserialize)]
struct RepoRef {
    name: String,
    owner: OwnerRef,
}

#[derive(Deserialize)]
struct OwnerRef {
    login: String,
}

#[derive(Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Deserialize)]
struct RefPayload {
    sha: String,
    #[serde(rename = "ref")]
    name: String,
}

#[derive(Deserialize)]
struct PullRequestEventPayload {
    action: String,
    number: u64,
    pull_request: PullRequestPayload,
    repository: RepoRef,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    title: String,
    body: Option<String>,
    head: RefPayload,
    base: RefPayload,
    user: UserRef,
}

#[derive(Deserialize)]
struct IssueCommentEventPayload {
    action: String,
    issue: IssueRef,
    comment: CommentPayload,
    repository: RepoRef,
}

#[derive(Deserialize)]
struct IssueRef {
    number: u64,
}

#[derive(Deserialize)]
struct CommentPayload {
    body: String,
    user: UserRef,
}

#[derive(Deserialize)]
struct PushEventPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: RepoRef,
}

/// `POST /github`, authenticated by an HMAC-SHA1 of the raw body against the host's shared
/// webhook secret in `X-Hub-Signature`. Dispatches on `X-GitHub-Event` since pull request,
/// issue comment, and push events carry unrelated payload shapes.
async fn github_webhook(State(state): State<IntakeState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode, StatusCode> {
    let signature = headers
        .get("X-Hub-Signature")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha1="))
        .ok_or(StatusCode::BAD_REQUEST)?;
    if !verify_hmac_sha1(state.github_webhook_secret.as_bytes(), &body, signature) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let event_kind = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    match event_kind {
        "pull_request" => {
            let payload: PullRequestEventPayload = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
            let owner = payload.repository.owner.login;
            let repo = payload.repository.name;
            let event = match payload.action.as_str() {
                "opened" | "reopened" => Event::PullRequestOpened {
                    num: payload.number,
                    title: payload.pull_request.title,
                    body: payload.pull_request.body,
                    head_sha: payload.pull_request.head.sha,
                    head_ref: payload.pull_request.head.name,
                    base_ref: payload.pull_request.base.name,
                    author: payload.pull_request.user.login,
                },
                "synchronize" => Event::PullRequestSynchronized {
                    num: payload.number,
                    new_head_sha: payload.pull_request.head.sha,
                },
                "closed" => Event::PullRequestClosed { num: payload.number },
                _ => return Ok(StatusCode::ACCEPTED),
            };
            enqueue(&state, &owner, &repo, event).await
        }
        "issue_comment" => {
            let payload: IssueCommentEventPayload = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
            if payload.action != "created" {
                return Ok(StatusCode::ACCEPTED);
            }
            let owner = payload.repository.owner.login;
            let repo = payload.repository.name;
            let event = Event::Comment {
                num: payload.issue.number,
                commenter: payload.comment.user.login,
                body: payload.comment.body,
            };
            enqueue(&state, &owner, &repo, event).await
        }
        "push" => {
            let payload: PushEventPayload = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
            let owner = payload.repository.owner.login;
            let repo = payload.repository.name;
            let branch = payload.git_ref.trim_start_matches("refs/heads/").to_string();
            let event = Event::PushToBranch { branch, sha: payload.after };
            enqueue(&state, &owner, &repo, event).await
        }
        _ => Ok(StatusCode::ACCEPTED),
    }
}

async fn buildbot_webhook(State(state): State<IntakeState>, body: Bytes) -> Result<StatusCode, StatusCode> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let owner = payload.get("owner").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let repo = payload.get("repo").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let bindings = &state.repo_config.get(owner, repo).ci;
    let secret = bindings.buildbot.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let provider = BuildbotProvider::new(secret.secret.clone());
    let provided = payload.get("secret").and_then(Value::as_str).unwrap_or("");
    if !provider.authenticate(provided) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let callback = provider.parse_callback(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    let (owner, repo) = (owner.to_string(), repo.to_string());
    enqueue(&state, &owner, &repo, Event::BuildStatus(callback)).await
}

async fn travis_webhook(State(state): State<IntakeState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode, StatusCode> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let repository = payload.get("repository").ok_or(StatusCode::BAD_REQUEST)?;
    let owner = repository.get("owner_name").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let repo = repository.get("name").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let bindings = &state.repo_config.get(owner, repo).ci;
    let token = bindings.travis.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let provider = TravisProvider::new(token.token.clone());
    let provided = headers.get("Authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !provider.authenticate(provided) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let callback = provider.parse_callback(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    let (owner, repo) = (owner.to_string(), repo.to_string());
    enqueue(&state, &owner, &repo, Event::BuildStatus(callback)).await
}

async fn jenkins_webhook(State(state): State<IntakeState>, body: Bytes) -> Result<StatusCode, StatusCode> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let owner = payload.get("owner").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let repo = payload.get("repo").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let bindings = &state.repo_config.get(owner, repo).ci;
    let secret = bindings.jenkins.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let provider = JenkinsProvider::new(secret.secret.clone());
    let callback = provider.parse_callback(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    let (owner, repo) = (owner.to_string(), repo.to_string());
    enqueue(&state, &owner, &repo, Event::BuildStatus(callback)).await
}

async fn solano_webhook(State(state): State<IntakeState>, body: Bytes) -> Result<StatusCode, StatusCode> {
    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let owner = payload.get("owner").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let repo = payload.get("repo").and_then(Value::as_str).ok_or(StatusCode::BAD_REQUEST)?;
    let bindings = &state.repo_config.get(owner, repo).ci;
    let secret = bindings.solano.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let provider = SolanoProvider::new(secret.secret.clone());
    let callback = provider.parse_callback(&payload).map_err(|_| StatusCode::BAD_REQUEST)?;
    let (owner, repo) = (owner.to_string(), repo.to_string());
    enqueue(&state, &owner, &repo, Event::BuildStatus(callback)).await
}

/// Host OAuth completion. Authentication plumbing to the hosting platform is an external
/// collaborator; this endpoint only needs to exist at a stable path.
async fn oauth_callback() -> StatusCode {
    StatusCode::OK
}

/// The human-facing status dashboard is an external collaborator too; this is a liveness stub.
async fn status_dashboard() -> &'static str {
    "homu is running"
}
