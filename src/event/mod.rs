//! Normalized events dispatched from webhook intake into a repository's supervisor queue.

pub mod intake;

use crate::ci::CiCallback;

/// One normalized unit of work for a repository's supervisor. Host webhooks and CI callbacks
/// are both collapsed into this shape before being pushed onto a queue, so the supervisor loop
/// only has to understand one kind of message.
#[derive(Debug, Clone)]
pub enum Event {
    PullRequestOpened {
        num: u64,
        title: String,
        body: Option<String>,
        head_sha: String,
        head_ref: String,
        base_ref: String,
        author: String,
    },
    PullRequestClosed {
        num: u64,
    },
    PullRequestSynchronized {
        num: u64,
        new_head_sha: String,
    },
    Comment {
        num: u64,
        commenter: String,
        body: String,
    },
    PushToBranch {
        branch: String,
        sha: String,
    },
    BuildStatus(CiCallback),
}

impl Event {
    /// The pull-request id this event concerns, if any; used only for log correlation, since
    /// supervisors are already partitioned by repository.
    pub fn pull_request_num(&self) -> Option<u64> {
        match self {
            Event::PullRequestOpened { num, .. }
            | Event::PullRequestClosed { num }
            | Event::PullRequestSynchronized { num, .. }
            | Event::Comment { num, .. } => Some(*num),
            Event::PushToBranch { .. } | Event::BuildStatus(_) => None,
        }
    }
}
