//! Crate-level error type and the retryability classification.

use std::borrow::Cow;
use thiserror::Error;

/// A cross-cutting classification attached to errors that cross a
/// supervisor/scheduler boundary so callers can decide whether to retry
/// without matching on concrete variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network timeout or 5xx from the host/CI provider. Retried with
    /// bounded backoff; the pull request moves to `Error` only once the
    /// retry budget is exhausted.
    TransientIO,
    /// 4xx from the host on a merge/push attempt (conflict, permission,
    /// branch protection).
    HostRefusal,
    /// CI reported failure. Requires a `retry` command to move on.
    CIFailure,
    /// The command parser rejected an input comment.
    BadCommand,
    /// Webhook signature/secret mismatch.
    AuthFailure,
    /// One of the Model's internal invariants was violated.
    InternalInvariant,
}

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

    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::Error),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),

    #[error("{0}")]
    Generic(Cow<'static, str>),
}

impl Error {
    pub fn as_generic<T>(message: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        Self::Generic(message.into())
    }

    /// Best-effort classification used for top-level logging; component
    /// errors generally carry their own, more precise `ErrorKind`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Client(e) if e.too_many_requests() => ErrorKind::TransientIO,
            Error::Client(_) => ErrorKind::HostRefusal,
            Error::Scheduler(e) => e.kind(),
            Error::Supervisor(e) => e.kind(),
            Error::Parser(_) => ErrorKind::BadCommand,
            _ => ErrorKind::InternalInvariant,
        }
    }
}
