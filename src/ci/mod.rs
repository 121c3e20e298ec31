//! CI provider integrations: one sub-module per provider, each authenticating its own
//! callback shape and normalizing it to a [`CiCallback`] the event intake pushes onto a
//! repository's queue.

pub mod buildbot;
pub mod circleci;
pub mod jenkins;
pub mod solano;
pub mod travis;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildVerdict {
    Success,
    Failure,
    InProgress,
}

/// A CI provider's status callback, normalized to the shape the Scheduler needs to correlate
/// it against a `BuildTrigger` (the stale-callback rule).
#[derive(Debug, Clone, PartialEq)]
pub struct CiCallback {
    pub owner: String,
    pub repo: String,
    pub builder: String,
    pub sha: String,
    pub verdict: BuildVerdict,
    pub url: Option<String>,
}

/// Each provider owns how its callback is authenticated (HMAC body signature, a secret form
/// field, or an opaque token) and how its JSON payload maps onto [`CiCallback`].
pub trait CiProvider {
    fn builder_name(&self) -> &str;

    /// Validates the caller-supplied secret/signature before any payload is trusted.
    fn authenticate(&self, provided_secret: &str) -> bool;

    fn parse_callback(&self, payload: &Value) -> Result<CiCallback, Error>;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed CI callback payload: {0}")]
    MalformedPayload(String),

    #[error("CI callback authentication failed")]
    AuthFailure,

    #[error(transparent)]
    Client(#[from] crate::client::Error),
}

/// Verifies a hex-encoded HMAC-SHA1 signature over `message`, used by the providers whose
/// callback carries the HMAC in the body (Jenkins, Solano) rather than a header signature.
pub fn verify_hmac_sha1(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    let expected = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}
