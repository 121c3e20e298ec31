//! `POST /solano`, authenticated by an HMAC embedded in the body, same shape as Jenkins'
//! callback since neither provider signs via a request header.

use super::{verify_hmac_sha1, BuildVerdict, CiCallback, CiProvider, Error};
use serde_derive::Deserialize;
use serde_json::Value;

pub struct SolanoProvider {
    secret: String,
}

impl SolanoProvider {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct SolanoPayload {
    signature: String,
    owner: String,
    repo: String,
    suite_name: String,
    commit_sha: String,
    status: String,
    report_url: Option<String>,
}

impl SolanoPayload {
    fn signed_message(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.owner, self.repo, self.suite_name, self.commit_sha, self.status
        )
    }
}

impl CiProvider for SolanoProvider {
    fn builder_name(&self) -> &str {
        "solano"
    }

    fn authenticate(&self, _provided_secret: &str) -> bool {
        true
    }

    fn parse_callback(&self, payload: &Value) -> Result<CiCallback, Error> {
        let payload: SolanoPayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        let message = payload.signed_message();
        if !verify_hmac_sha1(self.secret.as_bytes(), message.as_bytes(), &payload.signature) {
            return Err(Error::AuthFailure);
        }
        let verdict = match payload.status.as_str() {
            "passed" => BuildVerdict::Success,
            "failed" => BuildVerdict::Failure,
            _ => BuildVerdict::InProgress,
        };
        Ok(CiCallback {
            owner: payload.owner,
            repo: payload.repo,
            builder: payload.suite_name,
            sha: payload.commit_sha,
            verdict,
            url: payload.report_url,
        })
    }
}
