//! `POST /travis`, authenticated by a Travis API token passed in the `Authorization` header.
//! Travis posts its classic webhook payload with `repository`, `commit`, and `state`.

use super::{BuildVerdict, CiCallback, CiProvider, Error};
use serde_derive::Deserialize;
use serde_json::Value;

pub struct TravisProvider {
    token: String,
}

impl TravisProvider {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: token.into() }
    }
}

#[derive(Deserialize, Debug)]
struct TravisPayload {
    repository: TravisRepository,
    commit: String,
    state: String,
    build_url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TravisRepository {
    owner_name: String,
    name: String,
}

impl CiProvider for TravisProvider {
    fn builder_name(&self) -> &str {
        "travis"
    }

    fn authenticate(&self, provided_secret: &str) -> bool {
        provided_secret == self.token
    }

    fn parse_callback(&self, payload: &Value) -> Result<CiCallback, Error> {
        let payload: TravisPayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        let verdict = match payload.state.as_str() {
            "passed" => BuildVerdict::Success,
            "failed" | "errored" | "canceled" => BuildVerdict::Failure,
            _ => BuildVerdict::InProgress,
        };
        Ok(CiCallback {
            owner: payload.repository.owner_name,
            repo: payload.repository.name,
            builder: self.builder_name().into(),
            sha: payload.commit,
            verdict,
            url: payload.build_url,
        })
    }
}
