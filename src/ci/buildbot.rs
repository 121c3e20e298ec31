//! `POST /buildbot`, authenticated by a `secret` form field matching the per-repo secret.
//! Buildbot posts one callback per builder per build.

use super::{BuildVerdict, CiCallback, CiProvider, Error};
use serde_derive::Deserialize;
use serde_json::Value;

pub struct BuildbotProvider {
    secret: String,
}

impl BuildbotProvider {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct BuildbotPayload {
    owner: String,
    repo: String,
    builder_name: String,
    revision: String,
    /// Buildbot's own result codes: 0 = success, everything else is some flavor of failure,
    /// except the in-progress sentinel below.
    results: Option<i32>,
    url: Option<String>,
}

const BUILDBOT_SUCCESS: i32 = 0;

impl CiProvider for BuildbotProvider {
    fn builder_name(&self) -> &str {
        "buildbot"
    }

    fn authenticate(&self, provided_secret: &str) -> bool {
        constant_time_eq(provided_secret.as_bytes(), self.secret.as_bytes())
    }

    fn parse_callback(&self, payload: &Value) -> Result<CiCallback, Error> {
        let payload: BuildbotPayload = serde_json::from_value(payload.clone())
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        let verdict = match payload.results {
            None => BuildVerdict::InProgress,
            Some(BUILDBOT_SUCCESS) => BuildVerdict::Success,
            Some(_) => BuildVerdict::Failure,
        };
        Ok(CiCallback {
            owner: payload.owner,
            repo: payload.repo,
            builder: payload.builder_name,
            sha: payload.revision,
            verdict,
            url: payload.url,
        })
    }
}

/// Avoids leaking timing information about the configured secret via early-exit comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_success_callback() {
        let provider = BuildbotProvider::new("s3cr3t");
        assert!(provider.authenticate("s3cr3t"));
        assert!(!provider.authenticate("wrong"));

        let payload = json!({
            "owner": "rust-lang",
            "repo": "rust",
            "builder_name": "linux-x86_64",
            "revision": "abc123",
            "results": 0,
            "url": "https://ci.example.com/build/1",
        });
        let callback = provider.parse_callback(&payload).unwrap();
        assert_eq!(callback.verdict, BuildVerdict::Success);
        assert_eq!(callback.builder, "linux-x86_64");
    }
}
