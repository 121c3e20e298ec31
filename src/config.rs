use crate::common::{MalformedRepoNameError, RepoIdentifier, RepoMap, RepoMapError};
use config::{Config, ConfigError, Environment, File};
use serde_derive::Deserialize;
use thiserror::Error;

/// Top level configuration, loaded by the (out of core scope) launcher from a YAML file and
/// overridable via `HOMU_*` environment variables.
#[derive(Deserialize, Debug)]
pub struct HomuConfig {
    pub host: HostConfig,

    /// Prefix a comment must start with for the command parser to consider it.
    #[serde(default = "default_trigger_token")]
    pub trigger_token: String,

    pub repositories: Vec<RepositoryConfig>,
}

fn default_trigger_token() -> String {
    "@homu".into()
}

#[derive(Deserialize, Debug)]
pub struct HostConfig {
    pub username: String,
    pub token: String,
    /// Shared secret used to validate `X-Hub-Signature` on the `/github` webhook.
    pub webhook_secret: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RepositoryConfig {
    /// `owner/repo`, or `owner/*` to match every repository under an owner.
    pub name: String,

    #[serde(default)]
    pub reviewers: Vec<String>,

    #[serde(default)]
    pub admins: Vec<String>,

    pub required_builders: Vec<String>,

    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,

    #[serde(default = "default_protected_branch")]
    pub protected_branch: String,

    #[serde(default = "default_rollup_cap")]
    pub rollup_cap: usize,

    /// Controls rollup failure attribution: when false (the default) a rollup failure marks
    /// every constituent pull request `Failure`; when true the first pull request in queue
    /// order is blamed and the rest re-queued.
    #[serde(default)]
    pub bisect_on_rollup: bool,

    #[serde(default)]
    pub ci: CiBindings,
}

fn default_integration_branch() -> String {
    "auto".into()
}

fn default_protected_branch() -> String {
    "master".into()
}

fn default_rollup_cap() -> usize {
    10
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct CiBindings {
    pub circleci: Option<CircleCiConfig>,
    pub buildbot: Option<SecretBoundConfig>,
    pub travis: Option<TravisConfig>,
    pub jenkins: Option<SecretBoundConfig>,
    pub solano: Option<SecretBoundConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CircleCiConfig {
    pub token: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TravisConfig {
    pub token: String,
}

/// Shared shape for providers that authenticate callbacks with a single secret value
/// (buildbot's `secret` form field, Jenkins' and Solano's HMAC'd body).
#[derive(Deserialize, Debug, Clone)]
pub struct SecretBoundConfig {
    pub secret: String,
}

impl HomuConfig {
    pub fn load(config_file_path: &str) -> Result<Self, ConfigError> {
        let mut config = Config::new();
        let config_file_path = shellexpand::tilde(config_file_path);
        config.merge(File::with_name(&config_file_path).required(false))?;
        config.merge(Environment::with_prefix("homu").separator("_"))?;
        config.try_into()
    }

    /// Builds the per-repository lookup table the Model uses.
    pub fn repo_map(&self) -> Result<RepoMap<RepositoryConfig>, RepoMapBuildError> {
        let mut map = RepoMap::new(RepositoryConfig::unconfigured());
        for repo in &self.repositories {
            let identifier: RepoIdentifier = repo.name.parse()?;
            map.insert(identifier, repo.clone())?;
        }
        Ok(map)
    }
}

#[derive(Error, Debug)]
pub enum RepoMapBuildError {
    #[error(transparent)]
    Malformed(#[from] MalformedRepoNameError),

    #[error(transparent)]
    Duplicate(#[from] RepoMapError),
}

impl RepositoryConfig {
    fn unconfigured() -> Self {
        Self {
            name: "*/*".into(),
            reviewers: Vec::new(),
            admins: Vec::new(),
            required_builders: Vec::new(),
            integration_branch: default_integration_branch(),
            protected_branch: default_protected_branch(),
            rollup_cap: default_rollup_cap(),
            bisect_on_rollup: false,
            ci: CiBindings::default(),
        }
    }

    pub fn is_reviewer(&self, login: &str) -> bool {
        self.reviewers.iter().any(|r| r == login) || self.is_admin(login)
    }

    pub fn is_admin(&self, login: &str) -> bool {
        self.admins.iter().any(|a| a == login)
    }
}
