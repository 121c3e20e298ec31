use env_logger::Env;
use homu::config::HomuConfig;
use homu::event::intake::{self, IntakeStateInner};
use homu::github::DefaultGithubClient;
use homu::model::RepoModel;
use homu::store::{SqliteStore, Store};
use homu::supervisor::Supervisor;
use log::{error, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::sync::mpsc;

#[derive(StructOpt)]
struct Opt {
    /// Path to the YAML configuration file; overridable per field via `HOMU_*` env vars.
    #[structopt(long, default_value = "homu.yaml")]
    config: String,

    #[structopt(long, default_value = "sqlite://homu.db")]
    database_url: String,

    #[structopt(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let opt = Opt::from_args();

    let config = HomuConfig::load(&opt.config).expect("failed to load configuration");
    let repo_config_map = config.repo_map().expect("invalid repository configuration");

    let github: Arc<dyn homu::github::GithubClient> = Arc::new(DefaultGithubClient::new(
        config.host.username.clone(),
        config.host.token.clone(),
    ));
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&opt.database_url)
            .await
            .expect("failed to open store"),
    );
    let loaded = store.load_all().await.expect("failed to load persisted state");

    let mut queues = HashMap::new();
    let mut supervisor_handles = Vec::new();

    for repo in &config.repositories {
        let Some((owner, name)) = repo.name.split_once('/') else {
            info!("skipping malformed repository entry {}", repo.name);
            continue;
        };
        if name == "*" {
            info!("{} is a config-only wildcard entry, not a supervised repository", repo.name);
            continue;
        }

        let mut model = RepoModel::new(owner.to_string(), name.to_string(), repo.clone());
        model.rehydrate(&loaded);

        let (tx, rx) = mpsc::channel(256);
        queues.insert((owner.to_string(), name.to_string()), tx);

        let supervisor = Supervisor::new(model, github.clone(), store.clone(), config.trigger_token.clone(), rx);
        supervisor_handles.push(tokio::spawn(supervisor.run()));
        info!("supervising {}/{}", owner, name);
    }

    let intake_state = Arc::new(IntakeStateInner {
        github_webhook_secret: config.host.webhook_secret.clone(),
        repo_config: repo_config_map,
        queues,
    });

    {
        let app = intake::router(intake_state.clone());
        let server = axum::Server::bind(&opt.listen).serve(app.into_make_service());
        info!("listening on {}", opt.listen);

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!("server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, draining supervisor queues");
            }
        }
    }

    drop(intake_state);
    for handle in supervisor_handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
}
