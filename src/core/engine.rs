use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::core::commands::RunCommands;
use crate::core::config::{Credentials, MirrorConfig};
use crate::core::github::{GithubClient, ReviewSource};
use crate::core::pr_status::PrStatusEnricher;
use crate::core::remote::{NetlifyClient, RunSource};
use crate::core::store::MirrorStore;
use crate::core::sync::{BackgroundDispatcher, Reconciler, TriggerGate, TriggerPolicy};

/// Every engine component wired against one store and one pair of sources.
pub struct MirrorEngine {
    pub store: MirrorStore,
    pub reconciler: Arc<Reconciler>,
    pub gate: Arc<TriggerGate>,
    pub pr_status: Arc<PrStatusEnricher>,
    pub commands: Arc<RunCommands>,
    pub credentials: Credentials,
}

impl MirrorEngine {
    pub fn new(
        store: MirrorStore,
        runs: Arc<dyn RunSource>,
        reviews: Arc<dyn ReviewSource>,
        config: &MirrorConfig,
    ) -> Self {
        let credentials = config.credentials();
        let reconciler = Arc::new(Reconciler::new(store.clone(), runs.clone()));
        let dispatcher = BackgroundDispatcher::new(reconciler.clone(), credentials.clone());
        let gate = Arc::new(TriggerGate::new(
            store.clone(),
            Arc::new(dispatcher),
            TriggerPolicy::from_tuning(&config.sync),
        ));
        let pr_status = Arc::new(PrStatusEnricher::new(
            store.clone(),
            reviews.clone(),
            config.sync.pr_status_ttl(),
        ));
        let commands = Arc::new(RunCommands::new(
            store.clone(),
            runs,
            reviews,
            gate.clone(),
            pr_status.clone(),
            credentials.clone(),
        ));

        Self {
            store,
            reconciler,
            gate,
            pr_status,
            commands,
            credentials,
        }
    }

    /// Opens the on-disk store and builds the HTTP clients from `config`.
    pub async fn connect(config: &MirrorConfig, data_dir: &Path) -> Result<Self> {
        let db_path = config.database_path(data_dir);
        let store = MirrorStore::open(&db_path).await?;
        info!("Mirror store at {}", db_path.display());

        let runs = Arc::new(NetlifyClient::new(
            &config.netlify_api_base,
            config.http_timeout(),
        )?);
        let reviews = Arc::new(GithubClient::new(
            &config.github_api_base,
            config.http_timeout(),
        )?);
        Ok(Self::new(store, runs, reviews, config))
    }
}
