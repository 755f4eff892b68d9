use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::MirrorConfig;
use crate::core::engine::MirrorEngine;
use crate::core::lifecycle::LifecycleManager;
use crate::core::sync::TriggerGate;
use crate::core::terminal::{print_link, print_status};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging::init_tracing;

pub async fn run_serve(
    config: &MirrorConfig,
    data_dir: &Path,
    api_host: String,
    api_port: u16,
) -> Result<()> {
    let log_tx = init_tracing(config.max_log_level(), false);
    info!("Starting runmirror server...");
    if config.credentials().netlify().is_none() {
        warn!("No Netlify token configured (NETLIFY_AUTH_TOKEN); sync passes will be skipped");
    }

    let engine = Arc::new(MirrorEngine::connect(config, data_dir).await?);
    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(engine.store.clone())));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
        AppState {
            engine: engine.clone(),
            log_tx,
            api_port,
        },
        api_host.clone(),
    ))));
    register_sync_ticker(
        &lifecycle,
        engine.gate.clone(),
        config.sync.background_tick_secs,
    )
    .await?;
    lifecycle.start().await?;

    if let Err(e) = engine.gate.request_sync(false).await {
        warn!("Initial sync check failed: {:#}", e);
    }

    println!();
    print_link("API", &format!("http://{}:{}/api", api_host, api_port));
    print_status("Data", &data_dir.display().to_string());
    println!(
        "\n  Press {} to stop the server.\n",
        style("Ctrl+C").bold().yellow()
    );

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await
}

/// Keeps the mirror warm without an open UI by asking the gate on a fixed
/// interval. Returns whether a job was registered.
pub(crate) async fn register_sync_ticker(
    lifecycle: &LifecycleManager,
    gate: Arc<TriggerGate>,
    every_secs: u64,
) -> Result<bool> {
    if every_secs == 0 {
        info!("Background sync ticker disabled");
        return Ok(false);
    }

    let job = tokio_cron_scheduler::Job::new_repeated_async(
        Duration::from_secs(every_secs),
        move |_uuid, mut _l| {
            let gate = gate.clone();
            Box::pin(async move {
                if let Err(e) = gate.request_sync(false).await {
                    warn!("Background sync check failed: {:#}", e);
                }
            })
        },
    )?;
    lifecycle.scheduler.add(job).await?;
    info!("Background sync ticker every {}s", every_secs);
    Ok(true)
}
