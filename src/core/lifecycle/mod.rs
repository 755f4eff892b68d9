use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::{debug, info, warn};

#[derive(Debug, PartialEq)]
pub enum LifecycleState {
    Init,
    Starting,
    Ready,
    Shutdown,
}

/// A long-lived part of the server. `on_init` must leave the component
/// usable; `on_start` may begin serving.
#[async_trait::async_trait]
pub trait LifecycleComponent {
    fn name(&self) -> &'static str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

type Component = Arc<Mutex<dyn LifecycleComponent + Send + Sync>>;

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<Component>,
    pub scheduler: JobScheduler,
}

impl LifecycleManager {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            state: LifecycleState::Init,
            components: Vec::new(),
            scheduler,
        })
    }

    pub fn attach(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    /// Initializes then starts every component in attach order. The first
    /// failure aborts startup and names the component.
    pub async fn start(&mut self) -> Result<()> {
        self.state = LifecycleState::Init;
        for comp in &self.components {
            let mut comp = comp.lock().await;
            let name = comp.name();
            debug!("Initializing {}", name);
            comp.on_init()
                .await
                .with_context(|| format!("{} failed to initialize", name))?;
        }

        self.state = LifecycleState::Starting;
        for comp in &self.components {
            let mut comp = comp.lock().await;
            let name = comp.name();
            comp.on_start()
                .await
                .with_context(|| format!("{} failed to start", name))?;
        }

        self.scheduler.start().await?;
        self.state = LifecycleState::Ready;
        info!("Ready: {} component(s) running", self.components.len());
        Ok(())
    }

    /// Stops the scheduler, then components in reverse attach order.
    /// Errors are logged and do not stop the remaining components.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down");
        self.state = LifecycleState::Shutdown;

        if let Err(e) = self.scheduler.shutdown().await {
            warn!("Scheduler shutdown error: {}", e);
        }
        for comp in self.components.iter().rev() {
            let mut comp = comp.lock().await;
            if let Err(e) = comp.on_shutdown().await {
                warn!("{} shutdown error: {:#}", comp.name(), e);
            }
        }

        Ok(())
    }
}
