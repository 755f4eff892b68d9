mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

pub use router::build_api_router;

use crate::core::engine::MirrorEngine;
use crate::core::lifecycle::LifecycleComponent;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MirrorEngine>,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    api_host: String,
}

impl ApiServer {
    pub fn new(state: AppState, api_host: String) -> Self {
        Self { state, api_host }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    fn name(&self) -> &'static str {
        "API server"
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.api_host, self.state.api_port);
        // Bound here so a taken port fails startup.
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = router::build_api_router(self.state.clone());

        tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        });
        Ok(())
    }

}
