use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::backoff;
use super::reconciler::Reconciler;
use crate::core::config::{Credentials, SyncTuning};
use crate::core::store::{MirrorStore, SyncStateRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub stale_threshold: Duration,
    pub cooldown: Duration,
}

impl TriggerPolicy {
    pub fn from_tuning(tuning: &SyncTuning) -> Self {
        Self {
            stale_threshold: tuning.stale_threshold(),
            cooldown: tuning.cooldown(),
        }
    }
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::from_tuning(&SyncTuning::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    ColdStart,
    Forced,
    Stale,
    Overdue,
}

impl TriggerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::ColdStart => "cold_start",
            TriggerReason::Forced => "forced",
            TriggerReason::Stale => "stale",
            TriggerReason::Overdue => "overdue",
        }
    }
}

/// Decides whether a pass is due. Returns the reason together with the
/// state row to persist before dispatching; `None` means leave everything
/// as it is.
pub fn evaluate(
    current: Option<&SyncStateRecord>,
    force: bool,
    now: DateTime<Utc>,
    policy: &TriggerPolicy,
) -> Option<(TriggerReason, SyncStateRecord)> {
    let stamped = now + policy.cooldown;

    let Some(current) = current else {
        return Some((
            TriggerReason::ColdStart,
            SyncStateRecord {
                last_sync_at: None,
                next_sync_at: Some(stamped),
                backoff_seconds: backoff::initial_backoff_secs(),
                consecutive_no_change: 0,
            },
        ));
    };

    if force {
        return Some((
            TriggerReason::Forced,
            SyncStateRecord {
                last_sync_at: current.last_sync_at,
                next_sync_at: Some(stamped),
                backoff_seconds: backoff::initial_backoff_secs(),
                consecutive_no_change: 0,
            },
        ));
    }

    let is_stale = current
        .last_sync_at
        .is_none_or(|last| now - last > policy.stale_threshold);
    let is_overdue = current.next_sync_at.is_some_and(|next| next < now);

    let reason = if is_stale {
        TriggerReason::Stale
    } else if is_overdue {
        TriggerReason::Overdue
    } else {
        return None;
    };

    Some((
        reason,
        SyncStateRecord {
            next_sync_at: Some(stamped),
            ..current.clone()
        },
    ))
}

/// Starts a reconciliation pass without waiting for it.
pub trait PassDispatcher: Send + Sync {
    fn dispatch(&self, reason: TriggerReason) -> Result<()>;
}

/// Runs passes on the ambient tokio runtime. At most one pass is in flight;
/// requests arriving during a pass collapse into a single follow-up pass.
#[derive(Clone)]
pub struct BackgroundDispatcher {
    reconciler: Arc<Reconciler>,
    credentials: Credentials,
    in_flight: Arc<AtomicBool>,
    rerun: Arc<AtomicBool>,
}

impl BackgroundDispatcher {
    pub fn new(reconciler: Arc<Reconciler>, credentials: Credentials) -> Self {
        Self {
            reconciler,
            credentials,
            in_flight: Arc::new(AtomicBool::new(false)),
            rerun: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        !self.in_flight.load(Ordering::SeqCst)
    }
}

impl PassDispatcher for BackgroundDispatcher {
    fn dispatch(&self, reason: TriggerReason) -> Result<()> {
        let handle =
            Handle::try_current().map_err(|e| anyhow!("no runtime to run sync pass on: {}", e))?;

        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            debug!(
                "Sync pass already running; queued follow-up ({})",
                reason.as_str()
            );
            return Ok(());
        }

        let reconciler = self.reconciler.clone();
        let credentials = self.credentials.clone();
        let in_flight = self.in_flight.clone();
        let rerun = self.rerun.clone();

        handle.spawn(async move {
            loop {
                rerun.store(false, Ordering::SeqCst);
                if let Err(e) = reconciler.reconcile(&credentials).await {
                    warn!("Sync pass aborted: {:#}", e);
                }
                if rerun.load(Ordering::SeqCst) {
                    continue;
                }
                in_flight.store(false, Ordering::SeqCst);
                // A request may have slipped in between the check and the release.
                if !rerun.load(Ordering::SeqCst) || in_flight.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
        info!("Dispatched sync pass ({})", reason.as_str());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerOutcome {
    pub dispatched: Option<TriggerReason>,
    pub state: Option<SyncStateRecord>,
}

/// The single entry point callers use to ask for fresher data.
pub struct TriggerGate {
    store: MirrorStore,
    dispatcher: Arc<dyn PassDispatcher>,
    policy: TriggerPolicy,
}

impl TriggerGate {
    pub fn new(store: MirrorStore, dispatcher: Arc<dyn PassDispatcher>, policy: TriggerPolicy) -> Self {
        Self {
            store,
            dispatcher,
            policy,
        }
    }

    pub async fn request_sync(&self, force: bool) -> Result<TriggerOutcome> {
        self.request_sync_at(force, Utc::now()).await
    }

    /// Evaluates the gate and, when a pass is due, stamps the cooldown and
    /// hands the pass to the dispatcher. Dispatch failures are logged only.
    pub async fn request_sync_at(&self, force: bool, now: DateTime<Utc>) -> Result<TriggerOutcome> {
        let Some(reason) = self.claim_at(force, now).await? else {
            return Ok(TriggerOutcome {
                dispatched: None,
                state: self.store.get_sync_state().await?,
            });
        };

        if let Err(e) = self.dispatcher.dispatch(reason) {
            error!("Failed to dispatch sync pass ({}): {:#}", reason.as_str(), e);
        }
        Ok(TriggerOutcome {
            dispatched: Some(reason),
            state: self.store.get_sync_state().await?,
        })
    }

    /// Evaluates the gate and persists the stamped state, leaving the pass
    /// itself to the caller.
    pub async fn claim_at(&self, force: bool, now: DateTime<Utc>) -> Result<Option<TriggerReason>> {
        let current = self.store.get_sync_state().await?;
        let Some((reason, next_state)) = evaluate(current.as_ref(), force, now, &self.policy) else {
            debug!("Mirror is fresh; no sync pass needed");
            return Ok(None);
        };
        self.store.put_sync_state(&next_state).await?;
        Ok(Some(reason))
    }
}
