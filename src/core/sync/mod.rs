//! Adaptive mirroring of remote runs.
//!
//! [`TriggerGate`] decides when a pass is due and hands it to a
//! [`PassDispatcher`]; [`Reconciler`] performs the pass and feeds the
//! outcome back into the [`backoff`] schedule through the singleton
//! sync-state row.

pub mod backoff;
mod reconciler;
mod trigger;

pub use reconciler::{PassReport, Reconciler};
pub use trigger::{
    BackgroundDispatcher, PassDispatcher, TriggerGate, TriggerOutcome, TriggerPolicy,
    TriggerReason, evaluate,
};

#[cfg(test)]
mod tests;
