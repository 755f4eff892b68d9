use anyhow::Result;
use chrono::{DateTime, Utc};
use console::style;
use std::path::Path;
use tracing::Level;

use crate::core::config::MirrorConfig;
use crate::core::engine::MirrorEngine;
use crate::core::store::SyncStateRecord;
use crate::core::sync::PassReport;
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_status, print_step, print_success, print_warn,
};
use crate::logging::init_tracing;

pub async fn run_sync(config: &MirrorConfig, data_dir: &Path, force: bool) -> Result<()> {
    let _log_tx = init_tracing(Level::WARN, false);
    if config.credentials().netlify().is_none() {
        print_error("No Netlify token configured. Set NETLIFY_AUTH_TOKEN or netlify_token.");
        return Ok(());
    }

    let engine = MirrorEngine::connect(config, data_dir).await?;
    let Some(reason) = engine.gate.claim_at(force, Utc::now()).await? else {
        print_info("Mirror is fresh; sync not needed. Use --force to sync anyway.");
        return Ok(());
    };

    print_step(&format!("Syncing ({})...", reason.as_str()));
    let report = engine.reconciler.reconcile(&engine.credentials).await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PassReport) {
    if report.changed {
        print_success("Mirror updated");
    } else {
        print_info("No changes since the last pass");
    }
    print_status(
        "Sites",
        &format!("{} polled, {} failed", report.sites_polled, report.sites_failed),
    );
    print_status(
        "Runs",
        &format!(
            "{} new, {} updated, {} unchanged",
            report.runs_discovered, report.runs_updated, report.runs_unchanged
        ),
    );
    print_status(
        "Sessions",
        &format!(
            "{} new, {} updated",
            report.sessions_discovered, report.sessions_updated
        ),
    );
    if report.sites_failed > 0 {
        print_warn("Some sites could not be polled; they are retried on the next pass.");
    }
    if report.session_fetch_failures > 0 {
        print_status(
            "Session fetches",
            &format!("{} failed", report.session_fetch_failures),
        );
    }
    print_status(
        "Next sync",
        &format!(
            "{} (backoff {}s)",
            format_time(report.next_sync_at),
            report.backoff_seconds
        ),
    );
}

pub async fn run_status(config: &MirrorConfig, data_dir: &Path) -> Result<()> {
    let engine = MirrorEngine::connect(config, data_dir).await?;
    let store = &engine.store;

    let state = store.get_sync_state().await?;
    let active = store.list_runs(false).await?;
    let archived = store.list_runs(true).await?;
    let sites = store.list_sync_enabled_sites().await?;
    let flagged = active.iter().filter(|r| r.pr_needs_update).count();

    let mut section = GuideSection::new("Sync");
    section = match &state {
        Some(state) => describe_state(section, state),
        None => section.text("Never synced. Run `runmirror sync` to start."),
    };
    section.print();

    let mut mirror = GuideSection::new("Mirror")
        .status("Active runs", &active.len().to_string())
        .status("Archived runs", &archived.len().to_string())
        .status("PRs needing update", &flagged.to_string())
        .status("Synced sites", &sites.len().to_string());
    for site in &sites {
        mirror = mirror.text(&format!("{} {}", style(&site.name).bold(), style(&site.id).dim()));
    }
    mirror.print();
    println!();
    Ok(())
}

fn describe_state(section: GuideSection, state: &SyncStateRecord) -> GuideSection {
    section
        .status("Last sync", &format_time(state.last_sync_at))
        .status("Next sync", &format_time(state.next_sync_at))
        .status("Backoff", &format!("{}s", state.backoff_seconds))
        .status("Quiet passes", &state.consecutive_no_change.to_string())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "never".to_string(),
    }
}
