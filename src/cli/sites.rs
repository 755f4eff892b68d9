use anyhow::Result;
use console::style;
use std::path::Path;
use tracing::Level;

use crate::core::config::MirrorConfig;
use crate::core::engine::MirrorEngine;
use crate::core::store::SiteRecord;
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_step, print_success,
};
use crate::logging::init_tracing;

pub async fn run_sites_command(
    args: &[String],
    config: &MirrorConfig,
    data_dir: &Path,
) -> Result<()> {
    let sub = args.get(2).map(|s| s.as_str()).unwrap_or("list");
    match sub {
        "list" => {
            let engine = MirrorEngine::connect(config, data_dir).await?;
            print_sites(&engine.store.list_sites().await?);
        }
        "refresh" => {
            let _log_tx = init_tracing(Level::WARN, false);
            if config.credentials().netlify().is_none() {
                print_error("No Netlify token configured. Set NETLIFY_AUTH_TOKEN or netlify_token.");
                return Ok(());
            }
            let engine = MirrorEngine::connect(config, data_dir).await?;
            print_step("Fetching sites from Netlify...");
            let sites = engine.reconciler.refresh_sites(&engine.credentials).await?;
            print_success(&format!("{} site(s) known", sites.len()));
            print_sites(&sites);
        }
        "enable" | "disable" => {
            let Some(id) = args.get(3) else {
                print_error(&format!("Usage: runmirror sites {} <site-id>", sub));
                return Ok(());
            };
            let enabled = sub == "enable";
            let engine = MirrorEngine::connect(config, data_dir).await?;
            if engine.store.set_site_sync_enabled(id, enabled).await? {
                print_success(&format!(
                    "Sync {} for {}",
                    if enabled { "enabled" } else { "disabled" },
                    id
                ));
            } else {
                print_error(&format!(
                    "Unknown site '{}'. Run `runmirror sites refresh` first.",
                    id
                ));
            }
        }
        _ => print_sites_help(),
    }
    Ok(())
}

fn print_sites(sites: &[SiteRecord]) {
    if sites.is_empty() {
        print_info("No sites yet. Run `runmirror sites refresh`.");
        return;
    }
    let mut section = GuideSection::new("Sites");
    for site in sites {
        section = section.status(&site.name, &describe_site(site));
    }
    section.print();
    println!();
}

fn describe_site(site: &SiteRecord) -> String {
    let flag = if site.sync_enabled {
        style("syncing").green().to_string()
    } else {
        style("ignored").dim().to_string()
    };
    format!("{} {}", site.id, flag)
}

fn print_sites_help() {
    GuideSection::new("runmirror sites")
        .command("list", "Show known sites (default)")
        .command("refresh", "Fetch the site list from Netlify")
        .command("enable <id>", "Include a site in sync passes")
        .command("disable <id>", "Exclude a site from sync passes")
        .print();
    println!();
}
