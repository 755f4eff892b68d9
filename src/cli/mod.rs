mod serve;
mod sites;
mod sync;

use anyhow::Result;
use console::style;

use crate::core::config::MirrorConfig;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::platform::{NativePlatform, Platform};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Server")
        .command("serve", "Run the API server and background sync")
        .text("Options: --api-host <host>  --api-port <port>")
        .print();

    GuideSection::new("Sync")
        .command("sync", "Run one sync pass now if the mirror is due")
        .command("sync --force", "Reset the backoff and sync unconditionally")
        .command("status", "Show the sync schedule and mirror counts")
        .print();

    GuideSection::new("Sites")
        .command("sites list", "Show known sites and whether they sync")
        .command("sites refresh", "Fetch the site list from Netlify")
        .command("sites enable <id>", "Include a site in sync passes")
        .command("sites disable <id>", "Exclude a site from sync passes")
        .print();

    GuideSection::new("Configuration")
        .text("Settings live in <data dir>/config.toml; the data dir is ~/.runmirror")
        .text("unless RUNMIRROR_DATA_DIR is set.")
        .blank()
        .hint("NETLIFY_AUTH_TOKEN=... runmirror serve", "")
        .hint("GITHUB_TOKEN=... runmirror serve", "private repositories")
        .print();

    println!(
        "\n {} {} <command> [subcommand]\n",
        style("Usage:").bold(),
        style("runmirror").green()
    );
}

pub(crate) fn parse_api_server_flags(
    args: &[String],
    start: usize,
    mut api_host: String,
    mut api_port: u16,
) -> (String, u16) {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-port" => {
                if i + 1 < args.len() {
                    api_port = args[i + 1].parse().unwrap_or(api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    (api_host, api_port)
}

pub(crate) fn has_flag(args: &[String], start: usize, names: &[&str]) -> bool {
    args.iter()
        .skip(start)
        .any(|a| names.contains(&a.as_str()))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let data_dir = NativePlatform::data_dir();
    let cmd = args[1].as_str();
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let config = MirrorConfig::load(&data_dir)?;
    match cmd {
        "serve" => {
            let (api_host, api_port) =
                parse_api_server_flags(&args, 2, config.api_host.clone(), config.api_port);
            serve::run_serve(&config, &data_dir, api_host, api_port).await
        }
        "sync" => {
            let force = has_flag(&args, 2, &["--force", "-f"]);
            sync::run_sync(&config, &data_dir, force).await
        }
        "status" => sync::run_status(&config, &data_dir).await,
        "sites" => sites::run_sites_command(&args, &config, &data_dir).await,
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
