//! CLI entry point for the bulkfetch tool.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};
use bulkfetch_core::download::batch;
use bulkfetch_core::{Downloader, FetchConfig, FetchItem, ItemStatus};
use clap::Parser;
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = match &args.config {
        Some(path) => FetchConfig::from_json_file(path)?,
        None => FetchConfig::default(),
    };
    args.apply_to(&mut config);
    debug!(?config, "effective configuration");

    // Read input: from positional args or stdin
    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read URLs from stdin")?;
        buffer
    } else {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://httpbin.org/get' | bulkfetch -o ./mirror");
        return Ok(());
    };

    let urls = parse_urls(&input_text);
    if urls.is_empty() {
        info!("No URLs found in input");
        return Ok(());
    }
    info!(urls = urls.len(), home = %config.home.display(), "Starting batch");

    let downloader = Downloader::from_config(&config)?;
    let items: Vec<FetchItem> =
        batch::swarm(&downloader, urls.into_iter().map(FetchItem::new)).await?;

    for item in &items {
        println!("{item}");
    }

    let stats = downloader.stats();
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        cached = stats.cached(),
        retried = stats.retried(),
        total = stats.total(),
        "Batch complete"
    );
    debug!(
        failed_urls = ?items
            .iter()
            .filter(|item| item.status() == ItemStatus::Failed)
            .map(FetchItem::url)
            .collect::<Vec<_>>(),
        "failed items"
    );

    Ok(())
}

/// One URL per line; blank lines and `#` comments are ignored.
fn parse_urls(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}
