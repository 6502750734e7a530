#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use chrono::{Local, TimeZone};
use proxy_sync::cli::{Args, Command, SourcesCommand};
use proxy_sync::config::AppConfig;
use proxy_sync::fetch::HttpFetcher;
use proxy_sync::get_version;
use proxy_sync::lookup::HttpCountryLookup;
use proxy_sync::merge::Merger;
use proxy_sync::notify::LogNotifier;
use proxy_sync::parser;
use proxy_sync::registry::SourceRegistry;
use proxy_sync::scheduler::Scheduler;
use proxy_sync::store::ProxyStore;
use proxy_sync::sync::{SyncService, format_outcome};
use tokio::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        tracing::error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let builder = tracing_subscriber::fmt().with_max_level(if verbose {
        Level::TRACE
    } else {
        Level::INFO
    });

    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.init(),
    }
}

async fn run(args: Args) -> Result<()> {
    tracing::debug!("proxy-sync {}, config: {}", get_version(), args.config);
    let config = AppConfig::load_or_default(&args.config).await?;

    match args.command {
        Command::Parse { file } => parse_file(&file).await,
        Command::Audit => audit(&config).await,
        Command::Sources(command) => {
            let mut registry = open_registry(&config);
            manage_sources(&mut registry, command)
        }
        Command::Sync { source } => {
            let service = build_service(&config, open_registry(&config))?;
            let outcome = match source {
                Some(name) => service.sync_one(&name).await,
                None => service.sync_all().await,
            };
            println!("{}", format_outcome(&outcome));
            outcome.map(|_| ()).map_err(Into::into)
        }
        Command::Run => {
            let service = build_service(&config, open_registry(&config))?;
            let scheduler = Scheduler::new(
                Arc::new(service),
                Arc::new(LogNotifier),
                config.poll_interval(),
                config.error_backoff(),
            );
            scheduler.start().await;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            scheduler.stop().await;
            Ok(())
        }
    }
}

fn open_registry(config: &AppConfig) -> SourceRegistry {
    SourceRegistry::load(config.sources_path(), config.default_sources.clone())
}

fn build_service(config: &AppConfig, registry: SourceRegistry) -> Result<SyncService> {
    let fetcher = HttpFetcher::new(&config.user_agent, config.fetch_timeout())?;
    let lookup = HttpCountryLookup::new(
        &config.lookup_url,
        config.lookup_timeout(),
        config.lookup_delay(),
    )?;

    Ok(SyncService::new(
        Arc::new(Mutex::new(registry)),
        ProxyStore::new(config.proxies_path()),
        Arc::new(fetcher),
        Merger::new(Arc::new(lookup)),
    ))
}

async fn parse_file(file: &str) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;

    let batch = parser::parse_content(&content, "");
    for record in &batch.records {
        println!("{}\t{}\t{}", record.protocol, record.unique_key(), record.name);
    }
    tracing::info!(
        "Parsed {} proxies ({} failed, {} skipped)",
        batch.records.len(),
        batch.failed,
        batch.skipped
    );
    Ok(())
}

async fn audit(config: &AppConfig) -> Result<()> {
    let store = ProxyStore::new(config.proxies_path());
    let total = store.load_proxies().await?.len();
    let duplicates = store.duplicate_keys().await?;

    println!("{} proxies in {}", total, store.path().display());
    if duplicates.is_empty() {
        println!("No duplicate server:port keys");
    }
    for (key, count) in &duplicates {
        println!("{}\t{} entries", key, count);
    }
    Ok(())
}

fn manage_sources(registry: &mut SourceRegistry, command: SourcesCommand) -> Result<()> {
    match command {
        SourcesCommand::List => {
            for source in registry.sources() {
                let next = source
                    .next_sync_timestamp
                    .map_or_else(|| "now".to_string(), format_timestamp);
                println!(
                    "{}\t{}\t{:.1}%\t{} min\tnext {}\t{}",
                    source.name,
                    source.status(),
                    source.success_rate(),
                    source.sync_interval_minutes,
                    next,
                    source.url
                );
            }
        }
        SourcesCommand::Add {
            name,
            url,
            protocol,
            interval,
        } => registry.add(&name, &url, protocol, interval)?,
        SourcesCommand::Remove { name } => {
            registry.remove(&name)?;
        }
        SourcesCommand::Enable { name } => registry.set_enabled(&name, true)?,
        SourcesCommand::Disable { name } => registry.set_enabled(&name, false)?,
        SourcesCommand::Interval { name, minutes } => registry.set_interval(&name, minutes)?,
        SourcesCommand::Reset => registry.reset(),
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn format_timestamp(timestamp: f64) -> String {
    Local
        .timestamp_opt(timestamp as i64, 0)
        .single()
        .map_or_else(|| timestamp.to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}
