//! Harvester main entry point
//!
//! This is the command-line interface for the Harvester crawl orchestrator.

use anyhow::Context;
use clap::Parser;
use harvester::browser::{build_http_client, BrowserPool, HttpLauncher};
use harvester::config::{load_config_with_hash, Config};
use harvester::crawler::{CrawlRequest, Orchestrator};
use harvester::output::{print_scheduler_stats, print_session_report, session_report};
use harvester::scheduler::{SessionBatchCrawler, TaskScheduler, WebhookNotifier};
use harvester::storage::{self, open_metadata_store, LocalObjectStore, SharedMetadataStore};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Harvester: a stateful crawl orchestrator
///
/// Harvester crawls sites through a pool of page engines, stores page
/// records and media, and runs recurring or one-shot batch crawl tasks.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(version)]
#[command(about = "A stateful crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Crawl a single start URL and print its report instead of running tasks
    #[arg(long, value_name = "URL")]
    url: Option<String>,

    /// Maximum link depth for --url
    #[arg(long, requires = "url")]
    max_depth: Option<u32>,

    /// Maximum pages for --url
    #[arg(long, requires = "url")]
    max_pages: Option<u32>,

    /// Drop tasks stored by earlier runs before registering the configured ones
    #[arg(long, conflicts_with = "url")]
    fresh: bool,

    /// Validate config and show what would run without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Long-lived collaborators shared by both run modes
struct Services {
    pool: BrowserPool,
    orchestrator: Orchestrator,
    metadata: SharedMetadataStore,
    client: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, cli.url.as_deref());
        return Ok(());
    }

    let services = start_services(&config).await?;

    let outcome = match &cli.url {
        Some(url) => handle_single_crawl(&services, &cli, url).await,
        None => handle_tasks(&services, &config, cli.fresh).await,
    };

    services.pool.shutdown().await;
    outcome
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvester=info,warn"),
            1 => EnvFilter::new("harvester=debug,info"),
            2 => EnvFilter::new("harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Opens storage, warms up the pool and builds the orchestrator
async fn start_services(config: &Config) -> anyhow::Result<Services> {
    let metadata = open_metadata_store(config.storage.database_path.as_deref())
        .context("Failed to open metadata store")?;
    let objects = Arc::new(LocalObjectStore::new(config.storage.root.clone()));
    tracing::info!("Storing objects under {}", config.storage.root.display());

    let client = build_http_client(&config.user_agent).context("Failed to build HTTP client")?;
    let launcher = Arc::new(HttpLauncher::new(config.user_agent.clone()));
    let pool = BrowserPool::start(config.pool.pool_config(), launcher)
        .await
        .context("Failed to start browser pool")?;

    let orchestrator = Orchestrator::new(
        pool.clone(),
        client.clone(),
        objects,
        config.storage.bucket.clone(),
        metadata.clone(),
        config.pool.navigate_options(),
    );

    Ok(Services {
        pool,
        orchestrator,
        metadata,
        client,
    })
}

/// Handles the --dry-run mode: shows what would run
fn handle_dry_run(config: &Config, url: Option<&str>) {
    println!("=== Harvester Dry Run ===\n");

    println!("Browser Pool:");
    println!("  Browsers: {} to {}", config.pool.min_browsers, config.pool.max_browsers);
    println!("  Acquire timeout: {}s", config.pool.acquire_timeout);
    println!("  Navigation timeout: {}s", config.pool.navigation_timeout);

    println!("\nScheduler:");
    println!("  Max concurrent tasks: {}", config.scheduler.max_concurrent_tasks);
    println!("  Retry delay: {}s", config.scheduler.retry_delay);

    println!("\nStorage:");
    println!("  Objects: {} (bucket {})", config.storage.root.display(), config.storage.bucket);
    match &config.storage.database_path {
        Some(path) => println!("  Database: {}", path.display()),
        None => println!("  Database: in memory"),
    }

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);

    if let Some(url) = url {
        println!("\n✓ Configuration is valid");
        println!("✓ Would crawl {}", url);
        return;
    }

    println!("\nTasks ({}):", config.tasks.len());
    for task in &config.tasks {
        let schedule = task.schedule.as_deref().unwrap_or("once");
        println!(
            "  - {} (priority {}, {}, {} URLs)",
            task.name,
            task.priority,
            schedule,
            task.urls.len()
        );
        for url in &task.urls {
            println!("    * {}", url);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --url mode: one session, run to completion
async fn handle_single_crawl(services: &Services, cli: &Cli, url: &str) -> anyhow::Result<()> {
    let mut request = CrawlRequest::new(url);
    if let Some(max_depth) = cli.max_depth {
        request.settings.max_depth = max_depth;
    }
    if let Some(max_pages) = cli.max_pages {
        request.settings.max_pages = max_pages;
    }

    let session = services.orchestrator.run_to_completion(request).await?;
    let media = services.orchestrator.catalog().files(&session.id);
    print_session_report(&session_report(&session, &media));
    Ok(())
}

/// Handles the task mode: runs configured tasks until none has work left,
/// or until Ctrl-C
///
/// An enabled recurring task keeps the scheduler running until it is
/// paused or cancelled.
async fn handle_tasks(services: &Services, config: &Config, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        let mut store = storage::lock(&services.metadata);
        for task in store.load_tasks()? {
            store.delete_task(&task.id)?;
        }
        tracing::info!("Starting fresh (stored tasks dropped)");
    }

    let scheduler = TaskScheduler::new(
        config.scheduler.scheduler_config(),
        Arc::new(SessionBatchCrawler::new(services.orchestrator.clone())),
        Arc::new(WebhookNotifier::new(services.client.clone())),
        services.metadata.clone(),
    );

    let restored = scheduler.load_from_store()?;
    if restored > 0 {
        tracing::info!("Restored {} tasks from the database", restored);
    }

    let known: HashSet<String> = scheduler.get_all_tasks().into_iter().map(|t| t.name).collect();
    for entry in &config.tasks {
        if known.contains(&entry.name) {
            tracing::info!("Task '{}' is already registered", entry.name);
            continue;
        }
        scheduler.create_task(entry.to_new_task()?)?;
    }

    let tasks = scheduler.get_all_tasks();
    if tasks.is_empty() {
        tracing::warn!("No tasks configured");
    }
    let recurring = tasks.iter().filter(|t| t.enabled && t.is_recurring()).count();
    if recurring > 0 {
        tracing::info!("{} recurring tasks scheduled, press Ctrl-C to stop", recurring);
    }

    let ticker = scheduler.spawn_ticker();
    tokio::select! {
        _ = scheduler.wait_until_settled() => {
            tracing::info!("All tasks finished");
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::warn!("Interrupted, stopping scheduler");
        }
    }
    ticker.abort();

    print_scheduler_stats(&scheduler.get_stats(), &scheduler.get_all_tasks());
    Ok(())
}
