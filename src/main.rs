//! # PriceWatch
//!
//! Tracks marketplace product prices and tells owners when a target is hit.
//!
//! Usage:
//!   pricewatch run                                   # Scheduler loop (Ctrl-C stops)
//!   pricewatch check                                 # One cycle now, report as JSON
//!   pricewatch add --user 42 --url <URL> --target 999.90
//!   pricewatch list --user 42
//!   pricewatch set-target --id 3 --target 850
//!   pricewatch history --id 3

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pricewatch_core::traits::Notifier;
use pricewatch_core::{Money, PriceWatchConfig};
use pricewatch_scheduler::{
    CheckCycle, FetchRunner, LogNotifier, NewProduct, RetryPolicy, SchedulerEngine,
    SqliteRepository, SuppressionPolicy, SystemClock, TelegramNotifier, TriggerSet,
};
use pricewatch_scraper::{OzonScraper, is_product_url};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricewatch",
    version,
    about = "🛒 PriceWatch: scheduled price checks with deal alerts"
)]
struct Cli {
    /// Config file (default: ~/.pricewatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run checks at the configured times until interrupted
    Run,
    /// Run one check cycle now and print its report
    Check,
    /// Start tracking a product
    Add {
        /// Owner (Telegram chat id)
        #[arg(long)]
        user: i64,
        #[arg(long)]
        url: String,
        /// Target price, e.g. 1999.90
        #[arg(long, value_parser = parse_money)]
        target: Money,
    },
    /// List an owner's products
    List {
        #[arg(long)]
        user: i64,
    },
    /// Change a product's target price
    SetTarget {
        #[arg(long)]
        id: i64,
        #[arg(long, value_parser = parse_money)]
        target: Money,
    },
    /// Stop checking a product without deleting it
    Pause {
        #[arg(long)]
        id: i64,
    },
    /// Resume checks for a paused product
    Resume {
        #[arg(long)]
        id: i64,
    },
    /// Delete a product and its history
    Remove {
        #[arg(long)]
        id: i64,
    },
    /// Show recent price samples
    History {
        #[arg(long)]
        id: i64,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn parse_money(text: &str) -> std::result::Result<Money, String> {
    Money::parse(text).ok_or_else(|| format!("'{text}' is not a positive price"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pricewatch=debug"
    } else {
        "pricewatch=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let mut config = PriceWatchConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => PriceWatchConfig::load()?,
    };
    config.validate()?;

    let repository = open_repository(&config)?;

    match cli.command {
        Command::Run => {
            let engine = build_engine(&config, repository)?;
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("🛑 Interrupt received, finishing up");
                    let _ = tx.send(true);
                }
            });
            engine.run(rx).await;
        }
        Command::Check => {
            let engine = build_engine(&config, repository)?;
            let report = engine.fire_now().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Add { user, url, target } => {
            let url = url.trim().to_string();
            if !is_product_url(&url) {
                bail!("not a product URL: {url}");
            }
            repository.check_can_add(user, &url)?;
            let runner = build_runner(&config)?;
            let (title, price) = runner
                .check(&url)
                .await
                .into_result()
                .with_context(|| format!("fetching {url}"))?;
            let id = repository.add_product(
                &NewProduct {
                    user_id: user,
                    url,
                    title: Some(title.clone()),
                    target_price: target,
                    initial_price: Some(price),
                },
                Utc::now(),
            )?;
            println!("✅ #{id} {title}: now {price}, target {target}");
            if price <= target {
                println!("🎉 Already at or below target");
            }
        }
        Command::List { user } => {
            let products = repository.list_products_for_user(user)?;
            if products.is_empty() {
                println!("No products tracked for {user}");
            }
            for p in products {
                let current = p.current_price.map_or_else(|| "-".to_string(), |m| m.to_string());
                let paused = if p.active { "" } else { " [paused]" };
                println!(
                    "#{:<4} {:>10} / {:>10}  {:<5} {}{paused}",
                    p.id,
                    current,
                    p.target_price.to_string(),
                    p.deal_state.as_str(),
                    p.display_title()
                );
            }
        }
        Command::SetTarget { id, target } => {
            repository.update_target_price(id, target)?;
            println!("✅ #{id} target set to {target}");
        }
        Command::Pause { id } => {
            repository.set_active(id, false)?;
            println!("⏸️ #{id} paused");
        }
        Command::Resume { id } => {
            repository.set_active(id, true)?;
            println!("▶️ #{id} resumed");
        }
        Command::Remove { id } => {
            if !repository.remove_product(id)? {
                bail!("product #{id} not found");
            }
            println!("🗑️ #{id} removed");
        }
        Command::History { id, limit } => {
            for sample in repository.price_history(id, limit)? {
                println!(
                    "{}  {:>10}  {}",
                    sample.observed_at.format("%Y-%m-%d %H:%M"),
                    sample.price.to_string(),
                    sample.source.as_str()
                );
            }
        }
    }

    Ok(())
}

fn open_repository(config: &PriceWatchConfig) -> Result<Arc<SqliteRepository>> {
    let path = config.database.resolved_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let repository = SqliteRepository::open(&path)?;
    tracing::debug!("📂 Database: {}", path.display());
    Ok(Arc::new(repository))
}

fn build_runner(config: &PriceWatchConfig) -> Result<FetchRunner> {
    let scraper = OzonScraper::new(&config.scraper)?;
    Ok(FetchRunner::new(Arc::new(scraper), RetryPolicy::from(&config.fetch)))
}

fn build_notifier(config: &PriceWatchConfig) -> Result<Arc<dyn Notifier>> {
    if config.telegram.is_usable() {
        Ok(Arc::new(TelegramNotifier::new(&config.telegram)?))
    } else {
        tracing::warn!("⚠️ No Telegram bot token configured, notifications go to the log");
        Ok(Arc::new(LogNotifier))
    }
}

fn build_engine(
    config: &PriceWatchConfig,
    repository: Arc<SqliteRepository>,
) -> Result<SchedulerEngine> {
    let triggers = TriggerSet::from_config(&config.schedule)?;
    let cycle = CheckCycle::new(
        repository,
        build_notifier(config)?,
        build_runner(config)?,
        config.cycle.max_concurrent_fetches,
    )
    .with_suppression(SuppressionPolicy::from(&config.cycle));
    Ok(SchedulerEngine::new(triggers, cycle, Arc::new(SystemClock)))
}
