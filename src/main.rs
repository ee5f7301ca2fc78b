//! feedsync: rate-limited article sync for a personal RSS reader.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use url::Url;

use feedsync::config::Config;
use feedsync::storage::Database;
use feedsync::sync::{QuotaTracker, SyncOptions, SyncRunner};
use feedsync::upstream::UpstreamClient;

#[derive(Parser)]
#[command(name = "feedsync", version, about = "Sync articles from a hosted feed API")]
struct Cli {
    /// Config file path (default: ~/.config/feedsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync now and print the result
    Sync,
    /// Sync on the configured interval until interrupted
    Daemon,
    /// Show the outcome of a past or in-flight sync run
    Status {
        /// Sync run id as printed by `feedsync sync`
        sync_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = config_dir()?;
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| config_dir.join("feedsync.db").to_string_lossy().into_owned());
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("opening database at {db_path}"))?;

    match cli.command {
        Command::Sync => {
            let runner = build_runner(db, &config)?;
            let sync_id = runner.trigger_sync().await?;
            print_run(&runner, sync_id).await?;
        }
        Command::Daemon => {
            let runner = build_runner(db, &config)?;
            let period = Duration::from_secs(config.sync_interval_minutes * 60);
            tracing::info!(
                interval_minutes = config.sync_interval_minutes,
                "Starting sync daemon"
            );
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = runner.trigger_sync().await {
                    tracing::error!(error = %e, "Sync run failed, retrying next interval");
                }
            }
        }
        Command::Status { sync_id } => match db.get_sync_run(sync_id).await? {
            Some(run) => {
                println!("sync run {}: {}", run.id, run.status.as_str());
                println!("  started:  {}", run.started_at);
                if let Some(finished) = run.finished_at {
                    println!("  finished: {finished}");
                }
                println!("  articles: {}", run.articles_fetched);
                println!("  api calls: {}", run.api_calls);
                for error in &run.errors {
                    println!("  error: {error}");
                }
            }
            None => bail!("no sync run with id {sync_id}"),
        },
    }

    Ok(())
}

fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedsync"))
}

fn build_runner(db: Database, config: &Config) -> Result<SyncRunner> {
    let Some(upstream_url) = config.upstream_url.as_deref() else {
        bail!("upstream_url is not configured; set it in config.toml");
    };
    // reqwest joins relative endpoint paths, so the base must end in a slash
    let mut base = upstream_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).with_context(|| format!("invalid upstream_url {upstream_url}"))?;

    // Env var wins over the config file so the token can stay out of it
    let token = match std::env::var("FEEDSYNC_API_TOKEN") {
        Ok(token) if !token.is_empty() => SecretString::from(token),
        _ => match &config.api_token {
            Some(token) => SecretString::from(token.clone()),
            None => bail!("no API token; set FEEDSYNC_API_TOKEN or api_token in config.toml"),
        },
    };

    let tracker = QuotaTracker::new(db.clone(), config.daily_quota_limit, config.timezone()?);
    let client = UpstreamClient::new(base, token);
    let opts = SyncOptions {
        global_article_cap: config.global_article_cap,
        per_feed_article_cap: config.per_feed_article_cap,
        retention_limit: config.retention_limit,
    };
    Ok(SyncRunner::new(db, client, tracker, opts))
}

async fn print_run(runner: &SyncRunner, sync_id: i64) -> Result<()> {
    let Some(run) = runner.get_sync_status(sync_id).await? else {
        bail!("sync run {sync_id} vanished after completion");
    };
    println!(
        "sync run {} {}: {} articles, {} api calls",
        run.id,
        run.status.as_str(),
        run.articles_fetched,
        run.api_calls
    );
    for error in &run.errors {
        println!("  error: {error}");
    }
    Ok(())
}
