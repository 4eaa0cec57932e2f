use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use siphon_client::SearchConsoleClient;
use siphon_core::{
    AppError, JobManager, JobStatus, JobStatusView, PrunePreview, PruneSummary,
    RetentionPruner, SiphonConfig, TracingReporter, load_config,
};
use siphon_db::SqliteRecordStore;

mod config;

use config::{Command, Config};

type Manager = JobManager<SearchConsoleClient, SqliteRecordStore>;

/// How often a running sync prints its progress.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::parse();

    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install the log subscriber")?;

    let settings = load_config(config.config.clone()).map_err(user_error)?;

    info!("Opening database...");
    let store = SqliteRecordStore::connect(&config.database_url, &settings.db)
        .await
        .map_err(user_error)
        .context("Failed to open the local database")?;

    match config.command {
        Command::Sync { property, options } => {
            let manager = build_manager(&config.api_base, config.access_token, &settings, store)?;
            let job_id = manager
                .start_sync(property, options.into_options())
                .map_err(user_error)?;
            run_job(&manager, job_id).await?;
        }
        Command::SyncAll { options } => {
            let manager = build_manager(&config.api_base, config.access_token, &settings, store)?;
            let job_id = manager
                .start_sync_all(options.into_options())
                .await
                .map_err(user_error)?;
            run_job(&manager, job_id).await?;
        }
        Command::Prune { property, preview } => {
            let pruner = RetentionPruner::new(store, settings.retention.clone());
            handle_prune(&pruner, property, preview).await?;
        }
        Command::Properties => {
            let client = build_client(&config.api_base, config.access_token, &settings)?;
            list_properties(&client, &store).await?;
        }
    }

    Ok(())
}

/// Wraps an `AppError` in its CLI-friendly message.
fn user_error(err: AppError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

fn build_client(
    api_base: &str,
    access_token: Option<String>,
    settings: &SiphonConfig,
) -> anyhow::Result<SearchConsoleClient> {
    let token = access_token.ok_or_else(|| {
        anyhow::anyhow!("SIPHON_ACCESS_TOKEN is not set. Export it or pass --access-token")
    })?;
    SearchConsoleClient::new(api_base, token, settings.http.clone()).map_err(user_error)
}

fn build_manager(
    api_base: &str,
    access_token: Option<String>,
    settings: &SiphonConfig,
    store: SqliteRecordStore,
) -> anyhow::Result<Manager> {
    let client = build_client(api_base, access_token, settings)?;
    Ok(JobManager::with_config(
        client,
        store,
        settings.sync.clone(),
        settings.retention.clone(),
        Arc::new(TracingReporter),
    ))
}

/// Drives a started job to completion: prints progress periodically and
/// cancels the job on Ctrl+C. Fails when the job ends `failed`.
async fn run_job(manager: &Manager, job_id: Uuid) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    // The first tick completes immediately
    ticker.tick().await;

    let completion = manager.wait_for_completion(job_id);
    tokio::pin!(completion);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    let status = loop {
        tokio::select! {
            status = &mut completion => break status.map_err(user_error)?,
            _ = ticker.tick() => print_progress(&manager.get_status(job_id)),
            signal = &mut ctrl_c, if !cancel_requested => {
                signal.context("Failed to listen for Ctrl+C")?;
                cancel_requested = true;
                warn!("Cancelling, waiting for in-flight requests to stop...");
                manager.cancel_job(job_id);
            }
        }
    };

    print_job_summary(&status);

    if status.status == JobStatus::Failed {
        anyhow::bail!("Sync job {} failed", job_id);
    }
    Ok(())
}

fn print_progress(view: &JobStatusView) {
    let progress = &view.progress;
    let percent = if progress.estimated_total_rows > 0 {
        (progress.rows_fetched as f64 / progress.estimated_total_rows as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    info!(
        "Progress: {}/{} properties, {} rows fetched (~{:.0}%), {} API calls{}",
        progress.properties_completed,
        progress.properties_total,
        progress.rows_fetched,
        percent,
        progress.api_calls_made,
        if progress.current_properties.is_empty() {
            String::new()
        } else {
            format!(" [{}]", progress.current_properties.join(", "))
        }
    );
}

/// Print a summary of a finished sync job.
fn print_job_summary(view: &JobStatusView) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("SYNC {}", view.status.as_str().to_uppercase());
    info!("═══════════════════════════════════════════════════════");
    info!("  Job:                 {}", view.id);
    info!("  Properties:          {}", view.properties.len());
    info!("  Rows inserted:       {}", view.rows_inserted());
    info!("  API calls:           {}", view.progress.api_calls_made);

    if !view.results.is_empty() {
        info!("───────────────────────────────────────────────────────");
        for result in &view.results {
            let range = result
                .range
                .map(|r| r.to_string())
                .unwrap_or_else(|| "up to date".to_string());
            info!(
                "  {:<30} {:<10} {:>8} rows  {}",
                result.property,
                result.status.as_str(),
                result.rows_inserted,
                range
            );
            if let Some(err) = &result.error {
                error!("    {}", err);
            }
            if let Some(pruning) = &result.pruning {
                info!("    pruned {} rows", pruning.total_deleted());
            }
        }
    }

    if let Some(err) = &view.error {
        info!("───────────────────────────────────────────────────────");
        error!("  {}", err);
    }
    info!("═══════════════════════════════════════════════════════");
}

async fn handle_prune(
    pruner: &RetentionPruner<SqliteRecordStore>,
    property: Option<String>,
    preview: bool,
) -> anyhow::Result<()> {
    info!("Retention cutoff: {}", pruner.cutoff());

    if preview {
        let previews = match property {
            Some(property) => vec![pruner.preview(&property).await.map_err(user_error)?],
            None => pruner.preview_all().await.map_err(user_error)?,
        };
        print_previews(&previews);
    } else {
        let summaries = match property {
            Some(property) => vec![pruner.prune(&property).await.map_err(user_error)?],
            None => pruner.prune_all().await.map_err(user_error)?,
        };
        print_prune_summaries(&summaries);
    }

    Ok(())
}

fn print_previews(previews: &[PrunePreview]) {
    if previews.is_empty() {
        println!("No stored properties.");
        return;
    }

    println!(
        "\n{:<30} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "PROPERTY", "ROWS", "RECENT", "CLICKED", "DELETE", "KEEP"
    );
    for preview in previews {
        println!(
            "{:<30} {:>10} {:>10} {:>10} {:>10} {:>10}",
            preview.property,
            preview.total_rows,
            preview.protected_recent,
            preview.with_clicks,
            preview.would_delete(),
            preview.would_keep
        );
    }
    println!();
}

fn print_prune_summaries(summaries: &[PruneSummary]) {
    if summaries.is_empty() {
        println!("Nothing pruned.");
        return;
    }

    for summary in summaries {
        println!(
            "{:<30} deleted {:>8} ({} target, {} non-target){}",
            summary.property,
            summary.total_deleted(),
            summary.deleted_target,
            summary.deleted_non_target,
            if summary.compacted { ", compacted" } else { "" }
        );
    }
}

async fn list_properties(
    client: &SearchConsoleClient,
    store: &SqliteRecordStore,
) -> anyhow::Result<()> {
    let properties = client.list_sites().await.map_err(user_error)?;

    if properties.is_empty() {
        println!("No properties are accessible with these credentials.");
        return Ok(());
    }

    println!("\n{:<45} {:<10} {}", "PROPERTY", "STATUS", "LAST SYNCED");
    for property in &properties {
        let status = store
            .get_property_status(property)
            .await
            .map_err(user_error)?;
        let (state, last_synced) = match status {
            Some(s) => (s.sync_status, s.last_synced_at.unwrap_or_else(|| "-".to_string())),
            None => ("never".to_string(), "-".to_string()),
        };
        println!("{:<45} {:<10} {}", property, state, last_synced);
    }
    println!();

    Ok(())
}
