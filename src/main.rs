use clap::Parser;
use serde::Serialize;

mod app;
mod backfill;
mod cache;
mod cli;
mod config;
mod db;
mod error;
mod fetch;
mod models;
mod refresh;

use app::App;
use cli::{BackfillCommand, Cli, Commands};
use config::Config;
use error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("forum_ingest=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let app = App::new(config).await?;

    match cli.command {
        Commands::Serve => {
            app.start().await;
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutting down");
            app.stop().await;
        }
        Commands::Refresh { tiers } => print_json(&app.refresh_now(&tiers).await)?,
        Commands::Topics { sources, stored } => {
            if stored {
                print_json(&app.get_stored_topics(&sources).await?)?
            } else {
                print_json(&app.get_cached_topics(&sources).await)?
            }
        }
        Commands::Stats => print_json(&app.get_cache_stats().await)?,
        Commands::ClearCache => app.clear_cache().await?,
        Commands::Backfill(command) => run_backfill(&app, command).await?,
    }

    Ok(())
}

async fn run_backfill(app: &App, command: BackfillCommand) -> Result<()> {
    match command {
        BackfillCommand::Start { source } => print_json(&app.start_backfill(&source).await?),
        BackfillCommand::Run { cycles } => {
            let mut reports = Vec::new();
            for _ in 0..cycles {
                match app.run_backfill_cycle().await? {
                    Some(report) => reports.push(report),
                    None => break,
                }
            }
            print_json(&reports)
        }
        BackfillCommand::Init => {
            let created = app.init_backfill_for_all_sources().await?;
            print_json(&serde_json::json!({ "created": created }))
        }
        BackfillCommand::Pause { job_id } => print_json(&app.pause_job(job_id).await?),
        BackfillCommand::Resume { job_id } => print_json(&app.resume_job(job_id).await?),
        BackfillCommand::Retry { job_id } => print_json(&app.retry_job(job_id).await?),
        BackfillCommand::Status => print_json(&app.get_backfill_status().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
