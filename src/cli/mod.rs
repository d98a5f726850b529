use clap::{Parser, Subcommand};
use statepop::config::Config;
use statepop::server::{self, AppState};
use statepop::services::{
    ArcGisCountySource, CycleOutcome, Fetcher, Hydration, QueryService, RefreshScheduler,
    SnapshotStore, StateEntry,
};
use statepop::types::StatePopError;
use std::sync::Arc;
use tracing::{info, warn};

/// County-to-state population service
#[derive(Parser)]
#[command(name = "statepop")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh on a schedule and serve HTTP (default)
    Serve,

    /// Run one refresh cycle and commit it to the snapshot file
    Refresh {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the stored snapshot without touching the network
    Show {
        /// Single state, matched case-insensitively
        #[arg(long)]
        state: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            None | Some(Commands::Serve) => serve(&self.config).await,
            Some(Commands::Refresh { json }) => refresh_once(&self.config, json).await,
            Some(Commands::Show { state, json }) => show(&self.config, state.as_deref(), json),
        }
    }
}

fn build_scheduler(config: &Config, store: Arc<SnapshotStore>) -> anyhow::Result<RefreshScheduler> {
    let source = ArcGisCountySource::new(
        config.upstream_url.clone(),
        config.upstream_timeout(),
        config.page_size,
    )?;
    Ok(RefreshScheduler::new(
        Fetcher::new(Arc::new(source)),
        store,
        config.refresh,
    ))
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SnapshotStore::new(config.snapshot_file.clone()));
    match store.hydrate() {
        Ok(Hydration::Restored { states, updated_at }) => {
            info!(states, %updated_at, "serving hydrated snapshot until first refresh")
        }
        Ok(Hydration::Missing) => info!("no snapshot file, waiting on first refresh"),
        Ok(Hydration::Superseded) => {}
        Err(e) => warn!(error = %e, "snapshot file discarded, refreshing immediately"),
    }

    let scheduler = Arc::new(build_scheduler(config, store.clone())?);
    let refresh_loop = scheduler.spawn();

    let app = server::router(AppState {
        query: QueryService::new(store),
        scheduler: Some(scheduler),
    });

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("statepop listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh_loop.abort();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn refresh_once(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = Arc::new(SnapshotStore::new(config.snapshot_file.clone()));
    let scheduler = build_scheduler(config, store.clone())?;

    match scheduler.run_cycle().await {
        CycleOutcome::Committed { .. } => {
            let current = QueryService::new(store).get_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&current.snapshot)?);
            } else {
                print_table(current.snapshot.iter());
            }
            Ok(())
        }
        CycleOutcome::Skipped(e) => Err(e.into()),
        CycleOutcome::AlreadyRunning => anyhow::bail!("refresh already in progress"),
    }
}

fn show(config: &Config, state: Option<&str>, json: bool) -> anyhow::Result<()> {
    if !config.snapshot_file.exists() {
        return Err(StatePopError::NoData.into());
    }
    let current = SnapshotStore::load_file(&config.snapshot_file)?;

    match state {
        Some(name) => {
            let (state, population) = current
                .snapshot
                .get_ignore_case(name.trim())
                .ok_or_else(|| StatePopError::NotFound(name.trim().to_string()))?;
            let entry = StateEntry {
                state: state.to_string(),
                population,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                print_table(std::iter::once((entry.state.as_str(), entry.population)));
            }
        }
        None => {
            if json {
                println!("{}", serde_json::to_string_pretty(&current.snapshot)?);
            } else {
                print_table(current.snapshot.iter());
                println!("updated {}", current.updated_at.to_rfc3339());
            }
        }
    }
    Ok(())
}

fn print_table<'a>(rows: impl Iterator<Item = (&'a str, u64)>) {
    for (state, population) in rows {
        println!("{:<24} {:>12}", state, population);
    }
}
