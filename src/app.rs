use crate::cli::Command;
use crate::collector::orchestrator::summarize;
use crate::collector::{Collector, CycleRunner, CycleTrigger, StatsScheduler};
use crate::config::Config;
use crate::data::{
    MemorySnapshotStore, PgRoster, PgSnapshotStore, RosterSource, SnapshotStore, StaticRoster,
};
use crate::platforms::{Platform, PlatformAdapter, PlatformSet};
use crate::utils::{fmt_duration, log_if_slow, truncate};
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    store: Arc<dyn SnapshotStore>,
    runner: CycleRunner,
}

impl App {
    /// Wire adapters, roster and store together.
    ///
    /// With `roster_file`, the roster is read from disk and snapshots are kept
    /// in memory; otherwise both live in PostgreSQL.
    pub async fn new(config: Config, roster_file: Option<&Path>) -> Result<Self, anyhow::Error> {
        let adapters = PlatformSet::live(&config.platform_settings())
            .context("Failed to build platform clients")?;

        let (roster, store): (Arc<dyn RosterSource>, Arc<dyn SnapshotStore>) = match roster_file {
            Some(path) => {
                let roster = StaticRoster::from_file(path)?;
                info!(
                    path = %path.display(),
                    students = roster.len(),
                    "Using roster file with in-memory snapshot store"
                );
                (Arc::new(roster), Arc::new(MemorySnapshotStore::new()))
            }
            None => {
                let pool = Self::connect(&config).await?;
                (
                    Arc::new(PgRoster::new(pool.clone())),
                    Arc::new(PgSnapshotStore::new(pool)),
                )
            }
        };

        let collector = Collector::new(adapters, store.clone(), config.retry_policy())
            .with_retry_unresolvable(config.retry_unresolvable);
        let runner = CycleRunner::new(Arc::new(collector), roster, config.batch_settings());

        Ok(App {
            config,
            store,
            runner,
        })
    }

    /// Create the pool and run embedded migrations.
    async fn connect(config: &Config) -> Result<sqlx::PgPool, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);

        let connect_options = sqlx::postgres::PgConnectOptions::from_str(config.database_url()?)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        // Workers append concurrently; size the pool to the worker limit.
        let max_connections = u32::try_from(config.worker_limit.clamp(2, 16)).unwrap_or(4);

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        let start = Instant::now();
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        log_if_slow(start, Duration::from_secs(5), "database migrations");
        info!("Database migrations completed successfully");

        Ok(db_pool)
    }

    /// Execute a command to completion.
    pub async fn run(self, command: Command) -> ExitCode {
        match command {
            Command::Serve => self.serve().await,
            Command::Cycle => self.cycle_once().await,
            Command::Fetch { id } => self.fetch_one(id).await,
            Command::History { id, platform, days } => self.print_history(id, platform, days).await,
            Command::Validate { platform, handle } => {
                validate_handle(&self.config, platform, &handle).await
            }
        }
    }

    /// Run the periodic scheduler until SIGINT/SIGTERM.
    async fn serve(self) -> ExitCode {
        let scheduler = StatsScheduler::new(
            self.runner.clone(),
            self.config.fetch_interval,
            self.config.shutdown_timeout,
        );
        spawn_manual_trigger(scheduler.trigger_handle());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        tokio::select! {
            _ = shutdown_signal() => {
                info!("Shutdown signal received, stopping scheduler");
                let _ = shutdown_tx.send(());

                // The scheduler enforces its own timeout; this only guards against a hang.
                let grace = self.config.shutdown_timeout + Duration::from_secs(1);
                match tokio::time::timeout(grace, handle).await {
                    Ok(Ok(())) => {
                        info!("Graceful shutdown complete");
                        ExitCode::SUCCESS
                    }
                    Ok(Err(e)) => {
                        error!(error = ?e, "Scheduler task failed during shutdown");
                        ExitCode::FAILURE
                    }
                    Err(_) => {
                        warn!(timeout = fmt_duration(grace), "Scheduler did not stop in time");
                        ExitCode::FAILURE
                    }
                }
            }
            result = &mut handle => {
                error!(result = ?result, "Scheduler exited unexpectedly");
                ExitCode::FAILURE
            }
        }
    }

    /// Run a single full cycle; an interrupt stops it after the current batch.
    async fn cycle_once(self) -> ExitCode {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                shutdown_signal().await;
                info!("Interrupted, finishing current batch");
                cancel.cancel();
            }
        });

        match self.runner.run_full_cycle(CycleTrigger::Manual, &cancel).await {
            Ok(report) => {
                println!(
                    "{} students in {} batches: {} succeeded, {} failed, {} unsaved{}",
                    report.students,
                    report.batch_sizes.len(),
                    report.succeeded,
                    report.failed,
                    report.unsaved,
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                if report.unsaved > 0 || report.panicked > 0 {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                error!(error = ?e, "Collection cycle failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn fetch_one(self, student_id: i32) -> ExitCode {
        match self.runner.fetch_student(student_id).await {
            Ok(Some(report)) => {
                println!("student {student_id}: {}", summarize(&report));
                if report.unsaved() > 0 {
                    ExitCode::FAILURE
                } else {
                    ExitCode::SUCCESS
                }
            }
            Ok(None) => {
                eprintln!("no student with id {student_id}");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(error = ?e, student_id, "On-demand fetch failed");
                ExitCode::FAILURE
            }
        }
    }

    async fn print_history(self, student_id: i32, platform: Platform, days: u32) -> ExitCode {
        let history = match self.store.history(student_id, platform, days).await {
            Ok(history) => history,
            Err(e) => {
                error!(error = ?e, student_id, %platform, "Failed to load history");
                return ExitCode::FAILURE;
            }
        };

        if history.is_empty() {
            println!(
                "no {} snapshots for student {student_id} in the last {days} days",
                platform.display_name()
            );
            return ExitCode::SUCCESS;
        }

        for snapshot in &history {
            let detail = match &snapshot.error_message {
                Some(message) => truncate(message, 80),
                None => format!(
                    "solved {}, rating {}",
                    snapshot.solved,
                    snapshot
                        .rating
                        .map_or_else(|| "-".to_string(), |r| r.to_string())
                ),
            };
            println!(
                "{}  {:<7}  {detail}",
                snapshot.captured_at.format("%Y-%m-%d %H:%M:%S"),
                snapshot.fetch_status
            );
        }
        ExitCode::SUCCESS
    }
}

/// Check that `handle` exists on `platform`.
pub async fn validate_handle(config: &Config, platform: Platform, handle: &str) -> ExitCode {
    let adapters = match PlatformSet::live(&config.platform_settings()) {
        Ok(adapters) => adapters,
        Err(e) => {
            error!(error = ?e, "Failed to build platform clients");
            return ExitCode::FAILURE;
        }
    };
    let Some(adapter) = adapters.get(platform) else {
        error!(%platform, "No adapter registered");
        return ExitCode::FAILURE;
    };

    if adapter.validate(handle).await {
        println!("{handle} exists on {}", platform.display_name());
        ExitCode::SUCCESS
    } else {
        println!("{handle} was not found on {}", platform.display_name());
        ExitCode::FAILURE
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// SIGUSR1 starts a full cycle immediately.
#[cfg(unix)]
fn spawn_manual_trigger(trigger: Arc<Notify>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigusr1 = match signal(SignalKind::user_defined1()) {
        Ok(sigusr1) => sigusr1,
        Err(e) => {
            warn!(error = ?e, "Failed to install SIGUSR1 handler, manual trigger disabled");
            return;
        }
    };

    tokio::spawn(async move {
        while sigusr1.recv().await.is_some() {
            trigger.notify_one();
        }
    });
}

#[cfg(not(unix))]
fn spawn_manual_trigger(_trigger: Arc<Notify>) {}
