mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, MigrationCommands};
use hermes_migrate::config::Config;
use hermes_migrate::manager::{CreateJobRequest, ManagerError, MigrationManager};
use hermes_migrate::outbox::Reaper;
use hermes_migrate::store::MigrationStore;
use hermes_migrate::validator::Validator;
use hermes_migrate::worker::WorkerPool;

// Exit codes: 0 success, 1 validation failed, 2 invalid arguments,
// 3 not found. Clap reports its own parse failures with code 2.
const EXIT_OK: u8 = 0;
const EXIT_VALIDATION_FAILED: u8 = 1;
const EXIT_INVALID_ARGS: u8 = 2;
const EXIT_NOT_FOUND: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let store = match MigrationStore::open(&config.store.path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "Failed to open migration store");
            return ExitCode::from(EXIT_VALIDATION_FAILED);
        }
    };

    let registry = match config.build_registry() {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!(error = %err, "Failed to build provider registry");
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let manager = MigrationManager::new(store.clone(), registry.clone());

    let code = match cli.command {
        Commands::Migration(args) => run_migration(&manager, args.command).await,
        Commands::Worker => run_worker(&config, store, registry).await,
    };

    ExitCode::from(code)
}

fn load_config(path: Option<PathBuf>) -> Result<Config, hermes_migrate::config::ConfigError> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

async fn run_migration(manager: &MigrationManager, command: MigrationCommands) -> u8 {
    match command {
        MigrationCommands::Create {
            name,
            source,
            dest,
            strategy,
            concurrency,
            batch_size,
            max_attempts,
            dry_run,
            validate,
        } => {
            let request = CreateJobRequest {
                name,
                source_provider: source,
                dest_provider: dest,
                strategy: Some(strategy),
                concurrency,
                batch_size,
                max_attempts,
                dry_run,
                validate_after: validate,
                rollback_enabled: false,
            };
            match manager.create_job(request) {
                Ok(job) => {
                    println!("created job {} ({})", job.id, job.job_uuid);
                    EXIT_OK
                }
                Err(err) => report(err),
            }
        }

        MigrationCommands::Queue { job, docs } => match manager.queue_documents(job, docs) {
            Ok(outcome) => {
                println!("queued {} documents ({} duplicates skipped)", outcome.queued, outcome.duplicates);
                EXIT_OK
            }
            Err(err) => report(err),
        },

        MigrationCommands::Start { job } => match manager.start_job(job) {
            Ok(job) => {
                println!("job {} running", job.id);
                EXIT_OK
            }
            Err(err) => report(err),
        },

        MigrationCommands::Status { job } => {
            let all_jobs = job.is_none();
            let jobs = match job {
                Some(id) => match manager.get_job(id) {
                    Ok(job) => vec![job],
                    Err(err) => return report(err),
                },
                None => match manager.list_jobs() {
                    Ok(jobs) => jobs,
                    Err(err) => return report(err),
                },
            };

            for job in jobs {
                match manager.get_progress(job.id) {
                    Ok(progress) => {
                        let eta = progress
                            .eta_seconds
                            .map(|s| format!(", eta {}s", s))
                            .unwrap_or_default();
                        println!(
                            "job {} [{}] {}: {}/{} migrated, {} failed, {} skipped ({:.1}%{})",
                            job.id,
                            job.status,
                            job.name,
                            progress.migrated_documents,
                            progress.total_documents,
                            progress.failed_documents,
                            progress.skipped_documents,
                            progress.percent,
                            eta,
                        );
                    }
                    Err(err) => return report(err),
                }
            }

            if all_jobs {
                match manager.store().stats() {
                    Ok(stats) => println!(
                        "store: {} jobs, {} items, {} outbox events",
                        stats.job_count, stats.item_count, stats.event_count
                    ),
                    Err(err) => return report(err.into()),
                }
            }
            EXIT_OK
        }

        MigrationCommands::Validate { job } => {
            let validator = Validator::new(manager.store().clone(), manager.registry().clone());
            match validator.validate_job(job).await {
                Ok(report_result) => {
                    let passed = report_result.all_passed();
                    if let Err(err) = manager.record_validation(job, passed) {
                        return report(err);
                    }
                    if passed {
                        println!("validation passed: {} checks", report_result.checks.len());
                        EXIT_OK
                    } else {
                        for check in report_result.failures() {
                            println!(
                                "FAIL [{}] {}: {} (expected {}, actual {})",
                                check.category, check.name, check.message, check.expected, check.actual
                            );
                        }
                        println!(
                            "validation failed: {}/{} checks passed",
                            report_result.passed_count(),
                            report_result.checks.len()
                        );
                        EXIT_VALIDATION_FAILED
                    }
                }
                Err(hermes_migrate::validator::ValidatorError::JobNotFound(id)) => {
                    error!(job_id = id, "Job not found");
                    EXIT_NOT_FOUND
                }
                Err(err) => {
                    error!(error = %err, "Validation errored");
                    EXIT_VALIDATION_FAILED
                }
            }
        }

        MigrationCommands::Cancel { job } => match manager.cancel_job(job) {
            Ok(job) => {
                println!("job {} cancelled", job.id);
                EXIT_OK
            }
            Err(err) => report(err),
        },

        MigrationCommands::Requeue { job } => match manager.requeue_failed(job) {
            Ok(count) => {
                println!("requeued {} failed events", count);
                EXIT_OK
            }
            Err(err) => report(err),
        },
    }
}

/// Run the worker pool and reaper until interrupted.
async fn run_worker(
    config: &Config,
    store: Arc<MigrationStore>,
    registry: Arc<hermes_migrate::provider::ProviderRegistry>,
) -> u8 {
    let pool = WorkerPool::spawn(store.clone(), registry, config.worker_config());
    let reaper = Reaper::new(store, config.reaper_config());
    let reaper_handle = tokio::spawn(reaper.run(pool.shutdown_signal()));

    shutdown_signal().await;

    pool.shutdown().await;
    let _ = reaper_handle.await;
    EXIT_OK
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Log a manager error and map it to the documented exit code.
fn report(err: ManagerError) -> u8 {
    error!(error = %err, "Command failed");
    match err {
        ManagerError::JobNotFound(_) | ManagerError::UnknownProvider(_) => EXIT_NOT_FOUND,
        ManagerError::InvalidRequest(_) | ManagerError::InvalidState { .. } => EXIT_INVALID_ARGS,
        ManagerError::Store(_) => EXIT_VALIDATION_FAILED,
    }
}
