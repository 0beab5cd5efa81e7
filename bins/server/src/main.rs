#![forbid(unused_must_use)]
// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

use crate::backend_registry::BackendRegistry;
use crate::consumers::Batching;
use anyhow::Context;
use app_config::AppConfig;
use blob_store::BlobStore;
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use directories::ProjectDirs;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use hyper::Server;
use rendezvous::Rendezvous;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tracing::{debug, error, info, warn};
use upload_pipeline::{
    log_error_chain, EventIngestor, ReplayCoordinator, RetryCoordinator, RetryPolicy,
    RetryPublisher, Timeouts, UploadPipeline,
};

mod backend_registry;
mod commands;
mod consumers;
mod handlers;
mod health;
mod logging;

#[derive(Clone)]
pub struct AppState {
    shutdown_tx: broadcast::Sender<()>,
    registry: Arc<BackendRegistry>,
    replayer: Arc<ReplayCoordinator>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let matches = commands::build_command().get_matches();
    logging::initialize_from_matches(&matches);

    info!("Hi. 👋");

    let dirs = match ProjectDirs::from("io.github", "upload-processor", "upload-processor") {
        Some(dirs) => dirs,
        None => {
            error!("Could not determine the project directories");
            return ExitCode::FAILURE;
        }
    };

    let cfg = match AppConfig::load(dirs.config_local_dir(), &matches) {
        Ok(config) => config,
        Err(_) => {
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    let registry = match BackendRegistry::from_config(&cfg)
        .await
        .context("Unable to set up the storage accounts and streams")
    {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(exitcode::UNAVAILABLE as u8);
        }
    };

    let timeouts = Timeouts::from(&cfg.timeouts);
    let streams = registry.streams().clone();
    let replayer = Arc::new(ReplayCoordinator::new(
        streams.replay.clone(),
        RetryPublisher::new(streams.retry.clone(), streams.replay.clone(), timeouts),
        cfg.replay.batch_size,
        timeouts,
    ));

    let exit_code = match matches.subcommand() {
        Some((commands::SERVE, serve)) => run_service(&cfg, serve, registry, replayer).await,
        Some((commands::REPLAY, replay)) => {
            let until = replay.get_one::<DateTime<Utc>>("until").copied();
            replay_once(&replayer, until).await
        }
        _ => ExitCode::from(exitcode::USAGE as u8),
    };

    info!("Bye. 👋");
    exit_code
}

/// Runs the consumer loops and the HTTP servers until shut down.
async fn run_service(
    cfg: &AppConfig,
    matches: &ArgMatches,
    registry: Arc<BackendRegistry>,
    replayer: Arc<ReplayCoordinator>,
) -> ExitCode {
    let pipeline = match build_pipeline(cfg, &registry) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    // Provide a signal that can be used to shut down the server.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    if let Err(e) = register_shutdown_handler(shutdown_tx.clone()) {
        error!("Error setting process termination handler: {e}");
        return ExitCode::FAILURE;
    }

    // Create a rendezvous channel to ensure all relevant tasks have been shut down.
    let rendezvous = Rendezvous::new();

    let batching = Batching::from(&cfg.consumer);
    let streams = registry.streams().clone();
    tokio::spawn(consumers::run_ingest(
        streams.ingest,
        EventIngestor::new(pipeline.clone()),
        batching,
        shutdown_tx.subscribe(),
        rendezvous.fork_guard(),
    ));
    tokio::spawn(consumers::run_retries(
        streams.retry,
        RetryCoordinator::new(pipeline, RetryPolicy::from(&cfg.retry)),
        batching,
        shutdown_tx.subscribe(),
        rendezvous.fork_guard(),
    ));

    if let Some(seconds) = cfg.replay.interval_secs.filter(|s| *s > 0) {
        tokio::spawn(consumers::run_replay_schedule(
            replayer.clone(),
            Duration::from_secs(seconds),
            shutdown_tx.subscribe(),
            rendezvous.fork_guard(),
        ));
    }

    // The application state is shared with the Axum servers.
    let app_state = AppState {
        shutdown_tx: shutdown_tx.clone(),
        registry,
        replayer,
    };

    let exit_code = serve_requests(matches, app_state).await.err();

    // If all servers are shut down, ensure the news is broadcast as well.
    stop_all_servers(shutdown_tx);
    rendezvous.rendezvous_async().await.ok();

    exit_code.unwrap_or(ExitCode::SUCCESS)
}

fn build_pipeline(cfg: &AppConfig, registry: &BackendRegistry) -> anyhow::Result<Arc<UploadPipeline>> {
    let stores = registry
        .pipeline_stores(cfg)
        .context("Unable to resolve the storage accounts of the pipeline")?;
    info!(
        ingest = %stores.ingest.account(),
        primary = %stores.primary.account(),
        targets = stores.targets.len(),
        "Pipeline wired"
    );
    Ok(Arc::new(UploadPipeline::new(
        cfg,
        stores,
        registry.pipeline_streams(),
    )))
}

async fn replay_once(replayer: &ReplayCoordinator, until: Option<DateTime<Utc>>) -> ExitCode {
    let cutoff = until.unwrap_or_else(Utc::now);
    match replayer.replay_until(cutoff).await {
        Ok(summary) => {
            info!(
                replayed = summary.replayed,
                dropped = summary.dropped,
                reached_cutoff = summary.reached_cutoff,
                "Replay completed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Replay failed");
            log_error_chain(&e);
            ExitCode::from(exitcode::TEMPFAIL as u8)
        }
    }
}

fn stop_all_servers(shutdown_tx: broadcast::Sender<()>) {
    // We take ownership of this channel so that it'll be closed after.
    shutdown_tx.send(()).ok();
}

async fn serve_requests(matches: &ArgMatches, app_state: AppState) -> Result<(), ExitCode> {
    let shutdown_tx = app_state.shutdown_tx.clone();

    let app = handlers::build_router(app_state);
    let make_svc = app.into_make_service();
    let service_builder = ServiceBuilder::new().service(make_svc);

    // Get the HTTP socket addresses to bind on.
    let http_sockets: Vec<SocketAddr> = matches
        .get_many("bind_http")
        .into_iter()
        .flatten()
        .cloned()
        .collect();

    let mut servers = FuturesUnordered::new();
    for addr in http_sockets {
        let mut shutdown_rx = shutdown_tx.subscribe();

        let builder = match Server::try_bind(&addr) {
            Ok(builder) => {
                info!("Now listening on http://{addr}", addr = addr);
                builder
            }
            Err(e) => {
                error!("Unable to bind to {addr}: {error}", addr = addr, error = e);

                // No servers are currently running since no await was called on any
                // of them yet. Therefore, exiting here is "graceful".
                return Err(ExitCode::from(exitcode::NOPERM as u8));
            }
        };

        let server = builder
            .serve(service_builder.clone())
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await.ok();
            });

        servers.push(server);
    }

    // Wait for all servers to stop.
    let mut exit_code = None;
    while let Some(result) = servers.next().await {
        match result {
            Ok(()) => {
                debug!("A server stopped")
            }
            Err(e) => {
                error!("Server error: {}", e);
                if exit_code.is_none() {
                    exit_code = Some(ExitCode::FAILURE);
                }
            }
        }

        // Ensure that all other servers also shut down in presence
        // of an error of any one of them.
        shutdown_tx.send(()).ok();
    }

    if let Some(exit_code) = exit_code {
        Err(exit_code)
    } else {
        Ok(())
    }
}

fn register_shutdown_handler(shutdown_tx: broadcast::Sender<()>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        warn!("Initiating shutdown from OS");
        shutdown_tx.send(()).ok();
    })
}
