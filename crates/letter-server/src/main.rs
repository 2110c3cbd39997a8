//! Letter workflow service executable

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use letter_core::{
    config::StorageBackend, paths, BulkTriggerInbox, DocumentRenderer, EmailDispatcher, FileStore,
    HttpMailer, HttpRenderer, LetterConfig, LetterStore, LetterWorkflow, MemoryStore, StubMailer,
    StubRenderer, WorkflowSettings,
};
use letter_server::{monitor::monitor_triggers, router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("letter-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Employee letter generation and delivery service")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path (default /app/config/letters.json)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory for letters, bulk operations and triggers (overrides config)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("HTTP port (overrides config)"),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Start the HTTP API")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("monitor-triggers")
                .long("monitor-triggers")
                .help("Watch the trigger directory for bulk requests")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("memory-store")
                .long("memory-store")
                .help("Keep all records in memory instead of the data directory")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Use in-process renderer and mailer stubs")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let serve = matches.get_flag("serve");
    let monitor = matches.get_flag("monitor-triggers");
    if !serve && !monitor {
        log::error!("No action specified. Use --help for options.");
        std::process::exit(1);
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(paths::default_config_path);
    let config = LetterConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    log::info!("Loaded configuration from {}", config_path.display());

    let data_dir = matches
        .get_one::<String>("data-dir")
        .cloned()
        .unwrap_or_else(|| config.storage.data_dir.clone());
    if let Err(e) = paths::init_data_root(data_dir.clone()) {
        log::warn!("Data root initialization warning: {}", e);
    }
    log::info!("Using data directory: {}", data_dir);

    let store: Arc<dyn LetterStore> =
        if matches.get_flag("memory-store") || config.storage.backend == StorageBackend::Memory {
            log::warn!("Using in-memory store; records are lost on restart");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(FileStore::new(paths::data_root())?)
        };

    let (renderer, mailer): (Arc<dyn DocumentRenderer>, Arc<dyn EmailDispatcher>) =
        if matches.get_flag("dry-run") {
            log::warn!("Dry run: documents and emails are produced by in-process stubs");
            (Arc::new(StubRenderer::new()), Arc::new(StubMailer::new()))
        } else {
            (
                Arc::new(HttpRenderer::new(config.renderer.clone())?),
                Arc::new(HttpMailer::new(config.mailer.clone())?),
            )
        };

    let workflow = Arc::new(LetterWorkflow::new(
        store,
        renderer,
        mailer,
        WorkflowSettings::from(&config),
    )?);

    let reconciled = workflow.bulk().reconcile_interrupted().await?;
    if reconciled > 0 {
        log::warn!("Closed {} bulk operation(s) interrupted by a previous shutdown", reconciled);
    }

    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(config.server.port);

    let server_workflow = workflow.clone();
    let server_handle = tokio::spawn(async move {
        if !serve {
            return std::future::pending::<anyhow::Result<()>>().await;
        }
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        log::info!("Starting HTTP API on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router(server_workflow)).await?;
        Ok(())
    });

    let inbox = Arc::new(BulkTriggerInbox::new(workflow.bulk().clone(), &paths::data_root())?);
    let monitor_handle = tokio::spawn(async move {
        if !monitor {
            return std::future::pending::<anyhow::Result<()>>().await;
        }
        monitor_triggers(inbox).await
    });

    // Wait for either task to complete (or fail)
    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Ok(())) => log::info!("HTTP API exited normally"),
                Ok(Err(e)) => {
                    log::error!("HTTP API failed: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    log::error!("HTTP API task panicked: {}", e);
                    std::process::exit(1);
                }
            }
        }
        result = monitor_handle => {
            match result {
                Ok(Ok(())) => log::info!("Trigger monitor exited normally"),
                Ok(Err(e)) => {
                    log::error!("Trigger monitor failed: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    log::error!("Trigger monitor task panicked: {}", e);
                    std::process::exit(1);
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutdown requested");
        }
    }

    Ok(())
}
