use anyhow::{Context, Result};
use clap::Parser;
use ocpp_bus::{BusRole, CHANNEL_MESSAGES_IN, CHANNEL_NOTIFY};
use ocpp_conf::Configuration;
use session::consumer;
use session::db::TransactionStore;
use session::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Consumes `StartTransaction` requests off the bus, persists a transaction
/// row and replies with the assigned transaction id.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show loaded configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = Configuration::load_with_sources_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    if cli.show_config {
        println!("# Configuration sources:");
        for path in &sources.files {
            println!("#   - {}", path.display());
        }
        if !sources.env_overrides.is_empty() {
            println!("# Environment overrides:");
            for var in &sources.env_overrides {
                println!("#   - {}", var);
            }
        }
        println!();
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    ocpp_telemetry::init("session", &config.logging.otlp_endpoint)
        .context("failed to initialize telemetry")?;

    info!("Configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!("   Environment overrides: {:?}", sources.env_overrides);
    }

    let host_name = gethostname::gethostname().to_string_lossy().into_owned();
    info!(host_name, "starting session");

    let transactions = TransactionStore::connect(&config.db_config.db_connection_string)
        .await
        .context("failed to connect to transaction database")?;

    let bus = ocpp_bus::build_bus(&config.mq, BusRole::Session)
        .await
        .context("failed to connect to message bus")?;
    bus.declare_queue(CHANNEL_NOTIFY)
        .await
        .context("failed to declare Notify queue")?;
    bus.subscribe_topic(CHANNEL_MESSAGES_IN, &host_name)
        .await
        .context("failed to subscribe to MessagesIn")?;

    let state = AppState {
        config: Arc::new(config),
        bus: bus.clone(),
        host_name: host_name.into(),
        transactions: Arc::new(transactions),
    };

    let consumer_state = state.clone();
    let consumer_handle = tokio::spawn(async move {
        let handler: ocpp_bus::TopicHandler = Arc::new(move |payload| {
            let state = consumer_state.clone();
            Box::pin(async move { consumer::handle_messages_in(&state, payload).await })
        });
        if let Err(e) = consumer_state
            .bus
            .run_topic_receiver(CHANNEL_MESSAGES_IN, handler)
            .await
        {
            tracing::error!(error = %e, "MessagesIn receiver stopped");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down gracefully...");
        }
        sig = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
                tokio::select! {
                    _ = sighup.recv() => "SIGHUP",
                    _ = sigterm.recv() => "SIGTERM",
                    _ = sigquit.recv() => "SIGQUIT",
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<&'static str>().await
            }
        } => {
            info!("received {}, shutting down gracefully...", sig);
        }
    }

    consumer_handle.abort();

    info!("closing message bus");
    state.bus.close().await.ok();

    info!("shutdown complete");
    ocpp_telemetry::shutdown()?;

    Ok(())
}
