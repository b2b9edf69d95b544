use anyhow::{Context, Result};
use clap::Parser;
use device_manager::consumer;
use device_manager::db::DeviceStore;
use device_manager::http;
use device_manager::state::AppState;
use ocpp_bus::{BusRole, CHANNEL_MESSAGES_IN, CHANNEL_NOTIFY};
use ocpp_conf::Configuration;
use ocpp_registry::CorrelationRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The OCPP action dispatcher: the operator-facing REST API that sends
/// CSMS-initiated requests down to a charge point and waits for its reply.
///
/// Configuration is loaded from (in order, later wins):
/// 1. Compiled defaults
/// 2. /etc/ocpp-gateway/conf.yaml
/// 3. ~/.config/ocpp-gateway/conf.yaml
/// 4. ../cfg/conf.yaml (or --config path)
/// 5. Environment variables (OCPP_*)
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

    ocpp_telemetry::init("device-manager", &config.logging.otlp_endpoint)
        .context("failed to initialize telemetry")?;

    info!("Configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!("   Environment overrides: {:?}", sources.env_overrides);
    }

    let host_name = gethostname::gethostname().to_string_lossy().into_owned();
    info!(host_name, "starting device-manager");

    let devices = DeviceStore::connect(&config.db_config.db_connection_string)
        .await
        .context("failed to connect to device database")?;

    let bus = ocpp_bus::build_bus(&config.mq, BusRole::DeviceManager)
        .await
        .context("failed to connect to message bus")?;
    bus.declare_queue(CHANNEL_NOTIFY)
        .await
        .context("failed to declare Notify queue")?;
    bus.subscribe_topic(CHANNEL_MESSAGES_IN, &host_name)
        .await
        .context("failed to subscribe to MessagesIn")?;

    let config = Arc::new(config);
    let http_config = config.services.device_manager.http.clone();
    let state = AppState {
        config: config.clone(),
        bus: bus.clone(),
        host_name: host_name.clone().into(),
        registry: CorrelationRegistry::new(),
        devices: Arc::new(devices),
    };

    let shutdown_token = CancellationToken::new();
    let expunge_handle = ocpp_registry::spawn_expunge_task(state.registry.clone(), shutdown_token.clone());

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

    let bind_addr: SocketAddr = format!("{}:{}", http_config.listen_address, http_config.listen_port)
        .parse()
        .context("failed to parse bind address")?;

    let router = http::router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!("REST API listening on: {}", bind_addr);

    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        info!("server shutdown signal received");
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("server shutdown with error: {:?}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down gracefully...");
            shutdown_token.cancel();
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
            shutdown_token.cancel();
        }
    }

    let _ = server_handle.await;
    consumer_handle.abort();
    expunge_handle.abort();

    info!("closing message bus");
    state.bus.close().await.ok();

    info!("shutdown complete");
    ocpp_telemetry::shutdown()?;

    Ok(())
}
