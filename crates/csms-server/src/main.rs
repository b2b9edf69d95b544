use anyhow::{Context, Result};
use clap::Parser;
use csms_server::forwarder;
use csms_server::state::AppState;
use csms_server::ws;
use ocpp_bus::{BusRole, CHANNEL_MESSAGES_OUT, CHANNEL_NOTIFY};
use ocpp_conf::Configuration;
use ocpp_proto::NotifyMessage;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The OCPP 1.6-J CSMS WebSocket gateway.
///
/// Terminates charge-point WebSocket connections, speaks the OCPP wire
/// protocol directly, and forwards everything onto the message bus for the
/// back-end services (`session`, `device-manager`, `message-manager`) to
/// pick up.
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
    /// Path to config file (overrides ../cfg/conf.yaml)
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

    ocpp_telemetry::init("csms-server", &config.logging.otlp_endpoint)
        .context("failed to initialize telemetry")?;

    info!("Configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!("   Environment overrides: {:?}", sources.env_overrides);
    }

    let host_name = gethostname::gethostname().to_string_lossy().into_owned();
    let service_config = config.services.csms_server.clone();
    info!(standalone_mode = service_config.standalone_mode, enable_auth = service_config.enable_auth, "starting csms-server");

    let auth_cache = if !service_config.cache.host_port.is_empty() {
        info!(host_port = %service_config.cache.host_port, "connecting to auth cache");
        let client = redis::Client::open(format!("redis://{}", service_config.cache.host_port))
            .context("invalid auth cache address")?;
        Some(
            redis::aio::ConnectionManager::new(client)
                .await
                .context("failed to connect to auth cache")?,
        )
    } else {
        tracing::warn!("not connecting to redis auth cache");
        None
    };

    let bus = ocpp_bus::build_bus(&config.mq, BusRole::CsmsServer)
        .await
        .context("failed to connect to message bus")?;
    bus.declare_queue(CHANNEL_NOTIFY)
        .await
        .context("failed to declare Notify queue")?;

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), bus.clone(), host_name.clone(), auth_cache);

    let forwarder_state = state.clone();
    tokio::spawn(async move {
        let handler: ocpp_bus::TopicHandler = Arc::new(move |payload| {
            let state = forwarder_state.clone();
            Box::pin(async move { forwarder::handle_messages_out(&state, payload).await })
        });
        if let Err(e) = forwarder_state
            .bus
            .run_topic_receiver(CHANNEL_MESSAGES_OUT, handler)
            .await
        {
            tracing::error!(error = %e, "MessagesOut receiver stopped");
        }
    });

    if !service_config.standalone_mode {
        if let Err(e) = state
            .bus
            .publish(
                CHANNEL_NOTIFY,
                &serde_json::to_vec(&NotifyMessage::node_connected(host_name.as_str()))?,
            )
            .await
        {
            tracing::error!(error = %e, "problem sending MQ notify node connected");
        }
    }

    let bind_addr: SocketAddr = format!(
        "{}:{}",
        service_config.listen_address, service_config.listen_port
    )
    .parse()
    .context("failed to parse bind address")?;

    let router = axum::Router::new()
        .fallback(ws::upgrade)
        .with_state(state.clone());

    info!("OCPP listening on: {}", bind_addr);

    let shutdown_token = CancellationToken::new();
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let shutdown_token_srv = shutdown_token.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_token_srv.cancelled().await;
        info!("server shutdown signal received");
    });

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("server shutdown with error: {:?}", e);
        }
    });

    let stats_state = state.clone();
    let stats_ct = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!(
                        connections = stats_state.connections.len(),
                        requests_handled = stats_state.requests_handled.load(std::sync::atomic::Ordering::Relaxed),
                        uptime_secs = stats_state.started_at.elapsed().as_secs(),
                        "csms-server statistics"
                    );
                }
                _ = stats_ct.cancelled() => break,
            }
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

    if !service_config.standalone_mode {
        let _ = state
            .bus
            .publish(
                CHANNEL_NOTIFY,
                &serde_json::to_vec(&NotifyMessage::node_disconnected(host_name.as_str()))?,
            )
            .await;
    }

    info!("closing message bus");
    state.bus.close().await.ok();

    info!("shutdown complete");
    ocpp_telemetry::shutdown()?;

    Ok(())
}
