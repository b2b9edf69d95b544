//! Shared state handed to every axum handler and background task.

use dashmap::DashMap;
use ocpp_conf::Configuration;
use ocpp_bus::Bus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// A CP's live WebSocket, reduced to the one thing every other task needs:
/// a way to push a frame to it without fighting over the socket.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub remote_addr: String,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub bus: Arc<dyn Bus>,
    pub host_name: Arc<str>,
    pub connections: Arc<DashMap<String, ConnectionHandle>>,
    /// `msgId`s forwarded down to a CP that are still waiting for the CP's
    /// `direction = 3` reply, so it can be relayed back onto `MessagesIn`.
    /// Unlike `ocpp-registry`'s correlation waiters this never blocks a
    /// task on a result — it's just a presence check before forwarding.
    pub pending_client_replies: Arc<DashMap<String, ()>>,
    /// Present only when `services.csms_server.cache.host_port` is set.
    pub auth_cache: Option<redis::aio::ConnectionManager>,
    pub started_at: Instant,
    pub requests_handled: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        config: Arc<Configuration>,
        bus: Arc<dyn Bus>,
        host_name: impl Into<Arc<str>>,
        auth_cache: Option<redis::aio::ConnectionManager>,
    ) -> Self {
        Self {
            config,
            bus,
            host_name: host_name.into(),
            connections: Arc::new(DashMap::new()),
            pending_client_replies: Arc::new(DashMap::new()),
            auth_cache,
            started_at: Instant::now(),
            requests_handled: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_request(&self) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
    }
}
