//! Correlation registry matching a CP's `direction = 3` reply back to the
//! action dispatcher that sent the request carrying its `msgId`.
//!
//! One-shot, single-claim waiters behind a `DashMap`, the same concurrent-map
//! idiom the teacher uses for its connection/session tables. A background
//! sweep removes waiters nobody ever claimed, so a CP that goes silent after
//! a request can't leak memory forever.

use dashmap::DashMap;
use ocpp_proto::constants::{ACTION_TIMEOUT_SECS, EXPUNGE_INTERVAL_SECS, EXPUNGE_MAX_AGE_SECS};
use ocpp_proto::OcppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

struct Waiter {
    sender: oneshot::Sender<serde_json::Value>,
    registered_at: Instant,
}

/// Tracks in-flight requests awaiting a correlated CP reply.
#[derive(Default)]
pub struct CorrelationRegistry {
    waiters: DashMap<String, Waiter>,
}

impl CorrelationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            waiters: DashMap::new(),
        })
    }

    /// Registers `msg_id` and returns the receiver that resolves when
    /// [`Self::complete`] is called with the same id.
    pub fn register(&self, msg_id: impl Into<String>) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            msg_id.into(),
            Waiter {
                sender: tx,
                registered_at: Instant::now(),
            },
        );
        rx
    }

    /// Completes the waiter for `msg_id`, if one is still registered.
    /// Returns `false` if there was no matching waiter (already completed,
    /// expunged, or never registered) — the caller should log and drop.
    pub fn complete(&self, msg_id: &str, body: serde_json::Value) -> bool {
        match self.waiters.remove(msg_id) {
            Some((_, waiter)) => waiter.sender.send(body).is_ok(),
            None => false,
        }
    }

    /// Removes the waiter for `msg_id` without completing it, used when the
    /// owning request is abandoned (e.g. the CP connection dropped).
    pub fn cancel_and_remove(&self, msg_id: &str) -> bool {
        self.waiters.remove(msg_id).is_some()
    }

    /// Registers `msg_id` and waits up to [`ACTION_TIMEOUT_SECS`] for a
    /// reply, removing the waiter either way.
    pub async fn await_with_timeout(
        &self,
        msg_id: impl Into<String>,
    ) -> Result<serde_json::Value, OcppError> {
        let msg_id = msg_id.into();
        let rx = self.register(msg_id.clone());
        let result = tokio::time::timeout(Duration::from_secs(ACTION_TIMEOUT_SECS), rx).await;
        self.waiters.remove(&msg_id);
        match result {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(OcppError::fatal(format!(
                "waiter for {msg_id} dropped without a reply"
            ))),
            Err(_) => Err(OcppError::timeout(format!("reply to {msg_id}"))),
        }
    }

    /// Drops every waiter older than `max_age`, logging what it discards.
    pub fn expunge_older_than(&self, max_age: Duration) {
        let now = Instant::now();
        self.waiters.retain(|msg_id, waiter| {
            let expired = now.duration_since(waiter.registered_at) > max_age;
            if expired {
                tracing::warn!(msg_id, "expunging abandoned correlation waiter");
            }
            !expired
        });
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Spawns the periodic sweep that calls [`CorrelationRegistry::expunge_older_than`]
/// every [`EXPUNGE_INTERVAL_SECS`], until `shutdown` is cancelled.
pub fn spawn_expunge_task(
    registry: Arc<CorrelationRegistry>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(EXPUNGE_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    registry.expunge_older_than(Duration::from_secs(EXPUNGE_MAX_AGE_SECS));
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("correlation registry expunge task shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_resolves_the_matching_waiter() {
        let registry = CorrelationRegistry::new();
        let rx = registry.register("msg-1");
        assert!(registry.complete("msg-1", serde_json::json!({"ok": true})));
        let body = rx.await.unwrap();
        assert_eq!(body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn complete_on_unknown_id_returns_false() {
        let registry = CorrelationRegistry::new();
        assert!(!registry.complete("never-registered", serde_json::json!(null)));
    }

    #[tokio::test]
    async fn await_with_timeout_times_out_when_nobody_replies() {
        let registry = CorrelationRegistry::new();
        let result = registry.await_with_timeout("msg-2").await;
        assert!(matches!(result, Err(OcppError::Timeout { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn expunge_drops_waiters_older_than_max_age() {
        let registry = CorrelationRegistry::new();
        let _rx = registry.register("stale");
        registry.expunge_older_than(Duration::from_secs(0));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_and_remove_drops_without_completing() {
        let registry = CorrelationRegistry::new();
        let rx = registry.register("msg-3");
        assert!(registry.cancel_and_remove("msg-3"));
        assert!(rx.await.is_err());
    }
}
