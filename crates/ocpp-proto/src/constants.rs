//! Wire constants shared by every service in the gateway.

/// Maximum accepted length of a `networkId`, confirmed against the
/// front-end's `NETWORKID_MAXLEN`.
pub const NETWORKID_MAXLEN: usize = 32;

/// Maximum accepted WebSocket frame size in bytes.
pub const MAX_MSG_SIZE: usize = 8192;

/// Bus channel carrying connect/disconnect notifications.
pub const CHANNEL_NOTIFY: &str = "Notify";

/// Bus channel carrying CP-originated traffic and CP replies to actions.
pub const CHANNEL_MESSAGES_IN: &str = "MessagesIn";

/// Bus channel carrying CSMS-initiated requests and replies routed to a CP.
pub const CHANNEL_MESSAGES_OUT: &str = "MessagesOut";

/// `Notify` event fired once per node at startup.
pub const NOTIFY_NODE_CONNECTED: &str = "NodeConnected";

/// `Notify` event fired once per node at shutdown.
pub const NOTIFY_NODE_DISCONNECTED: &str = "NodeDisconnected";

/// `Notify` event fired when a CP completes auth + upgrade.
pub const NOTIFY_CLIENT_CONNECTED: &str = "ClientConnected";

/// `Notify` event fired when a CP's connection is torn down.
pub const NOTIFY_CLIENT_DISCONNECTED: &str = "ClientDisconnected";

/// How long an action dispatcher waits for a correlated CP reply.
pub const ACTION_TIMEOUT_SECS: u64 = 5;

/// How often the correlation registry sweeps for abandoned waiters.
pub const EXPUNGE_INTERVAL_SECS: u64 = 20;

/// Age past which an unclaimed waiter is considered abandoned.
pub const EXPUNGE_MAX_AGE_SECS: u64 = 60;

/// Attempts `PublishWithRetry` makes before giving up.
pub const PUBLISH_MAX_RETRIES: u32 = 3;

/// Backoff between `PublishWithRetry` attempts.
pub const PUBLISH_RETRY_BACKOFF_MS: u64 = 2_000;
