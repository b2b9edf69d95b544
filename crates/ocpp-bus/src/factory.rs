//! Picks a `Bus` backend from `ocpp_conf::MqConfig` and connects it.
//!
//! The nanomsg backend reuses a single `MangosMqConfig` across every
//! service binary. `csms_server` is the only bind side: it binds a PUB
//! socket on `csms_listen_url` and a REP socket on
//! `csms_listen_request_url`. Every back-end service (`session`,
//! `device_manager`, `message_manager`) dials into those same two URLs
//! as a SUB/REQ client rather than getting a distinct listen address of
//! its own — `session_listen_url`/`device_listen_url`/`message_listen_url`
//! are carried in the config schema but never wired to a socket.
//! `BusRole` picks which of the two client sockets a given service opens.

use crate::amqp::AmqpBus;
use crate::nanomsg::{NanomsgBus, NanomsgConfig};
use crate::redis::RedisBus;
use crate::Bus;
use ocpp_conf::MqConfig;
use ocpp_proto::OcppError;
use std::sync::Arc;

/// Which service is asking for a bus handle, used only to pick which
/// `mangos_mq` URL fields populate the nanomsg socket roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    /// Binds the broadcast PUB socket and the request REP socket that
    /// device-manager's REQ client dials.
    CsmsServer,
    /// Connects a SUB client to receive every channel's broadcast.
    Session,
    /// Connects a SUB client (to see `MessagesIn` replies) and a REQ
    /// client (to send `MessagesOut` requests to csms-server).
    DeviceManager,
    /// Connects a SUB client to archive every channel's broadcast.
    MessageManager,
}

impl BusRole {
    fn nanomsg_config(self, config: &MqConfig) -> NanomsgConfig {
        let mangos = &config.mangos_mq;
        match self {
            BusRole::CsmsServer => NanomsgConfig {
                publisher_listen_url: mangos.csms_listen_url.clone(),
                subscriber_client_url: String::new(),
                request_listen_url: mangos.csms_listen_request_url.clone(),
                request_client_url: String::new(),
            },
            BusRole::Session => NanomsgConfig {
                publisher_listen_url: String::new(),
                subscriber_client_url: mangos.csms_listen_url.clone(),
                request_listen_url: String::new(),
                request_client_url: mangos.csms_listen_request_url.clone(),
            },
            BusRole::DeviceManager => NanomsgConfig {
                publisher_listen_url: String::new(),
                subscriber_client_url: mangos.csms_listen_url.clone(),
                request_listen_url: String::new(),
                request_client_url: mangos.csms_listen_request_url.clone(),
            },
            BusRole::MessageManager => NanomsgConfig {
                publisher_listen_url: String::new(),
                subscriber_client_url: mangos.csms_listen_url.clone(),
                request_listen_url: String::new(),
                request_client_url: String::new(),
            },
        }
    }
}

/// Builds and connects the bus backend named by `config.type` for `role`.
pub async fn build_bus(config: &MqConfig, role: BusRole) -> Result<Arc<dyn Bus>, OcppError> {
    match config.r#type.as_str() {
        "mangos_mq" => {
            let bus = NanomsgBus::new(role.nanomsg_config(config));
            bus.connect().await?;
            Ok(Arc::new(bus))
        }
        "rabbit_mq" => {
            let bus = AmqpBus::connect(&config.rabbit_mq.server_url).await?;
            Ok(Arc::new(bus))
        }
        "redis_mq" => {
            let bus = RedisBus::connect(
                &config.redis_mq.host_port,
                &config.redis_mq.password,
                config.redis_mq.db_id,
            )
            .await?;
            Ok(Arc::new(bus))
        }
        other => Err(OcppError::fatal(format!("unknown mq type: {other}"))),
    }
}
