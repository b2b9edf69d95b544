//! Shared state handed to every axum handler and the `MessagesIn` consumer.

use crate::db::DeviceLookup;
use ocpp_bus::Bus;
use ocpp_conf::Configuration;
use ocpp_registry::CorrelationRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub bus: Arc<dyn Bus>,
    pub host_name: Arc<str>,
    pub registry: Arc<CorrelationRegistry>,
    pub devices: Arc<dyn DeviceLookup>,
}
