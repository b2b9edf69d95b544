//! Shared state handed to the `MessagesIn` consumer.

use crate::db::ArchiveSink;
use ocpp_bus::Bus;
use ocpp_conf::Configuration;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub bus: Arc<dyn Bus>,
    pub host_name: Arc<str>,
    pub archive: Arc<dyn ArchiveSink>,
}
