//! Wire types, codec, and error kinds shared by every OCPP gateway service.
//!
//! This crate has no knowledge of transport: it defines the OCPP message
//! frame, the envelope that carries it across the message bus, and the
//! notify events published on connect/disconnect. `ocpp-bus` builds on top
//! of it to move envelopes between services.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod message;
pub mod notify;

pub use envelope::Envelope;
pub use error::OcppError;
pub use message::{Direction, OcppMessage};
pub use notify::NotifyMessage;
