//! # Signal Database
//!
//! Decodes frames of a [`Channel`](crate::Channel) into named messages and
//! signals described by a JSON network description, and encodes them back.
//!
//! ## Key Types
//!
//! - [`NetworkDescription`] - Buses, messages and signal layouts
//! - [`DatabaseService`] - Live signal values bound to one channel
//! - [`CanAdapter`] - One-call setup addressing listeners by `"Message.Signal"`

pub mod adapter;
pub mod description;
pub mod service;

pub use adapter::{CanAdapter, Update};
pub use description::{BusDef, Endianness, MessageDef, NetworkDescription, SignalDef};
pub use service::{DatabaseService, Message, Signal, SubscriptionId};

use crate::codec::SignalError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("cannot read network description: {0}")]
    Io(#[from] io::Error),
    #[error("invalid network description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message '{message}': {reason}")]
    InvalidMessage { message: String, reason: String },
    #[error("bus '{0}' not found in network description")]
    UnknownBus(String),
    #[error("message '{0}' does not exist")]
    UnknownMessage(String),
    #[error("signal '{message}.{signal}' does not exist")]
    UnknownSignal { message: String, signal: String },
    #[error("signal '{signal}': {source}")]
    Signal {
        signal: String,
        #[source]
        source: SignalError,
    },
    #[error(transparent)]
    Channel(#[from] crate::error::Error),
}
