//! Pub/sub distributor for meter readings.
//!
//! Subscribes to a topic subtree and logs every message with a sequence
//! number. Raw register-pair payloads are also decoded back to their float
//! value.

pub mod config;
pub mod distributor;

pub use config::DistributorConfig;
pub use distributor::{Delivery, Distributor, SequenceCounter};
