//! Modbus to pub/sub bridge.
//!
//! Polls a holding register range from a Modbus TCP meter and republishes
//! every successful read on Zenoh, MQTT or NATS. A connection lost while
//! polling is re-opened on a later tick.
//!
//! # Payloads
//!
//! ```text
//! raw    0, 16480
//! value  3.5
//! json   {"unit_id":1,"address":2998,"words":[0,16480],"value":3.5,"timestamp":...}
//! ```

pub mod config;
pub mod poller;

pub use config::BridgeConfig;
pub use poller::{
    Bridge, BridgeReport, BridgeState, CycleOutcome, ModbusSource, PollSettings, PollerError,
    RegisterSource,
};
