//! Modbus TCP meter emulator.
//!
//! Serves holding registers for one or more unit ids and refreshes the
//! measurement registers with synthetic readings on a fixed period.
//!
//! # Register map
//!
//! ```text
//! current         2998    A
//! voltage         3026    V
//! active_power    3058    W
//! reactive_power  3066    var
//! apparent_power  3074    VA
//! power_factor    3082
//! frequency       3108    Hz
//! ```
//!
//! Each value occupies two registers holding the little-endian words of an
//! IEEE-754 `f32` (low word first).

pub mod config;
pub mod emulator;
pub mod generator;
pub mod server;
pub mod store;
pub mod updater;

pub use emulator::{DeviceEmulator, EmulatorError, EmulatorReport, EmulatorState};
pub use generator::{FixedReadings, MeasurementSource, RandomMeter, SampleRange, SamplingRanges};
pub use store::{RegisterStore, StoreError};
pub use updater::{UpdateLoop, UpdateStats};
