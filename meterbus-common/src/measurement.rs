//! Meter register map and readings.

use serde::{Deserialize, Serialize};

use crate::codec::{EncodedPair, encode};

/// Default size of one device's register address space.
pub const DEFAULT_REGISTER_COUNT: usize = 5000;

/// A physical quantity exposed by the meter.
///
/// Every measurement is an `f32` stored in two consecutive holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    /// Line current (A).
    Current,
    /// Active power (W).
    ActivePower,
    /// Reactive power (var).
    ReactivePower,
    /// Apparent power (VA).
    ApparentPower,
    /// Power factor (dimensionless, 0..1).
    PowerFactor,
    /// Line voltage (V).
    Voltage,
    /// Line frequency (Hz).
    Frequency,
}

impl Measurement {
    /// Number of registers per measurement.
    pub const WIDTH: u16 = 2;

    /// All measurements, in register-map order.
    pub const ALL: [Measurement; 7] = [
        Measurement::Current,
        Measurement::ActivePower,
        Measurement::ReactivePower,
        Measurement::ApparentPower,
        Measurement::PowerFactor,
        Measurement::Voltage,
        Measurement::Frequency,
    ];

    /// Base holding register address.
    pub fn address(&self) -> u16 {
        match self {
            Measurement::Current => 2998,
            Measurement::ActivePower => 3058,
            Measurement::ReactivePower => 3066,
            Measurement::ApparentPower => 3074,
            Measurement::PowerFactor => 3082,
            Measurement::Voltage => 3026,
            Measurement::Frequency => 3108,
        }
    }

    /// One past the last register of this measurement.
    pub fn end_address(&self) -> u32 {
        self.address() as u32 + Self::WIDTH as u32
    }

    /// Unit of measure, empty for the power factor.
    pub fn unit(&self) -> &'static str {
        match self {
            Measurement::Current => "A",
            Measurement::ActivePower => "W",
            Measurement::ReactivePower => "var",
            Measurement::ApparentPower => "VA",
            Measurement::PowerFactor => "",
            Measurement::Voltage => "V",
            Measurement::Frequency => "Hz",
        }
    }

    /// Return the string name for this measurement.
    pub fn as_str(&self) -> &'static str {
        match self {
            Measurement::Current => "current",
            Measurement::ActivePower => "active_power",
            Measurement::ReactivePower => "reactive_power",
            Measurement::ApparentPower => "apparent_power",
            Measurement::PowerFactor => "power_factor",
            Measurement::Voltage => "voltage",
            Measurement::Frequency => "frequency",
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One synthetic sample of all seven quantities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub current: f32,
    pub frequency: f32,
    pub voltage: f32,
    pub power_factor: f32,
    pub apparent_power: f32,
    pub active_power: f32,
    pub reactive_power: f32,
}

impl MeterReading {
    /// Build a reading from the sampled quantities, deriving the power values.
    ///
    /// The reactive power is clamped at zero so round-off in
    /// `apparent² − active²` never yields a NaN.
    pub fn from_samples(current: f64, frequency: f64, voltage: f64, power_factor: f64) -> Self {
        let apparent = current * voltage;
        let active = apparent * power_factor;
        let reactive = (apparent * apparent - active * active).max(0.0).sqrt();

        Self {
            current: current as f32,
            frequency: frequency as f32,
            voltage: voltage as f32,
            power_factor: power_factor as f32,
            apparent_power: apparent as f32,
            active_power: active as f32,
            reactive_power: reactive as f32,
        }
    }

    /// Value of a single measurement.
    pub fn value(&self, measurement: Measurement) -> f32 {
        match measurement {
            Measurement::Current => self.current,
            Measurement::ActivePower => self.active_power,
            Measurement::ReactivePower => self.reactive_power,
            Measurement::ApparentPower => self.apparent_power,
            Measurement::PowerFactor => self.power_factor,
            Measurement::Voltage => self.voltage,
            Measurement::Frequency => self.frequency,
        }
    }

    /// Encoded register writes for this reading: `(address, pair)` per measurement.
    pub fn register_writes(&self) -> Vec<(u16, EncodedPair)> {
        Measurement::ALL
            .iter()
            .map(|m| (m.address(), encode(self.value(*m))))
            .collect()
    }
}
