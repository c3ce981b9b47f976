//! Measurement sources feeding the update loop.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use meterbus_common::MeterReading;

/// Produces one [`MeterReading`] per update cycle.
pub trait MeasurementSource: Send {
    fn next_reading(&mut self) -> MeterReading;
}

/// Closed interval a quantity is sampled from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRange {
    pub min: f64,
    pub max: f64,
}

impl SampleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn check(&self, name: &str) -> Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(format!("{} range must be finite", name));
        }
        if self.min > self.max {
            return Err(format!(
                "{} range min ({}) is greater than max ({})",
                name, self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Sampling intervals for the independent quantities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingRanges {
    /// Current in amperes (default 3..4).
    #[serde(default = "default_current")]
    pub current: SampleRange,

    /// Frequency in hertz (default 59..61).
    #[serde(default = "default_frequency")]
    pub frequency: SampleRange,

    /// Voltage in volts (default 123..126).
    #[serde(default = "default_voltage")]
    pub voltage: SampleRange,

    /// Power factor (default 0..1).
    #[serde(default = "default_power_factor")]
    pub power_factor: SampleRange,
}

fn default_current() -> SampleRange {
    SampleRange::new(3.0, 4.0)
}

fn default_frequency() -> SampleRange {
    SampleRange::new(59.0, 61.0)
}

fn default_voltage() -> SampleRange {
    SampleRange::new(123.0, 126.0)
}

fn default_power_factor() -> SampleRange {
    SampleRange::new(0.0, 1.0)
}

impl Default for SamplingRanges {
    fn default() -> Self {
        Self {
            current: default_current(),
            frequency: default_frequency(),
            voltage: default_voltage(),
            power_factor: default_power_factor(),
        }
    }
}

impl SamplingRanges {
    /// Check every range; the power factor must stay within 0..=1.
    pub fn validate(&self) -> Result<(), String> {
        self.current.check("current")?;
        self.frequency.check("frequency")?;
        self.voltage.check("voltage")?;
        self.power_factor.check("power_factor")?;

        if self.power_factor.min < 0.0 || self.power_factor.max > 1.0 {
            return Err("power_factor range must lie within 0..1".to_string());
        }
        Ok(())
    }
}

/// Uniformly distributed synthetic readings.
#[derive(Debug)]
pub struct RandomMeter {
    rng: StdRng,
    ranges: SamplingRanges,
}

impl RandomMeter {
    /// Create a generator; a seed makes the sequence reproducible.
    pub fn new(ranges: SamplingRanges, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, ranges }
    }

    fn sample(&mut self, range: SampleRange) -> f64 {
        if range.min == range.max {
            return range.min;
        }
        self.rng.gen_range(range.min..=range.max)
    }
}

impl MeasurementSource for RandomMeter {
    fn next_reading(&mut self) -> MeterReading {
        let current = self.sample(self.ranges.current);
        let frequency = self.sample(self.ranges.frequency);
        let voltage = self.sample(self.ranges.voltage);
        let power_factor = self.sample(self.ranges.power_factor);

        MeterReading::from_samples(current, frequency, voltage, power_factor)
    }
}

/// Replays a fixed list of readings, then keeps repeating the last one.
///
/// An empty list yields all-zero readings.
#[derive(Debug, Clone)]
pub struct FixedReadings {
    readings: Vec<MeterReading>,
    next: usize,
}

impl FixedReadings {
    pub fn new(readings: Vec<MeterReading>) -> Self {
        Self { readings, next: 0 }
    }

    /// A source that always returns the same reading.
    pub fn constant(reading: MeterReading) -> Self {
        Self::new(vec![reading])
    }
}

impl MeasurementSource for FixedReadings {
    fn next_reading(&mut self) -> MeterReading {
        let Some(last) = self.readings.len().checked_sub(1) else {
            return MeterReading::from_samples(0.0, 0.0, 0.0, 0.0);
        };

        let reading = self.readings[self.next.min(last)];
        if self.next < last {
            self.next += 1;
        }
        reading
    }
}
