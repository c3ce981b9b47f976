//! Periodic refresh of the measurement registers.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use meterbus_common::{Measurement, MeterReading};
use meterbus_framework::ShutdownSignal;

use crate::generator::MeasurementSource;
use crate::store::RegisterStore;

/// Counters collected while the loop ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Completed update cycles.
    pub cycles: u64,
    /// Per-identity batch writes that were rejected by the store.
    pub failed_writes: u64,
}

/// Writes a fresh reading to every unit id once per interval.
pub struct UpdateLoop<S> {
    store: RegisterStore,
    source: S,
    interval: Duration,
    stats: UpdateStats,
}

impl<S: MeasurementSource> UpdateLoop<S> {
    pub fn new(store: RegisterStore, source: S, interval: Duration) -> Self {
        Self {
            store,
            source,
            interval,
            stats: UpdateStats::default(),
        }
    }

    pub fn stats(&self) -> UpdateStats {
        self.stats
    }

    /// Run one update cycle.
    ///
    /// A rejected write for one unit id is logged and counted; the other unit
    /// ids are still updated.
    pub fn apply(&mut self) -> MeterReading {
        let reading = self.source.next_reading();
        let writes: Vec<(u16, [u16; 2])> = reading
            .register_writes()
            .into_iter()
            .map(|(address, pair)| (address, pair.words()))
            .collect();

        for unit_id in self.store.unit_ids() {
            if let Err(e) = self.store.write_batch(unit_id, &writes) {
                warn!(
                    unit_id,
                    address = ?e.address(),
                    error = %e,
                    "Failed to write measurement registers"
                );
                self.stats.failed_writes += 1;
            }
        }

        self.stats.cycles += 1;
        debug!(
            cycle = self.stats.cycles,
            current = reading.current,
            voltage = reading.voltage,
            power_factor = reading.power_factor,
            "Updated measurement registers"
        );
        for measurement in Measurement::ALL {
            trace!(
                measurement = %measurement,
                address = measurement.address(),
                value = reading.value(measurement),
                unit = measurement.unit(),
                "Measurement written"
            );
        }

        reading
    }

    /// Update until shutdown is signalled. The first cycle runs immediately.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> UpdateStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            unit_ids = ?self.store.unit_ids(),
            "Starting update loop"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {
                    self.apply();
                }
            }
        }

        info!(
            cycles = self.stats.cycles,
            failed_writes = self.stats.failed_writes,
            "Update loop stopped"
        );
        self.stats
    }
}
