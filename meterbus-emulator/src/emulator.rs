//! Device emulator lifecycle.
//!
//! ```text
//! Uninitialized --run--> Serving --shutdown / server failure--> Stopped
//! ```
//!
//! While serving, the update loop and the Modbus server run as two tasks on a
//! shared [`RegisterStore`]. Stopping lets the update loop finish its current
//! cycle, closes the listener and every client connection, then waits for
//! both tasks.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use meterbus_framework::{Shutdown, ShutdownSignal};

use crate::generator::MeasurementSource;
use crate::server;
use crate::store::RegisterStore;
use crate::updater::{UpdateLoop, UpdateStats};

/// Lifecycle state of a [`DeviceEmulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Uninitialized,
    Serving,
    Stopped,
}

/// Errors raised while running the emulator.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("Failed to bind Modbus server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Emulator is not bound to an address")]
    NotBound,

    #[error("Emulator already started")]
    AlreadyStarted,

    #[error("Modbus server failed: {0}")]
    Server(#[source] std::io::Error),

    #[error("Emulator task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Summary returned when the emulator stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorReport {
    /// Address the Modbus server listened on.
    pub local_addr: SocketAddr,
    /// Unit ids that were served.
    pub unit_ids: Vec<u8>,
    /// Update loop counters.
    pub update: UpdateStats,
}

/// A Modbus TCP meter backed by synthetic measurements.
pub struct DeviceEmulator<S> {
    store: RegisterStore,
    source: Option<S>,
    interval: Duration,
    listener: Option<TcpListener>,
    state: watch::Sender<EmulatorState>,
}

impl<S: MeasurementSource + 'static> DeviceEmulator<S> {
    pub fn new(store: RegisterStore, source: S, interval: Duration) -> Self {
        let (state, _) = watch::channel(EmulatorState::Uninitialized);
        Self {
            store,
            source: Some(source),
            interval,
            listener: None,
            state,
        }
    }

    pub fn state(&self) -> EmulatorState {
        *self.state.borrow()
    }

    /// Follow state transitions, e.g. from a test or a supervisor task.
    pub fn watch_state(&self) -> watch::Receiver<EmulatorState> {
        self.state.subscribe()
    }

    /// The register store served by this emulator.
    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    /// Bind the Modbus listener. Port 0 picks a free port.
    pub async fn bind(&mut self, addr: &str) -> Result<SocketAddr, EmulatorError> {
        let bind_error = |source| EmulatorError::Bind {
            addr: addr.to_string(),
            source,
        };

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Serve until `shutdown` is signalled or the server fails.
    pub async fn run(
        &mut self,
        mut shutdown: ShutdownSignal,
    ) -> Result<EmulatorReport, EmulatorError> {
        if self.state() != EmulatorState::Uninitialized {
            return Err(EmulatorError::AlreadyStarted);
        }
        let listener = self.listener.take().ok_or(EmulatorError::NotBound)?;
        let source = self.source.take().ok_or(EmulatorError::AlreadyStarted)?;
        let local_addr = listener.local_addr().map_err(EmulatorError::Server)?;

        let stop = Shutdown::new();
        let updater = UpdateLoop::new(self.store.clone(), source, self.interval);
        let update_task = tokio::spawn(updater.run(stop.signal()));
        let mut serve_task = tokio::spawn(server::serve(
            listener,
            self.store.clone(),
            stop.signal(),
        ));

        self.state.send_replace(EmulatorState::Serving);
        info!(
            addr = %local_addr,
            unit_ids = ?self.store.unit_ids(),
            registers = self.store.size(),
            "Emulator serving"
        );

        let mut early_exit = None;
        tokio::select! {
            _ = shutdown.triggered() => info!("Stopping emulator"),
            result = &mut serve_task => early_exit = Some(result),
        }
        stop.trigger();

        let serve_result = match early_exit {
            Some(result) => result,
            None => serve_task.await,
        };
        let update_result = update_task.await;
        self.state.send_replace(EmulatorState::Stopped);

        if let Err(e) = serve_result? {
            error!(error = %e, "Modbus server failed");
            return Err(EmulatorError::Server(e));
        }
        let update = update_result?;

        info!(
            cycles = update.cycles,
            failed_writes = update.failed_writes,
            "Emulator stopped"
        );

        Ok(EmulatorReport {
            local_addr,
            unit_ids: self.store.unit_ids(),
            update,
        })
    }
}
