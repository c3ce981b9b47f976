//! Modbus polling and republishing.
//!
//! ```text
//! Disconnected --connect--> Connected --run--> Polling --shutdown--> Stopped
//!                                               |    ^
//!                              transport failure|    |reconnect on a later tick
//!                                               v    |
//!                                            Disconnected
//! ```
//!
//! Only the first connection is fatal. A connection lost while polling is
//! closed and re-opened on the next tick; polling carries on until shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_modbus::client::{Client, Context, Reader, tcp};
use tokio_modbus::{ExceptionCode, Slave};
use tracing::{debug, error, info, warn};

use meterbus_common::{BridgeMessage, PayloadFormat, RegisterSample};
use meterbus_framework::{MessageSink, ShutdownSignal};

use crate::config::{BridgeConfig, ModbusConfig};

/// Errors raised while talking to the Modbus device.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Failed to connect to Modbus device at {addr}: {message}")]
    Connect { addr: String, message: String },

    #[error("Modbus exception reading {count} registers at {address}: {code:?}")]
    Exception {
        address: u16,
        count: u16,
        code: ExceptionCode,
    },

    #[error("Modbus request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Modbus protocol error: {0}")]
    Protocol(String),

    #[error("Modbus connection lost: {0}")]
    Transport(String),
}

impl PollerError {
    /// Whether polling can continue after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PollerError::Exception { .. } | PollerError::Timeout(_) | PollerError::Protocol(_)
        )
    }
}

/// Something holding registers can be read from.
#[async_trait]
pub trait RegisterSource: Send {
    /// Read `count` holding registers starting at `address`.
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PollerError>;

    /// Open a fresh connection after a transport failure.
    async fn reconnect(&mut self) -> Result<(), PollerError>;

    /// Close the connection. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Modbus TCP client bound to one unit id.
pub struct ModbusSource {
    ctx: Option<Context>,
    target: String,
    unit_id: u8,
    timeout: Duration,
}

impl ModbusSource {
    /// Connect to the configured device.
    ///
    /// Failure is reported once and returned; there is no retry.
    pub async fn connect(config: &ModbusConfig) -> Result<Self, PollerError> {
        let mut source = Self {
            ctx: None,
            target: config.addr(),
            unit_id: config.unit_id,
            timeout: config.timeout(),
        };

        if let Err(e) = source.reconnect().await {
            error!(addr = %source.target, error = %e, "Failed to connect to Modbus device");
            return Err(e);
        }
        Ok(source)
    }
}

async fn open(
    target: &str,
    unit_id: u8,
    timeout: Duration,
) -> Result<(SocketAddr, Context), String> {
    let addr = tokio::net::lookup_host(target)
        .await
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| "address did not resolve".to_string())?;

    let ctx = tokio::time::timeout(timeout, tcp::connect_slave(addr, Slave(unit_id)))
        .await
        .map_err(|_| "connection timed out".to_string())?
        .map_err(|e| e.to_string())?;

    Ok((addr, ctx))
}

#[async_trait]
impl RegisterSource for ModbusSource {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, PollerError> {
        let ctx = self
            .ctx
            .as_mut()
            .ok_or_else(|| PollerError::Transport("not connected".to_string()))?;

        match tokio::time::timeout(self.timeout, ctx.read_holding_registers(address, count)).await {
            Err(_) => Err(PollerError::Timeout(self.timeout)),
            Ok(Err(tokio_modbus::Error::Transport(e))) => {
                Err(PollerError::Transport(e.to_string()))
            }
            Ok(Err(e)) => Err(PollerError::Protocol(e.to_string())),
            Ok(Ok(Err(code))) => Err(PollerError::Exception {
                address,
                count,
                code,
            }),
            Ok(Ok(Ok(words))) => Ok(words),
        }
    }

    async fn reconnect(&mut self) -> Result<(), PollerError> {
        self.close().await;

        let (addr, ctx) = open(&self.target, self.unit_id, self.timeout)
            .await
            .map_err(|message| PollerError::Connect {
                addr: self.target.clone(),
                message,
            })?;

        info!(addr = %addr, unit_id = self.unit_id, "Connected to Modbus device");
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!(addr = %self.target, error = %e, "Error while closing Modbus connection");
            }
        }
    }
}

/// Lifecycle state of a [`Bridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connected,
    Polling,
    Stopped,
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    Skipped,
    PublishFailed,
    /// The connection was lost, or could not be re-opened.
    Disconnected,
}

/// Counters collected while polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeReport {
    pub cycles: u64,
    pub published: u64,
    pub skipped: u64,
    pub publish_failures: u64,
    /// Connections lost while polling.
    pub disconnects: u64,
    /// Connections re-opened after a loss.
    pub reconnects: u64,
}

/// What to poll and where to publish it.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub unit_id: u8,
    pub address: u16,
    pub count: u16,
    pub interval: Duration,
    pub topic: String,
    pub format: PayloadFormat,
}

impl PollSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            unit_id: config.modbus.unit_id,
            address: config.poll.address(),
            count: config.poll.count(),
            interval: config.poll.interval(),
            topic: config.topic(),
            format: config.publish.format,
        }
    }
}

/// Polls a register range and republishes every successful read.
pub struct Bridge<R, P> {
    source: R,
    sink: P,
    settings: PollSettings,
    state: BridgeState,
    report: BridgeReport,
}

impl<R: RegisterSource, P: MessageSink> Bridge<R, P> {
    /// Create a bridge over an already connected source.
    pub fn new(source: R, sink: P, settings: PollSettings) -> Self {
        Self {
            source,
            sink,
            settings,
            state: BridgeState::Connected,
            report: BridgeReport::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn report(&self) -> BridgeReport {
        self.report
    }

    /// Read once and publish the result.
    ///
    /// Exceptions and timeouts skip the cycle. A lost connection is closed and
    /// the bridge moves to [`BridgeState::Disconnected`]; the next cycle tries
    /// to reconnect before reading.
    pub async fn poll_cycle(&mut self) -> CycleOutcome {
        let PollSettings {
            unit_id,
            address,
            count,
            ..
        } = self.settings;

        self.report.cycles += 1;

        if self.state == BridgeState::Disconnected {
            match self.source.reconnect().await {
                Ok(()) => {
                    info!(unit_id, "Reconnected to Modbus device");
                    self.report.reconnects += 1;
                    self.state = BridgeState::Connected;
                }
                Err(e) => {
                    warn!(unit_id, error = %e, "Modbus device unreachable, retrying next cycle");
                    return CycleOutcome::Disconnected;
                }
            }
        }

        self.state = BridgeState::Polling;

        let words = match self.source.read_holding_registers(address, count).await {
            Ok(words) => words,
            Err(e) if e.is_transient() => {
                warn!(unit_id, address, count, error = %e, "Poll failed, skipping cycle");
                self.report.skipped += 1;
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                error!(unit_id, address, error = %e, "Lost Modbus connection, reconnecting");
                self.source.close().await;
                self.state = BridgeState::Disconnected;
                self.report.disconnects += 1;
                return CycleOutcome::Disconnected;
            }
        };

        let sample = RegisterSample::new(unit_id, address, words);
        let payload = match sample.render(self.settings.format) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(unit_id, address, error = %e, "Failed to render payload, skipping cycle");
                self.report.skipped += 1;
                return CycleOutcome::Skipped;
            }
        };

        let message = BridgeMessage::new(self.settings.topic.as_str(), payload);
        let topic = message.topic.as_str();
        match self.sink.publish(topic, message.payload).await {
            Ok(()) => {
                debug!(
                    topic = %topic,
                    words = ?sample.words,
                    value = ?sample.value,
                    "Published registers"
                );
                self.report.published += 1;
                CycleOutcome::Published
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to publish registers");
                self.report.publish_failures += 1;
                CycleOutcome::PublishFailed
            }
        }
    }

    /// Poll every interval until shutdown.
    ///
    /// The first cycle runs immediately. Shutdown is checked between cycles,
    /// so a cycle in progress always completes. The Modbus connection is
    /// closed before returning.
    pub async fn run(&mut self, mut shutdown: ShutdownSignal) -> BridgeReport {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            unit_id = self.settings.unit_id,
            address = self.settings.address,
            count = self.settings.count,
            topic = %self.settings.topic,
            format = ?self.settings.format,
            interval_ms = self.settings.interval.as_millis() as u64,
            "Starting poll loop"
        );

        loop {
            let stop = tokio::select! {
                biased;
                _ = shutdown.triggered() => true,
                _ = ticker.tick() => false,
            };
            if stop {
                break;
            }
            self.poll_cycle().await;
        }

        self.source.close().await;
        self.state = BridgeState::Stopped;

        let report = self.report;
        info!(
            cycles = report.cycles,
            published = report.published,
            skipped = report.skipped,
            publish_failures = report.publish_failures,
            disconnects = report.disconnects,
            reconnects = report.reconnects,
            "Poll loop stopped"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use meterbus_framework::{FrameworkError, Shutdown};
    use parking_lot::Mutex;

    /// Replays scripted results, then keeps succeeding.
    struct ScriptedSource {
        reads: VecDeque<Result<Vec<u16>, PollerError>>,
        reconnects: VecDeque<Result<(), PollerError>>,
        closed: Arc<Mutex<u32>>,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Result<Vec<u16>, PollerError>>) -> Self {
            Self {
                reads: reads.into(),
                reconnects: VecDeque::new(),
                closed: Arc::new(Mutex::new(0)),
            }
        }

        fn with_reconnects(mut self, reconnects: Vec<Result<(), PollerError>>) -> Self {
            self.reconnects = reconnects.into();
            self
        }
    }

    #[async_trait]
    impl RegisterSource for ScriptedSource {
        async fn read_holding_registers(
            &mut self,
            _address: u16,
            _count: u16,
        ) -> Result<Vec<u16>, PollerError> {
            self.reads.pop_front().unwrap_or(Ok(vec![0, 16480]))
        }

        async fn reconnect(&mut self) -> Result<(), PollerError> {
            self.reconnects.pop_front().unwrap_or(Ok(()))
        }

        async fn close(&mut self) {
            *self.closed.lock() += 1;
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> meterbus_framework::Result<()> {
            if self.fail {
                return Err(FrameworkError::Publish {
                    topic: topic.to_string(),
                    message: "broker unavailable".to_string(),
                });
            }
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn settings(format: PayloadFormat) -> PollSettings {
        PollSettings {
            unit_id: 1,
            address: 2998,
            count: 2,
            interval: Duration::from_secs(1),
            topic: "openfmb/metermodule/MeterReadingProfile/modbus".to_string(),
            format,
        }
    }

    fn exception() -> PollerError {
        PollerError::Exception {
            address: 2998,
            count: 2,
            code: ExceptionCode::IllegalDataAddress,
        }
    }

    fn lost() -> PollerError {
        PollerError::Transport("connection reset by peer".to_string())
    }

    fn refused() -> PollerError {
        PollerError::Connect {
            addr: "127.0.0.1:1502".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_cycle_publishes_raw_words() {
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(
            ScriptedSource::new(vec![]),
            sink.clone(),
            settings(PayloadFormat::Raw),
        );
        assert_eq!(bridge.state(), BridgeState::Connected);

        let outcome = bridge.poll_cycle().await;

        assert_eq!(outcome, CycleOutcome::Published);
        assert_eq!(bridge.state(), BridgeState::Polling);
        let published = sink.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "openfmb/metermodule/MeterReadingProfile/modbus");
        assert_eq!(published[0].1, b"0, 16480");
    }

    #[tokio::test]
    async fn test_value_and_json_formats() {
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(
            ScriptedSource::new(vec![]),
            sink.clone(),
            settings(PayloadFormat::Value),
        );
        bridge.poll_cycle().await;
        assert_eq!(sink.published.lock()[0].1, b"3.5");

        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(
            ScriptedSource::new(vec![]),
            sink.clone(),
            settings(PayloadFormat::Json),
        );
        bridge.poll_cycle().await;
        let json: serde_json::Value = serde_json::from_slice(&sink.published.lock()[0].1).unwrap();
        assert_eq!(json["unit_id"], 1);
        assert_eq!(json["address"], 2998);
        assert_eq!(json["words"], serde_json::json!([0, 16480]));
        assert_eq!(json["value"], 3.5);
    }

    #[tokio::test]
    async fn test_exception_and_timeout_skip_cycle() {
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(
            ScriptedSource::new(vec![
                Err(exception()),
                Err(PollerError::Timeout(Duration::from_secs(1))),
            ]),
            sink.clone(),
            settings(PayloadFormat::Raw),
        );

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Skipped);
        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Skipped);
        assert!(sink.published.lock().is_empty());

        // Polling carries on.
        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);
        assert_eq!(
            bridge.report(),
            BridgeReport {
                cycles: 3,
                published: 1,
                skipped: 2,
                ..BridgeReport::default()
            }
        );
    }

    #[tokio::test]
    async fn test_transport_failure_closes_and_reconnects() {
        let source = ScriptedSource::new(vec![Err(lost())]);
        let closed = source.closed.clone();
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(source, sink.clone(), settings(PayloadFormat::Raw));

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(bridge.state(), BridgeState::Disconnected);
        assert_eq!(*closed.lock(), 1);

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);
        assert_eq!(bridge.state(), BridgeState::Polling);
        assert_eq!(sink.published.lock().len(), 1);
        assert_eq!(bridge.report().disconnects, 1);
        assert_eq!(bridge.report().reconnects, 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_stays_disconnected() {
        let source = ScriptedSource::new(vec![Err(lost())])
            .with_reconnects(vec![Err(refused()), Err(refused())]);
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(source, sink, settings(PayloadFormat::Raw));

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Disconnected);
        assert_eq!(bridge.state(), BridgeState::Disconnected);

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::Published);
        assert_eq!(bridge.report().reconnects, 1);
        assert_eq!(bridge.report().disconnects, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut bridge = Bridge::new(
            ScriptedSource::new(vec![]),
            sink,
            settings(PayloadFormat::Raw),
        );

        assert_eq!(bridge.poll_cycle().await, CycleOutcome::PublishFailed);
        assert_eq!(bridge.report().publish_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let source = ScriptedSource::new(vec![]);
        let closed = source.closed.clone();
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(source, sink.clone(), settings(PayloadFormat::Raw));

        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let task = tokio::spawn(async move {
            let report = bridge.run(signal).await;
            (bridge, report)
        });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        shutdown.trigger();

        let (bridge, report) = task.await.unwrap();
        assert_eq!(report.cycles, 5);
        assert_eq!(report.published, 5);
        assert_eq!(sink.published.lock().len(), 5);
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert_eq!(*closed.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_lost_connection() {
        // Cycle 1 publishes, cycle 2 loses the connection, cycle 3 fails to
        // reconnect, cycle 4 reconnects and publishes again.
        let source = ScriptedSource::new(vec![Ok(vec![0, 16480]), Err(lost())])
            .with_reconnects(vec![Err(refused())]);
        let sink = RecordingSink::default();
        let mut bridge = Bridge::new(source, sink.clone(), settings(PayloadFormat::Raw));

        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        let task = tokio::spawn(async move {
            let report = bridge.run(signal).await;
            (bridge, report)
        });

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        shutdown.trigger();

        let (bridge, report) = task.await.unwrap();
        assert_eq!(
            report,
            BridgeReport {
                cycles: 5,
                published: 3,
                skipped: 0,
                publish_failures: 0,
                disconnects: 1,
                reconnects: 1,
            }
        );
        assert_eq!(sink.published.lock().len(), 3);
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[test]
    fn test_error_classification() {
        assert!(exception().is_transient());
        assert!(PollerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(PollerError::Protocol("bad header".to_string()).is_transient());
        assert!(!lost().is_transient());
        assert!(!refused().is_transient());
    }
}
