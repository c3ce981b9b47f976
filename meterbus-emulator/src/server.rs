//! Modbus TCP server backed by the register store.

use std::future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_modbus::server::Service;
use tokio_modbus::server::tcp::Server;
use tokio_modbus::{ExceptionCode, Request, Response, SlaveRequest};
use tracing::{debug, info, warn};

use meterbus_framework::ShutdownSignal;

use crate::store::{RegisterStore, StoreError};

/// Largest quantity accepted by Read Holding Registers.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Largest quantity accepted by Write Multiple Registers.
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Buffer size of the in-process pipe between a client socket and the
/// protocol task serving it.
const PIPE_CAPACITY: usize = 4096;

/// Per-connection request handler.
#[derive(Debug, Clone)]
pub struct RegisterService {
    store: RegisterStore,
}

impl RegisterService {
    pub fn new(store: RegisterStore) -> Self {
        Self { store }
    }

    /// Answer one request addressed to `unit_id`.
    pub fn handle(&self, unit_id: u8, request: Request<'_>) -> Result<Response, ExceptionCode> {
        if !self.store.contains(unit_id) {
            return Err(reject(
                unit_id,
                None,
                "unknown unit id",
                ExceptionCode::GatewayTargetDevice,
            ));
        }

        match request {
            Request::ReadHoldingRegisters(address, quantity) => {
                if quantity == 0 || quantity > MAX_READ_QUANTITY {
                    return Err(reject(
                        unit_id,
                        Some(address),
                        "invalid read quantity",
                        ExceptionCode::IllegalDataValue,
                    ));
                }
                self.store
                    .read(unit_id, address, quantity)
                    .map(Response::ReadHoldingRegisters)
                    .map_err(|e| store_exception(unit_id, address, e))
            }
            Request::WriteSingleRegister(address, word) => self
                .store
                .write(unit_id, address, &[word])
                .map(|()| Response::WriteSingleRegister(address, word))
                .map_err(|e| store_exception(unit_id, address, e)),
            Request::WriteMultipleRegisters(address, words) => {
                let quantity = words.len();
                if quantity == 0 || quantity > MAX_WRITE_QUANTITY as usize {
                    return Err(reject(
                        unit_id,
                        Some(address),
                        "invalid write quantity",
                        ExceptionCode::IllegalDataValue,
                    ));
                }
                self.store
                    .write(unit_id, address, &words)
                    .map(|()| Response::WriteMultipleRegisters(address, quantity as u16))
                    .map_err(|e| store_exception(unit_id, address, e))
            }
            other => {
                warn!(unit_id, request = ?other, "Unsupported Modbus function");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

impl Service for RegisterService {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req.slave, req.request))
    }
}

fn reject(unit_id: u8, address: Option<u16>, reason: &str, code: ExceptionCode) -> ExceptionCode {
    warn!(unit_id, address = ?address, reason, exception = ?code, "Rejected Modbus request");
    code
}

fn store_exception(unit_id: u8, address: u16, error: StoreError) -> ExceptionCode {
    let code = match error {
        StoreError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
        StoreError::NotFound(_) => ExceptionCode::GatewayTargetDevice,
    };
    reject(unit_id, Some(address), &error.to_string(), code)
}

/// Client sockets, each owned by a relay task.
///
/// The protocol task of a connection only sees one end of an in-process
/// pipe; the socket itself stays with the relay, so aborting the relays
/// closes every client connection.
#[derive(Clone, Default)]
struct Connections {
    relays: Arc<Mutex<JoinSet<()>>>,
}

impl Connections {
    /// Hand `socket` to a relay task and return the pipe end to serve.
    fn relay(&self, mut socket: TcpStream, peer: SocketAddr) -> DuplexStream {
        let (served, mut relayed) = tokio::io::duplex(PIPE_CAPACITY);

        let mut relays = self.relays.lock();
        while relays.try_join_next().is_some() {}
        relays.spawn(async move {
            match tokio::io::copy_bidirectional(&mut socket, &mut relayed).await {
                Ok(_) => debug!(peer = %peer, "Modbus client disconnected"),
                Err(e) => debug!(peer = %peer, error = %e, "Modbus connection closed"),
            }
        });

        served
    }

    /// Close every open connection. Returns how many were still open.
    async fn close_all(&self) -> usize {
        let mut relays = std::mem::take(&mut *self.relays.lock());
        while relays.try_join_next().is_some() {}
        let open = relays.len();
        relays.shutdown().await;
        open
    }
}

/// Serve Modbus TCP on `listener` until shutdown is signalled.
///
/// On shutdown the listener stops accepting and every open client
/// connection is closed before this returns.
pub async fn serve(
    listener: TcpListener,
    store: RegisterStore,
    mut shutdown: ShutdownSignal,
) -> io::Result<()> {
    let local_addr = listener.local_addr()?;
    let server = Server::new(listener);
    let connections = Connections::default();

    let on_connected = {
        let connections = connections.clone();
        move |stream: TcpStream, peer: SocketAddr| {
            debug!(peer = %peer, "Modbus client connected");
            let service = RegisterService::new(store.clone());
            let pipe = connections.relay(stream, peer);
            future::ready(Ok::<_, io::Error>(Some((service, pipe))))
        }
    };
    let on_process_error = |err: io::Error| {
        warn!(error = %err, "Modbus connection error");
    };

    info!(addr = %local_addr, "Modbus server listening");

    let result = tokio::select! {
        result = server.serve(&on_connected, on_process_error) => result,
        _ = shutdown.triggered() => {
            info!(addr = %local_addr, "Modbus server stopped accepting connections");
            Ok(())
        }
    };

    let closed = connections.close_all().await;
    if closed > 0 {
        info!(connections = closed, "Closed Modbus client connections");
    }

    result
}
