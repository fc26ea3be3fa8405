//! Transport-agnostic server lifecycle and dispatch.
//!
//! `BaseServer` holds what UDP and TCP servers share: the bound/unbound
//! state, the shutdown signal of the socket task and the event channel that
//! subscribers read `ServerEvent`s from. Transport servers embed it and
//! implement the `Server` trait.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::connection::Connection;
use crate::errors::DnsError;
use crate::packet::{self, Request};
use crate::response::Response;
use crate::tcp::TcpServer;
use crate::udp::UdpServer;

/// Receiving side of a server's notifications.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Notifications raised by a server.
#[derive(Debug)]
pub enum ServerEvent {
    /// The socket is bound and accepting traffic.
    Listening(SocketAddr),
    /// A message was parsed; the response is bound to its connection.
    Request(Request, Response),
    /// Malformed input or a socket-level failure.
    Error(DnsError),
    /// The socket has been closed.
    Close,
}

/// Transport a server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => f.write_str("UDP"),
            Transport::Tcp => f.write_str("TCP"),
        }
    }
}

/// Lifecycle of a DNS server.
#[async_trait]
pub trait Server: Send + Sync {
    /// Transport this server listens on.
    fn transport(&self) -> Transport;

    /// Bind to `(address, port)` and start serving.
    ///
    /// # Returns
    /// The locally bound address, which differs from the requested one when
    /// `port` is 0.
    async fn listen(&self, port: u16, address: IpAddr) -> Result<SocketAddr, DnsError>;

    /// Close the socket. Does nothing when the server is not bound.
    async fn close(&self);

    /// Whether the server currently holds a bound socket.
    fn is_bound(&self) -> bool;

    /// The bound address.
    fn local_addr(&self) -> Result<SocketAddr, DnsError>;
}

/// State and dispatch shared by every transport server.
pub struct BaseServer {
    transport: Transport,
    events: mpsc::UnboundedSender<ServerEvent>,
    bound: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl BaseServer {
    /// Create the shared state and the channel subscribers listen on.
    pub fn new(transport: Transport) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let base = Self {
            transport,
            events,
            bound: Mutex::new(None),
            shutdown,
            task: AsyncMutex::new(None),
        };
        (base, receiver)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_bound(&self) -> bool {
        self.bound_addr().is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DnsError> {
        self.bound_addr().ok_or(DnsError::NotBound)
    }

    fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail if the server already holds a socket.
    pub fn ensure_unbound(&self) -> Result<(), DnsError> {
        match self.bound_addr() {
            Some(addr) => Err(DnsError::AlreadyBound(addr)),
            None => Ok(()),
        }
    }

    /// Deliver an event to subscribers.
    pub fn emit(&self, event: ServerEvent) {
        if self.events.send(event).is_err() {
            debug!("{} server event dropped: no subscriber", self.transport);
        }
    }

    /// Parse raw bytes and notify subscribers of the request.
    ///
    /// A parse failure is reported as `ServerEvent::Error` and no request is
    /// emitted; the connection and the server keep running.
    pub fn handle_message(&self, bytes: &[u8], connection: Arc<dyn Connection>) {
        match packet::parse(bytes) {
            Ok(request) => {
                let response = Response::from_request(&request, connection);
                self.emit(ServerEvent::Request(request, response));
            }
            Err(e) => {
                warn!(
                    "Dropping malformed {} message from {}: {}",
                    self.transport,
                    connection.peer_addr(),
                    e
                );
                metrics::counter!("pathfinder_parse_errors_total", 1);
                self.emit(ServerEvent::Error(e));
            }
        }
    }

    /// A fresh shutdown receiver for the socket task about to be spawned.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.send_replace(false);
        self.shutdown.subscribe()
    }

    /// Record the bound address and notify `Listening`.
    pub fn mark_listening(&self, addr: SocketAddr) {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);
        self.emit(ServerEvent::Listening(addr));
    }

    /// Keep the socket task so `close` can wait for it.
    pub async fn track_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().await = Some(handle);
    }

    /// Called by the socket task once the socket has been dropped.
    pub fn mark_closed(&self) {
        *self.bound.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.emit(ServerEvent::Close);
    }

    /// Signal the socket task to stop and wait for it to release the socket.
    ///
    /// The task handle is taken on the first call, so later calls are no-ops
    /// and `Close` is notified at most once per `listen`.
    pub async fn close(&self) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            warn!("{} server task ended abnormally: {}", self.transport, e);
        }
    }
}

/// Create a server with the default transport (UDP).
pub fn create_server() -> (Box<dyn Server>, EventReceiver) {
    create_udp_server()
}

/// Create a UDP server.
pub fn create_udp_server() -> (Box<dyn Server>, EventReceiver) {
    let (server, events) = UdpServer::new();
    (Box::new(server), events)
}

/// Create a TCP server.
pub fn create_tcp_server() -> (Box<dyn Server>, EventReceiver) {
    let (server, events) = TcpServer::new();
    (Box::new(server), events)
}

/// Create a server for the given transport.
pub fn create_server_for(transport: Transport) -> (Box<dyn Server>, EventReceiver) {
    match transport {
        Transport::Udp => create_udp_server(),
        Transport::Tcp => create_tcp_server(),
    }
}
