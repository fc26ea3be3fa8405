//! DNS over UDP.
//!
//! One socket serves the whole lifetime of the server; every datagram is a
//! complete message and gets its own `UdpConnection` pointing back at the
//! sender.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::MAX_PACKET_SIZE;
use crate::connection::{Connection, UDP_MAX_MESSAGE_SIZE};
use crate::errors::DnsError;
use crate::server::{BaseServer, EventReceiver, Server, ServerEvent, Transport};

/// Sends to the single datagram source a request came from.
#[derive(Debug, Clone)]
pub struct UdpConnection {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl UdpConnection {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), DnsError> {
        self.socket.send_to(data, self.peer).await?;
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        UDP_MAX_MESSAGE_SIZE
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// UDP DNS server.
pub struct UdpServer {
    base: Arc<BaseServer>,
}

impl UdpServer {
    /// Create an unbound server and the channel its events arrive on.
    pub fn new() -> (Self, EventReceiver) {
        let (base, events) = BaseServer::new(Transport::Udp);
        (
            Self {
                base: Arc::new(base),
            },
            events,
        )
    }
}

#[async_trait]
impl Server for UdpServer {
    fn transport(&self) -> Transport {
        Transport::Udp
    }

    async fn listen(&self, port: u16, address: IpAddr) -> Result<SocketAddr, DnsError> {
        self.base.ensure_unbound()?;

        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(address, port)).await?);
        let local_addr = socket.local_addr()?;
        info!("UDP DNS server listening on {}", local_addr);

        let shutdown = self.base.shutdown_signal();
        self.base.mark_listening(local_addr);

        let handle = tokio::spawn(receive_loop(socket, self.base.clone(), shutdown));
        self.base.track_task(handle).await;
        Ok(local_addr)
    }

    async fn close(&self) {
        self.base.close().await;
    }

    fn is_bound(&self) -> bool {
        self.base.is_bound()
    }

    fn local_addr(&self) -> Result<SocketAddr, DnsError> {
        self.base.local_addr()
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    base: Arc<BaseServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((amt, src)) => {
                    debug!("UDP datagram of {} bytes from {}", amt, src);
                    let connection = Arc::new(UdpConnection::new(socket.clone(), src));
                    base.handle_message(&buf[..amt], connection);
                }
                Err(e) => {
                    error!("UDP receive error: {}", e);
                    base.emit(ServerEvent::Error(e.into()));
                }
            },
        }
    }

    drop(socket);
    base.mark_closed();
}
