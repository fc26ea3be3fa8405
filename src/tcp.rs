//! DNS over TCP.
//!
//! Messages travel as `u16 length | message` frames. Each accepted stream
//! becomes one `TcpConnection` for writing and one `TcpReader` that
//! reassembles inbound frames in arrival order.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

use crate::connection::{frame, Connection, FrameReassembler, TCP_MAX_MESSAGE_SIZE};
use crate::errors::DnsError;
use crate::server::{BaseServer, EventReceiver, Server, ServerEvent, Transport};

/// Write side of an accepted TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    writer: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl TcpConnection {
    /// Split an accepted stream into its send capability and its reader.
    pub fn accept(stream: TcpStream, peer: SocketAddr) -> (Arc<Self>, TcpReader) {
        let (read, write) = stream.into_split();
        let connection = Arc::new(Self {
            writer: Mutex::new(write),
            peer,
        });
        (connection, TcpReader::new(read))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, data: &[u8]) -> Result<(), DnsError> {
        let framed = frame(data)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&framed).await?;
        Ok(())
    }

    fn max_message_size(&self) -> usize {
        TCP_MAX_MESSAGE_SIZE
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

/// Read side of an accepted TCP stream.
#[derive(Debug)]
pub struct TcpReader {
    read: OwnedReadHalf,
    reassembler: FrameReassembler,
    ready: VecDeque<Bytes>,
    chunk: Vec<u8>,
}

impl TcpReader {
    fn new(read: OwnedReadHalf) -> Self {
        Self {
            read,
            reassembler: FrameReassembler::new(),
            ready: VecDeque::new(),
            chunk: vec![0u8; TCP_MAX_MESSAGE_SIZE],
        }
    }

    /// Next complete message from the stream.
    ///
    /// # Returns
    /// `Ok(None)` once the peer has closed the stream. A partial frame left
    /// in the buffer at that point is discarded.
    pub async fn next_message(&mut self) -> Result<Option<Bytes>, DnsError> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }

            let n = self.read.read(&mut self.chunk).await?;
            if n == 0 {
                if self.reassembler.pending() > 0 {
                    debug!(
                        "Discarding {} bytes of incomplete frame",
                        self.reassembler.pending()
                    );
                }
                return Ok(None);
            }
            self.ready.extend(self.reassembler.push(&self.chunk[..n]));
        }
    }
}

/// TCP DNS server.
pub struct TcpServer {
    base: Arc<BaseServer>,
}

impl TcpServer {
    /// Create an unbound server and the channel its events arrive on.
    pub fn new() -> (Self, EventReceiver) {
        let (base, events) = BaseServer::new(Transport::Tcp);
        (
            Self {
                base: Arc::new(base),
            },
            events,
        )
    }
}

#[async_trait]
impl Server for TcpServer {
    fn transport(&self) -> Transport {
        Transport::Tcp
    }

    async fn listen(&self, port: u16, address: IpAddr) -> Result<SocketAddr, DnsError> {
        self.base.ensure_unbound()?;

        let listener = TcpListener::bind(SocketAddr::new(address, port)).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP DNS server listening on {}", local_addr);

        let shutdown = self.base.shutdown_signal();
        self.base.mark_listening(local_addr);

        let handle = tokio::spawn(accept_loop(listener, self.base.clone(), shutdown));
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

async fn accept_loop(
    listener: TcpListener,
    base: Arc<BaseServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("TCP connection from {}", peer);
                    let (connection, reader) = TcpConnection::accept(stream, peer);
                    tokio::spawn(serve_connection(
                        connection,
                        reader,
                        base.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!("TCP accept error: {}", e);
                    base.emit(ServerEvent::Error(e.into()));
                }
            },
        }
    }

    drop(listener);
    base.mark_closed();
}

/// Feed every reassembled message of one stream to the dispatcher, in order.
async fn serve_connection(
    connection: Arc<TcpConnection>,
    mut reader: TcpReader,
    base: Arc<BaseServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    let peer = connection.peer_addr();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = reader.next_message() => match next {
                Ok(Some(message)) => {
                    base.handle_message(&message, connection.clone());
                }
                Ok(None) => {
                    debug!("TCP connection from {} closed", peer);
                    break;
                }
                Err(e) => {
                    warn!("TCP connection error from {}: {}", peer, e);
                    base.emit(ServerEvent::Error(e));
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{self, Header, Message, Question, TYPE_NAPTR};
    use std::net::Ipv4Addr;

    fn query_bytes(id: u16) -> Vec<u8> {
        let message = Message {
            header: Header {
                id,
                ..Header::default()
            },
            question: vec![Question::new("7.6.5.e164enum.net", TYPE_NAPTR)],
            ..Message::default()
        };
        let mut buf = vec![0u8; 512];
        let len = packet::write(&mut buf, &message).unwrap();
        buf.truncate(len);
        buf
    }

    async fn next_request_id(events: &mut EventReceiver) -> u16 {
        match events.recv().await {
            Some(ServerEvent::Request(request, _)) => request.header.id,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn frames_from_one_stream_are_dispatched_in_order() {
        let (server, mut events) = TcpServer::new();
        let addr = server
            .listen(0, IpAddr::V4(Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        assert!(matches!(events.recv().await, Some(ServerEvent::Listening(_))));

        let mut wire = Vec::new();
        for id in 1..=3u16 {
            wire.extend(frame(&query_bytes(id)).unwrap());
        }

        let mut client = TcpStream::connect(addr).await.unwrap();
        // First write ends in the middle of the second frame.
        let cut = wire.len() / 2;
        client.write_all(&wire[..cut]).await.unwrap();
        client.flush().await.unwrap();
        assert_eq!(next_request_id(&mut events).await, 1);

        client.write_all(&wire[cut..]).await.unwrap();
        assert_eq!(next_request_id(&mut events).await, 2);
        assert_eq!(next_request_id(&mut events).await, 3);

        server.close().await;
    }

    #[tokio::test]
    async fn response_is_framed_back_on_the_same_stream() {
        let (server, mut events) = TcpServer::new();
        let addr = server
            .listen(0, IpAddr::V4(Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        assert!(matches!(events.recv().await, Some(ServerEvent::Listening(_))));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&frame(&query_bytes(99)).unwrap())
            .await
            .unwrap();

        let response = match events.recv().await {
            Some(ServerEvent::Request(_, response)) => response,
            other => panic!("expected request, got {:?}", other),
        };
        assert_eq!(response.connection().max_message_size(), 4096);
        response.send().await.unwrap();

        let mut len_buf = [0u8; 2];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        client.read_exact(&mut body).await.unwrap();

        let parsed = packet::parse(&body).unwrap();
        assert_eq!(parsed.header.id, 99);
        assert!(parsed.header.qr);

        server.close().await;
    }

    #[tokio::test]
    async fn malformed_frame_does_not_stop_the_stream() {
        let (server, mut events) = TcpServer::new();
        let addr = server
            .listen(0, IpAddr::V4(Ipv4Addr::LOCALHOST))
            .await
            .unwrap();
        assert!(matches!(events.recv().await, Some(ServerEvent::Listening(_))));

        let mut wire = frame(&[0xff; 4]).unwrap();
        wire.extend(frame(&query_bytes(5)).unwrap());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&wire).await.unwrap();

        assert!(matches!(events.recv().await, Some(ServerEvent::Error(_))));
        assert_eq!(next_request_id(&mut events).await, 5);

        server.close().await;
        assert!(matches!(events.recv().await, Some(ServerEvent::Close)));
    }
}
