//! Responses bound to the connection that carried the request.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::connection::Connection;
use crate::errors::DnsError;
use crate::packet::{self, Header, Message, Request};

/// A response message paired with the connection it must be sent on.
pub struct Response {
    pub message: Message,
    connection: Arc<dyn Connection>,
}

impl Response {
    /// Derive a response from a request.
    ///
    /// The header id and the question section are copied, `qr` is set and
    /// every other header field starts from its default.
    pub fn from_request(request: &Request, connection: Arc<dyn Connection>) -> Self {
        let message = Message {
            header: Header {
                id: request.header.id,
                qr: true,
                ..Header::default()
            },
            question: request.question.clone(),
            ..Message::default()
        };
        Self {
            message,
            connection,
        }
    }

    /// The connection this response will be sent on.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Serialize the response and hand it to the connection.
    ///
    /// The message is written into a buffer sized to the connection's
    /// maximum message size; a message that does not fit is an error and
    /// nothing is sent.
    pub async fn send(self) -> Result<usize, DnsError> {
        let mut buf = vec![0u8; self.connection.max_message_size()];
        let len = packet::write(&mut buf, &self.message)?;
        buf.truncate(len);

        debug!(
            "Sending response id={} answers={} ({} bytes) to {}",
            self.message.header.id,
            self.message.answer.len(),
            len,
            self.connection.peer_addr()
        );
        self.connection.send(&buf).await?;
        Ok(len)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("message", &self.message)
            .field("peer", &self.connection.peer_addr())
            .finish()
    }
}
