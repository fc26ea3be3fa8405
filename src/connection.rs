//! Transport connections.
//!
//! A connection is the capability to send bytes back to whoever asked. The
//! TCP flavour also needs to cut a byte stream into messages, which is what
//! `FrameReassembler` does.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};

use crate::errors::DnsError;

/// Largest response a UDP connection will send (no EDNS0).
pub const UDP_MAX_MESSAGE_SIZE: usize = 512;

/// Largest response a TCP connection will send.
pub const TCP_MAX_MESSAGE_SIZE: usize = 4096;

/// Length of the TCP frame prefix.
const FRAME_PREFIX_LEN: usize = 2;

/// Transport-bound send capability.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one complete DNS message to the peer.
    async fn send(&self, data: &[u8]) -> Result<(), DnsError>;

    /// Size of the buffer a response is serialized into.
    fn max_message_size(&self) -> usize;

    /// Address of the peer this connection answers to.
    fn peer_addr(&self) -> SocketAddr;
}

/// Prefix a message with its big-endian u16 length.
///
/// # Arguments
/// * `message` - The message to frame.
///
/// # Returns
/// The framed bytes, or `DnsError::Protocol` if the message is longer than
/// 65535 bytes.
pub fn frame(message: &[u8]) -> Result<Vec<u8>, DnsError> {
    let len = u16::try_from(message.len()).map_err(|_| {
        DnsError::Protocol(format!("message of {} bytes cannot be framed", message.len()))
    })?;
    let mut out = Vec::with_capacity(FRAME_PREFIX_LEN + message.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(message);
    Ok(out)
}

/// Accumulates stream chunks and yields complete length-prefixed frames.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buffer: BytesMut,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(TCP_MAX_MESSAGE_SIZE),
        }
    }

    /// Append a chunk and return every frame it completes, in arrival order.
    ///
    /// A trailing partial frame stays buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn next_frame(&mut self) -> Option<Bytes> {
        if self.buffer.len() < FRAME_PREFIX_LEN {
            return None;
        }
        let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if self.buffer.len() < FRAME_PREFIX_LEN + len {
            return None;
        }

        self.buffer.advance(FRAME_PREFIX_LEN);
        Some(self.buffer.split_to(len).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(messages: &[&[u8]]) -> Vec<u8> {
        messages
            .iter()
            .flat_map(|m| frame(m).unwrap())
            .collect()
    }

    #[test]
    fn single_chunk_yields_single_frame() {
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&framed(&[b"hello"]));
        assert_eq!(frames, vec![Bytes::from_static(b"hello")]);
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn frame_split_at_every_offset() {
        let message: Vec<u8> = (0u8..40).collect();
        let wire = frame(&message).unwrap();

        for split in 0..=wire.len() {
            let mut reassembler = FrameReassembler::new();
            let mut frames = reassembler.push(&wire[..split]);
            frames.extend(reassembler.push(&wire[split..]));
            assert_eq!(frames.len(), 1, "split at {}", split);
            assert_eq!(&frames[0][..], message.as_slice());
            assert_eq!(reassembler.pending(), 0);
        }
    }

    #[test]
    fn frame_split_across_many_chunks() {
        let message = b"a longer message delivered one byte at a time";
        let wire = frame(message).unwrap();

        let mut reassembler = FrameReassembler::new();
        let mut frames = Vec::new();
        for byte in &wire {
            frames.extend(reassembler.push(std::slice::from_ref(byte)));
        }
        assert_eq!(frames, vec![Bytes::copy_from_slice(message)]);
    }

    #[test]
    fn several_frames_in_one_chunk_keep_order() {
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&framed(&[b"first", b"second", b"third"]));
        assert_eq!(
            frames,
            vec![
                Bytes::from_static(b"first"),
                Bytes::from_static(b"second"),
                Bytes::from_static(b"third"),
            ]
        );
    }

    #[test]
    fn mixed_complete_and_partial_frames() {
        let wire = framed(&[b"one", b"two", b"three"]);
        // Cut inside the second frame's body.
        let cut = 2 + 3 + 2 + 1;

        let mut reassembler = FrameReassembler::new();
        let first = reassembler.push(&wire[..cut]);
        assert_eq!(first, vec![Bytes::from_static(b"one")]);
        assert_eq!(reassembler.pending(), 3);

        let rest = reassembler.push(&wire[cut..]);
        assert_eq!(
            rest,
            vec![Bytes::from_static(b"two"), Bytes::from_static(b"three")]
        );
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn zero_length_frame_is_emitted() {
        let mut reassembler = FrameReassembler::new();
        let frames = reassembler.push(&[0, 0]);
        assert_eq!(frames, vec![Bytes::new()]);
    }

    #[test]
    fn oversized_message_cannot_be_framed() {
        let message = vec![0u8; 70_000];
        assert!(frame(&message).is_err());
    }
}
