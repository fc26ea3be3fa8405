//! Utility functions for DNS wire data.
//!
//! This module provides bounds-checked cursors for reading and writing DNS
//! messages, plus helpers for encoding and decoding domain names.

use std::str;

use crate::errors::DnsError;

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of an encoded domain name.
pub const MAX_NAME_LEN: usize = 255;

/// A cursor over an inbound DNS message.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn eof(&self, wanted: usize) -> DnsError {
        DnsError::Protocol(format!(
            "unexpected end of data at offset {} (wanted {} bytes)",
            self.pos, wanted
        ))
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DnsError> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.eof(1))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, DnsError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, DnsError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DnsError> {
        if self.remaining() < len {
            return Err(self.eof(len));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a length-prefixed character-string.
    pub fn read_character_string(&mut self) -> Result<String, DnsError> {
        let len = self.read_u8()? as usize;
        let bytes = self.read_bytes(len)?;
        str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DnsError::Protocol("character-string is not valid UTF-8".into()))
    }

    /// Read an uncompressed domain name.
    ///
    /// Labels are joined with dots, without a trailing dot; the root name is
    /// returned as an empty string. Compression pointers, labels containing a
    /// dot and names longer than 255 bytes on the wire are rejected.
    pub fn read_name(&mut self) -> Result<String, DnsError> {
        let start = self.pos;
        let mut domain = String::new();

        loop {
            let len = self.read_u8()? as usize;
            if len == 0 {
                break;
            }
            if len & 0xC0 != 0 {
                return Err(DnsError::Protocol(format!(
                    "compressed or extended label at offset {}",
                    self.pos - 1
                )));
            }

            let label = self.read_bytes(len)?;
            let label = str::from_utf8(label)
                .map_err(|_| DnsError::Protocol("label is not valid UTF-8".into()))?;
            if label.contains('.') {
                return Err(DnsError::Protocol(format!("label {:?} contains a dot", label)));
            }

            if !domain.is_empty() {
                domain.push('.');
            }
            domain.push_str(label);

            // The terminating zero byte counts towards the limit.
            if self.pos - start + 1 > MAX_NAME_LEN {
                return Err(DnsError::Protocol("domain name exceeds 255 bytes".into()));
            }
        }

        Ok(domain)
    }
}

/// A cursor writing into a caller-supplied buffer.
#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    /// Create a writer positioned at the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn reserve(&self, needed: usize) -> Result<(), DnsError> {
        let available = self.buf.len().saturating_sub(self.pos);
        if needed > available {
            return Err(DnsError::BufferOverflow { needed, available });
        }
        Ok(())
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, value: u8) -> Result<(), DnsError> {
        self.put_bytes(&[value])
    }

    /// Write a big-endian u16.
    pub fn put_u16(&mut self, value: u16) -> Result<(), DnsError> {
        self.put_bytes(&value.to_be_bytes())
    }

    /// Write a big-endian u32.
    pub fn put_u32(&mut self, value: u32) -> Result<(), DnsError> {
        self.put_bytes(&value.to_be_bytes())
    }

    /// Write raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), DnsError> {
        self.reserve(bytes.len())?;
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Overwrite a big-endian u16 at an earlier offset.
    pub fn patch_u16(&mut self, at: usize, value: u16) -> Result<(), DnsError> {
        if at + 2 > self.pos {
            return Err(DnsError::Protocol(format!("cannot patch unwritten offset {}", at)));
        }
        self.buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Write a length-prefixed character-string.
    pub fn put_character_string(&mut self, value: &str) -> Result<(), DnsError> {
        let len = u8::try_from(value.len()).map_err(|_| {
            DnsError::Protocol(format!("character-string of {} bytes is too long", value.len()))
        })?;
        self.put_u8(len)?;
        self.put_bytes(value.as_bytes())
    }

    /// Write a domain name without compression.
    pub fn put_name(&mut self, name: &str) -> Result<(), DnsError> {
        let encoded = encode_dns_name(name)?;
        self.put_bytes(&encoded)
    }
}

/// Encode a domain name in DNS wire format.
///
/// # Arguments
/// * `name` - The domain name to encode. A trailing dot is optional and the
///   empty string (or `"."`) denotes the root.
///
/// # Returns
/// The encoded name, or a `DnsError::Protocol` for empty or oversized labels.
pub fn encode_dns_name(name: &str) -> Result<Vec<u8>, DnsError> {
    let mut out = Vec::with_capacity(name.len() + 2);
    let trimmed = name.trim_end_matches('.');

    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(DnsError::Protocol(format!("empty label in name {:?}", name)));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(DnsError::Protocol(format!(
                    "label of {} bytes exceeds 63 in name {:?}",
                    label.len(),
                    name
                )));
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);

    if out.len() > MAX_NAME_LEN {
        return Err(DnsError::Protocol(format!("name {:?} exceeds 255 bytes", name)));
    }
    Ok(out)
}
