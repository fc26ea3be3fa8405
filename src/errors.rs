//! Error types for the query service.
//!
//! This module defines the error types used throughout the DNS query engine,
//! from packet parsing up to the persistence lookups.

use thiserror::Error;

/// Represents errors that can occur in the query service.
#[derive(Error, Debug)]
pub enum DnsError {
    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database errors from rusqlite.
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Connection pool errors from r2d2.
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Malformed inbound DNS bytes.
    #[error("Invalid DNS packet: {0}")]
    Protocol(String),

    /// A message did not fit into the buffer it was written to.
    #[error("Buffer overflow: cannot write {needed} bytes, {available} available")]
    BufferOverflow {
        /// Bytes needed to write.
        needed: usize,
        /// Bytes left in the buffer.
        available: usize,
    },

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A string could not be parsed as an E.164 number.
    #[error("Invalid phone number: {0}")]
    InvalidNumber(String),

    /// A phone or record lookup failed.
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// A lookup did not complete within the configured deadline.
    #[error("Lookup timed out")]
    Timeout,

    /// The server is not bound to a socket.
    #[error("Server is not bound")]
    NotBound,

    /// `listen` was called on a server that is already bound.
    #[error("Server is already bound to {0}")]
    AlreadyBound(std::net::SocketAddr),
}
