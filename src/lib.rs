//! Mock Pathfinder Library
//!
//! This library provides an ENUM (E.164 number to URI mapping) DNS service.
//! It answers NAPTR queries over UDP and TCP with the records provisioned for
//! a phone number's profile, always followed by a default PSTN record.

pub mod config;
pub mod connection;
pub mod db;
pub mod domain;
pub mod errors;
pub mod packet;
pub mod phone;
pub mod query;
pub mod response;
pub mod server;
pub mod tcp;
pub mod udp;
pub mod utils;

// Re-export commonly used items
pub use config::{DefaultRecord, QueryConfig, ServerConfig, TransportMode};
pub use db::SqliteStore;
pub use domain::{PhoneLookup, RecordLookup};
pub use errors::DnsError;
pub use query::{EnumResolver, QueryService};
pub use server::{Server, ServerEvent, Transport};
