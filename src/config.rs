//! Configuration for the query service.
//!
//! This module defines the configuration structure and methods to load
//! configuration from environment variables.

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::errors::DnsError;
use crate::packet::Naptr;
use crate::server::Transport;

/// Default port the query service listens on.
pub const DEFAULT_PORT: u16 = 53;

/// Default deadline for the phone and record lookups of one request.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Size of the buffer inbound datagrams are received into.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Which transports the query service listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Udp,
    Tcp,
    Both,
}

impl TransportMode {
    /// The transports to start for this mode.
    pub fn transports(&self) -> Vec<Transport> {
        match self {
            TransportMode::Udp => vec![Transport::Udp],
            TransportMode::Tcp => vec![Transport::Tcp],
            TransportMode::Both => vec![Transport::Udp, Transport::Tcp],
        }
    }
}

impl FromStr for TransportMode {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportMode::Udp),
            "tcp" => Ok(TransportMode::Tcp),
            "both" | "udp,tcp" | "tcp,udp" => Ok(TransportMode::Both),
            other => Err(DnsError::Config(format!("Invalid QUERY_TRANSPORT: {}", other))),
        }
    }
}

/// Template of the NAPTR record appended to every NAPTR answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRecord {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    /// Used as is, it is expected to already be a `!pattern!uri!` expression.
    pub regexp: String,
    pub replacement: String,
    pub ttl: u32,
}

impl Default for DefaultRecord {
    fn default() -> Self {
        Self {
            order: 10,
            preference: 50,
            flags: "u".into(),
            service: "E2U+pstn:tel".into(),
            regexp: r"!^(.*)$!tel:\1;q_stat=102!".into(),
            replacement: String::new(),
            ttl: 900,
        }
    }
}

impl DefaultRecord {
    /// NAPTR data of the template.
    pub fn naptr(&self) -> Naptr {
        Naptr {
            order: self.order,
            preference: self.preference,
            flags: self.flags.clone(),
            service: self.service.clone(),
            regexp: self.regexp.clone(),
            replacement: self.replacement.clone(),
        }
    }

    /// Load the template, falling back to the built-in defaults per field.
    pub fn from_env() -> Result<Self, DnsError> {
        let defaults = Self::default();
        Ok(Self {
            order: env_or("DEFAULT_RECORD_ORDER", defaults.order)?,
            preference: env_or("DEFAULT_RECORD_PREFERENCE", defaults.preference)?,
            flags: env::var("DEFAULT_RECORD_FLAGS").unwrap_or(defaults.flags),
            service: env::var("DEFAULT_RECORD_SERVICE").unwrap_or(defaults.service),
            regexp: env::var("DEFAULT_RECORD_REGEXP").unwrap_or(defaults.regexp),
            replacement: env::var("DEFAULT_RECORD_REPLACEMENT").unwrap_or(defaults.replacement),
            ttl: env_or("DEFAULT_RECORD_TTL", defaults.ttl)?,
        })
    }
}

/// Settings consumed by the query service itself.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Port to listen on.
    pub port: u16,

    /// Address to bind to.
    pub address: IpAddr,

    /// Transports to serve.
    pub transport: TransportMode,

    /// Deadline for the lookups of a single request.
    pub lookup_timeout: Duration,

    /// Record appended to every NAPTR answer.
    pub default_record: DefaultRecord,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            address: IpAddr::from([0, 0, 0, 0]),
            transport: TransportMode::Udp,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            default_record: DefaultRecord::default(),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Query service settings.
    pub query: QueryConfig,

    /// Path to the SQLite database file.
    pub db_path: String,

    /// Address of the Prometheus exporter, if enabled.
    pub metrics_addr: Option<SocketAddr>,
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    ///
    /// # Returns
    /// A `Result` containing either the loaded `ServerConfig` or a `DnsError`.
    pub fn from_env() -> Result<Self, DnsError> {
        let address = env::var("QUERY_BIND_ADDRESS")
            .unwrap_or_else(|_| "0.0.0.0".into())
            .parse()
            .map_err(|_| DnsError::Config("Invalid QUERY_BIND_ADDRESS".into()))?;

        let transport = match env::var("QUERY_TRANSPORT") {
            Ok(value) => value.parse()?,
            Err(_) => TransportMode::Udp,
        };

        let lookup_timeout = Duration::from_millis(env_or(
            "QUERY_LOOKUP_TIMEOUT_MS",
            DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64,
        )?);

        let metrics_addr = match env::var("METRICS_ADDR") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| DnsError::Config("Invalid METRICS_ADDR".into()))?,
            ),
            _ => None,
        };

        let config = Self {
            query: QueryConfig {
                port: env_or("QUERY_PORT", DEFAULT_PORT)?,
                address,
                transport,
                lookup_timeout,
                default_record: DefaultRecord::from_env()?,
            },
            db_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "pathfinder.db".into()),
            metrics_addr,
        };

        info!(
            "Loaded configuration: port={} transport={:?} db={}",
            config.query.port, config.query.transport, config.db_path
        );
        Ok(config)
    }
}

/// Parse an optional numeric environment variable.
fn env_or<T>(key: &str, default: T) -> Result<T, DnsError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| DnsError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
