//! ENUM query service.
//!
//! `EnumResolver` turns a NAPTR question for a reversed E.164 domain into the
//! NAPTR records of the phone's profile followed by the configured default
//! record. `QueryService` owns the DNS servers and feeds their requests to the
//! resolver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{DefaultRecord, QueryConfig};
use crate::domain::{PhoneLookup, Record, RecordLookup};
use crate::errors::DnsError;
use crate::packet::{type_name, Naptr, Request, ResourceRecord, RCODE_NOERROR, TYPE_NAPTR};
use crate::phone;
use crate::response::Response;
use crate::server::{create_server_for, EventReceiver, Server, ServerEvent};

/// What the lookup stage found for a NAPTR question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The domain does not decode to a valid number.
    InvalidNumber,
    /// No phone is provisioned for the number.
    UnknownPhone,
    /// The phone exists but is not active.
    InactivePhone,
    /// The phone is active; this many records were appended.
    Matched(usize),
}

/// Build the NAPTR answer for one provisioned record.
///
/// The stored pattern and URI become a `!pattern!uri!` substitution
/// expression and a replacement of `.` is sent as the root (empty) name.
pub fn synthesize_naptr(name: &str, record: &Record) -> ResourceRecord {
    let replacement = if record.replacement == "." {
        String::new()
    } else {
        record.replacement.clone()
    };

    ResourceRecord::naptr(
        name,
        record.ttl,
        Naptr {
            order: record.order,
            preference: record.preference,
            flags: record.flags.clone(),
            service: record.service.clone(),
            regexp: format!("!{}!{}!", record.regexp, record.uri),
            replacement,
        },
    )
}

/// The ENUM resolution engine.
pub struct EnumResolver {
    phones: Arc<dyn PhoneLookup>,
    records: Arc<dyn RecordLookup>,
    default_record: DefaultRecord,
    lookup_timeout: Duration,
}

impl EnumResolver {
    pub fn new(
        phones: Arc<dyn PhoneLookup>,
        records: Arc<dyn RecordLookup>,
        default_record: DefaultRecord,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            phones,
            records,
            default_record,
            lookup_timeout,
        }
    }

    /// Answer one request and send the response.
    ///
    /// Questions other than NAPTR get an empty answer. NAPTR questions get
    /// the records of the matching active phone, if any, always followed by
    /// the default record. Lookup failures and timeouts are logged and
    /// answered with whatever was found so far plus the default record.
    pub async fn handle_request(&self, request: Request, mut response: Response) -> Result<(), DnsError> {
        metrics::counter!("pathfinder_queries_total", 1);

        let Some(question) = request.question.first() else {
            warn!("Request {} carries no question", request.header.id);
            response.send().await?;
            return Ok(());
        };

        if question.qtype != TYPE_NAPTR {
            error!("Unsupported record type: {}", type_name(question.qtype));
            metrics::counter!("pathfinder_unsupported_total", 1);
            response.send().await?;
            return Ok(());
        }

        let name = question.name.clone();
        info!(
            "NAPTR query {} for {} from {}",
            request.header.id,
            name,
            response.connection().peer_addr()
        );

        let lookup = self.lookup(&name, &mut response.message.answer);
        let outcome = tokio::time::timeout(self.lookup_timeout, lookup)
            .await
            .unwrap_or(Err(DnsError::Timeout));
        let matched = match outcome {
            Ok(resolution) => {
                debug!("Resolved {}: {:?}", name, resolution);
                matches!(resolution, Resolution::Matched(_))
            }
            Err(e) => {
                error!("Lookup for {} fell back to the default record: {}", name, e);
                false
            }
        };
        if !matched {
            metrics::counter!("pathfinder_fallback_total", 1);
        }

        self.send_with_default(&name, response).await
    }

    /// Decode the domain, find the phone and append its records.
    pub async fn lookup(
        &self,
        name: &str,
        answer: &mut Vec<ResourceRecord>,
    ) -> Result<Resolution, DnsError> {
        let parsed = match phone::enum_domain_to_parsed_phone(name) {
            Ok(parsed) if parsed.is_valid_number => parsed,
            Ok(parsed) => {
                debug!(
                    "{} decodes to +{} {}, which is not a valid number",
                    name, parsed.country_code, parsed.national_number
                );
                return Ok(Resolution::InvalidNumber);
            }
            Err(e) => {
                debug!("{} does not decode to a number: {}", name, e);
                return Ok(Resolution::InvalidNumber);
            }
        };

        let found = self
            .phones
            .get_by_number(
                &parsed.national_number.to_string(),
                &parsed.country_code.to_string(),
            )
            .await?;

        let phone = match found {
            Some(phone) if phone.is_active() => phone,
            Some(phone) => {
                debug!("Phone {} is {}", phone.phone_id, phone.status);
                return Ok(Resolution::InactivePhone);
            }
            None => return Ok(Resolution::UnknownPhone),
        };

        let records = self
            .records
            .get_records_by_profile_id(&phone.profile_id)
            .await?;
        metrics::counter!("pathfinder_matched_records_total", records.len() as u64);

        answer.extend(records.iter().map(|record| synthesize_naptr(name, record)));
        Ok(Resolution::Matched(records.len()))
    }

    /// The default record with `name` as owner.
    pub fn default_answer(&self, name: &str) -> ResourceRecord {
        ResourceRecord::naptr(name, self.default_record.ttl, self.default_record.naptr())
    }

    async fn send_with_default(&self, name: &str, mut response: Response) -> Result<(), DnsError> {
        response.message.header.rcode = RCODE_NOERROR;
        response.message.answer.push(self.default_answer(name));
        response.send().await?;
        Ok(())
    }
}

struct Running {
    server: Box<dyn Server>,
    dispatcher: JoinHandle<()>,
}

/// Owns the DNS servers of the query service.
pub struct QueryService {
    config: QueryConfig,
    resolver: Arc<EnumResolver>,
    running: Mutex<Vec<Running>>,
}

impl QueryService {
    pub fn new(
        config: QueryConfig,
        phones: Arc<dyn PhoneLookup>,
        records: Arc<dyn RecordLookup>,
    ) -> Self {
        let resolver = EnumResolver::new(
            phones,
            records,
            config.default_record.clone(),
            config.lookup_timeout,
        );
        Self {
            config,
            resolver: Arc::new(resolver),
            running: Mutex::new(Vec::new()),
        }
    }

    /// Bind every configured transport and start answering queries.
    ///
    /// # Returns
    /// The bound addresses, in the order of the configured transports.
    pub async fn start(&self) -> Result<Vec<SocketAddr>, DnsError> {
        let mut running = self.running.lock().await;
        let mut addrs = Vec::new();

        for transport in self.config.transport.transports() {
            let (server, events) = create_server_for(transport);
            let addr = match server.listen(self.config.port, self.config.address).await {
                Ok(addr) => addr,
                Err(e) => {
                    error!("Query service failed to listen over {}: {}", transport, e);
                    for started in running.drain(..) {
                        started.server.close().await;
                        let _ = started.dispatcher.await;
                    }
                    return Err(e);
                }
            };
            info!("Query service listening over {} on {}", transport, addr);

            let dispatcher = tokio::spawn(dispatch(events, self.resolver.clone()));
            running.push(Running { server, dispatcher });
            addrs.push(addr);
        }

        Ok(addrs)
    }

    /// Whether at least one server is bound.
    pub async fn is_bound(&self) -> bool {
        self.running.lock().await.iter().any(|r| r.server.is_bound())
    }

    /// Close every server and wait for their notifications to drain.
    pub async fn close(&self) {
        let running: Vec<Running> = self.running.lock().await.drain(..).collect();
        for Running { server, dispatcher } in running {
            server.close().await;
            drop(server);
            if let Err(e) = dispatcher.await {
                warn!("Query dispatcher ended abnormally: {}", e);
            }
        }
    }
}

/// Route server notifications; every request is answered on its own task.
async fn dispatch(mut events: EventReceiver, resolver: Arc<EnumResolver>) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::Listening(addr) => debug!("Server bound to {}", addr),
            ServerEvent::Request(request, response) => {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    let id = request.header.id;
                    if let Err(e) = resolver.handle_request(request, response).await {
                        warn!("Failed to answer query {}: {}", id, e);
                    }
                });
            }
            ServerEvent::Error(e) => error!("Query service error: {}", e),
            ServerEvent::Close => {
                info!("Query service closed");
                break;
            }
        }
    }
}
