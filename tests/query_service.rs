//! End-to-end tests of the query service over real sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use mock_pathfinder::config::{DefaultRecord, QueryConfig, TransportMode};
use mock_pathfinder::db::{NewRecord, SqliteStore};
use mock_pathfinder::domain::{Phone, PhoneLookup, PhoneStatus, Record, RecordLookup};
use mock_pathfinder::errors::DnsError;
use mock_pathfinder::packet::{self, Header, Message, Question, ResourceRecord, TYPE_A, TYPE_NAPTR};
use mock_pathfinder::query::QueryService;

const DOMAIN: &str = "3.2.1.0.5.5.5.1.0.2.1.e164enum.net";

fn config(transport: TransportMode) -> QueryConfig {
    QueryConfig {
        port: 0,
        address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        transport,
        lookup_timeout: Duration::from_millis(500),
        default_record: DefaultRecord::default(),
    }
}

fn query(id: u16, name: &str, qtype: u16) -> Vec<u8> {
    let message = Message {
        header: Header {
            id,
            rd: true,
            ..Header::default()
        },
        question: vec![Question::new(name, qtype)],
        ..Message::default()
    };
    let mut buf = [0u8; 512];
    let len = packet::write(&mut buf, &message).unwrap();
    buf[..len].to_vec()
}

async fn ask_udp(addr: SocketAddr, id: u16, name: &str, qtype: u16) -> Message {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&query(id, name, qtype), addr).await.unwrap();

    let mut buf = [0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("no UDP response")
        .unwrap();
    packet::parse(&buf[..len]).unwrap()
}

async fn read_framed(stream: &mut TcpStream) -> Message {
    let len = stream.read_u16().await.unwrap() as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    packet::parse(&body).unwrap()
}

fn default_answer(name: &str) -> ResourceRecord {
    let record = DefaultRecord::default();
    ResourceRecord::naptr(name, record.ttl, record.naptr())
}

fn new_record(id: &str, order: u16, preference: u16, uri: &str, replacement: &str) -> NewRecord {
    NewRecord {
        record_id: id.into(),
        order,
        preference,
        flags: "u".into(),
        service: "E2U+mm".into(),
        regexp: "^.*$".into(),
        uri: uri.into(),
        replacement: replacement.into(),
        ttl: 300,
        domain_name: "e164enum.net".into(),
        partner_id: None,
    }
}

fn provisioned_store(dir: &TempDir, status: PhoneStatus) -> Arc<SqliteStore> {
    let store = SqliteStore::open(dir.path().join("pathfinder.db")).unwrap();
    store.create_profile("profile-1", "Partner A", 1).unwrap();
    store
        .create_record("profile-1", &new_record("r2", 10, 2, "mm:001.506@test.org", "."))
        .unwrap();
    store
        .create_record("profile-1", &new_record("r1", 10, 1, "mm:001.504@test.org", ""))
        .unwrap();
    store
        .create_phone("phone-1", "2015550123", "1", "profile-1", status)
        .unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn udp_answers_active_phone_with_records_then_default() {
    let dir = TempDir::new().unwrap();
    let store = provisioned_store(&dir, PhoneStatus::Active);
    let service = QueryService::new(config(TransportMode::Udp), store.clone(), store);
    let addrs = service.start().await.unwrap();

    let response = ask_udp(addrs[0], 4242, DOMAIN, TYPE_NAPTR).await;
    assert_eq!(response.header.id, 4242);
    assert!(response.header.qr);
    assert_eq!(response.header.rcode, 0);
    assert_eq!(response.question, vec![Question::new(DOMAIN, TYPE_NAPTR)]);
    assert_eq!(response.answer.len(), 3);

    let first = response.answer[0].as_naptr().unwrap();
    assert_eq!((first.order, first.preference), (10, 1));
    assert_eq!(first.regexp, "!^.*$!mm:001.504@test.org!");
    assert_eq!(first.service, "E2U+mm");
    assert_eq!(response.answer[0].ttl, 300);

    let second = response.answer[1].as_naptr().unwrap();
    assert_eq!((second.order, second.preference), (10, 2));
    assert_eq!(second.replacement, "");

    assert_eq!(response.answer[2], default_answer(DOMAIN));

    service.close().await;
    assert!(!service.is_bound().await);
}

#[tokio::test]
async fn udp_inactive_phone_gets_only_default() {
    let dir = TempDir::new().unwrap();
    let store = provisioned_store(&dir, PhoneStatus::Inactive);
    let service = QueryService::new(config(TransportMode::Udp), store.clone(), store);
    let addrs = service.start().await.unwrap();

    let response = ask_udp(addrs[0], 7, DOMAIN, TYPE_NAPTR).await;
    assert_eq!(response.answer, vec![default_answer(DOMAIN)]);
    assert_eq!(response.header.rcode, 0);

    service.close().await;
}

#[tokio::test]
async fn udp_unknown_and_invalid_numbers_get_only_default() {
    let dir = TempDir::new().unwrap();
    let store = provisioned_store(&dir, PhoneStatus::Active);
    let service = QueryService::new(config(TransportMode::Udp), store.clone(), store);
    let addrs = service.start().await.unwrap();

    let unknown = "4.2.1.0.5.5.5.1.0.2.1.e164enum.net";
    let response = ask_udp(addrs[0], 1, unknown, TYPE_NAPTR).await;
    assert_eq!(response.answer, vec![default_answer(unknown)]);

    let invalid = "1.2.3.e164enum.net";
    let response = ask_udp(addrs[0], 2, invalid, TYPE_NAPTR).await;
    assert_eq!(response.answer, vec![default_answer(invalid)]);
    assert_eq!(response.header.rcode, 0);

    service.close().await;
}

#[tokio::test]
async fn tcp_answers_pipelined_queries_in_order() {
    let dir = TempDir::new().unwrap();
    let store = provisioned_store(&dir, PhoneStatus::Active);
    let service = QueryService::new(config(TransportMode::Tcp), store.clone(), store);
    let addrs = service.start().await.unwrap();

    let mut stream = TcpStream::connect(addrs[0]).await.unwrap();
    let mut wire = Vec::new();
    for (id, qtype) in [(11u16, TYPE_NAPTR), (12, TYPE_A)] {
        let body = query(id, DOMAIN, qtype);
        wire.extend_from_slice(&(body.len() as u16).to_be_bytes());
        wire.extend_from_slice(&body);
    }
    stream.write_all(&wire).await.unwrap();

    let mut responses = vec![read_framed(&mut stream).await, read_framed(&mut stream).await];
    responses.sort_by_key(|m| m.header.id);

    assert_eq!(responses[0].header.id, 11);
    assert_eq!(responses[0].answer.len(), 3);
    assert_eq!(responses[1].header.id, 12);
    assert!(responses[1].answer.is_empty());

    service.close().await;
}

#[derive(Default)]
struct CountingLookups {
    phone_calls: AtomicUsize,
    record_calls: AtomicUsize,
}

#[async_trait]
impl PhoneLookup for CountingLookups {
    async fn get_by_number(&self, _: &str, _: &str) -> Result<Option<Phone>, DnsError> {
        self.phone_calls.fetch_add(1, Ordering::SeqCst);
        Err(DnsError::Lookup("backend down".into()))
    }

    async fn get_by_profile_id(&self, _: &str) -> Result<Vec<Phone>, DnsError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl RecordLookup for CountingLookups {
    async fn get_records_by_profile_id(&self, _: &str) -> Result<Vec<Record>, DnsError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn both_transports_serve_and_failures_fall_back() {
    let lookups = Arc::new(CountingLookups::default());
    let service = QueryService::new(config(TransportMode::Both), lookups.clone(), lookups.clone());
    let addrs = service.start().await.unwrap();
    assert_eq!(addrs.len(), 2);
    assert!(service.is_bound().await);

    let response = ask_udp(addrs[0], 99, DOMAIN, TYPE_NAPTR).await;
    assert_eq!(response.answer, vec![default_answer(DOMAIN)]);
    assert_eq!(response.header.rcode, 0);

    let response = ask_udp(addrs[0], 100, DOMAIN, TYPE_A).await;
    assert!(response.answer.is_empty());

    let mut stream = TcpStream::connect(addrs[1]).await.unwrap();
    let body = query(101, DOMAIN, TYPE_NAPTR);
    stream.write_u16(body.len() as u16).await.unwrap();
    stream.write_all(&body).await.unwrap();
    let response = read_framed(&mut stream).await;
    assert_eq!(response.header.id, 101);
    assert_eq!(response.answer, vec![default_answer(DOMAIN)]);

    assert_eq!(lookups.phone_calls.load(Ordering::SeqCst), 2);
    assert_eq!(lookups.record_calls.load(Ordering::SeqCst), 0);

    service.close().await;
    service.close().await;
}
