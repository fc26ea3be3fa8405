//! DNS packet codec.
//!
//! This module models DNS messages and converts them from and to wire format.
//! Names are always written uncompressed and compression pointers are refused
//! on input. Only NAPTR record data is decoded into fields; every other type
//! is carried as raw bytes.

use crate::errors::DnsError;
use crate::utils::{WireReader, WireWriter};

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

/// Record type A.
pub const TYPE_A: u16 = 1;
/// Record type NS.
pub const TYPE_NS: u16 = 2;
/// Record type CNAME.
pub const TYPE_CNAME: u16 = 5;
/// Record type SOA.
pub const TYPE_SOA: u16 = 6;
/// Record type PTR.
pub const TYPE_PTR: u16 = 12;
/// Record type MX.
pub const TYPE_MX: u16 = 15;
/// Record type TXT.
pub const TYPE_TXT: u16 = 16;
/// Record type AAAA.
pub const TYPE_AAAA: u16 = 28;
/// Record type SRV.
pub const TYPE_SRV: u16 = 33;
/// Record type NAPTR.
pub const TYPE_NAPTR: u16 = 35;
/// Pseudo record type OPT.
pub const TYPE_OPT: u16 = 41;

/// Class IN.
pub const CLASS_IN: u16 = 1;

/// No error.
pub const RCODE_NOERROR: u8 = 0;

/// Human readable name for a record type, used in log lines.
pub fn type_name(rtype: u16) -> String {
    match rtype {
        TYPE_A => "A".into(),
        TYPE_NS => "NS".into(),
        TYPE_CNAME => "CNAME".into(),
        TYPE_SOA => "SOA".into(),
        TYPE_PTR => "PTR".into(),
        TYPE_MX => "MX".into(),
        TYPE_TXT => "TXT".into(),
        TYPE_AAAA => "AAAA".into(),
        TYPE_SRV => "SRV".into(),
        TYPE_NAPTR => "NAPTR".into(),
        TYPE_OPT => "OPT".into(),
        other => format!("TYPE{}", other),
    }
}

/// The fixed header of a DNS message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    /// `false` for a query, `true` for a response.
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    /// Reserved bit, kept as received.
    pub z: bool,
    /// Authentic data.
    pub ad: bool,
    /// Checking disabled.
    pub cd: bool,
    pub rcode: u8,
}

impl Header {
    fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            z: flags & 0x0040 != 0,
            ad: flags & 0x0020 != 0,
            cd: flags & 0x0010 != 0,
            rcode: (flags & 0x000F) as u8,
        }
    }

    fn flags(&self) -> u16 {
        let mut flags = ((self.opcode as u16) & 0x0F) << 11 | (self.rcode as u16) & 0x0F;
        if self.qr {
            flags |= 0x8000;
        }
        if self.aa {
            flags |= 0x0400;
        }
        if self.tc {
            flags |= 0x0200;
        }
        if self.rd {
            flags |= 0x0100;
        }
        if self.ra {
            flags |= 0x0080;
        }
        if self.z {
            flags |= 0x0040;
        }
        if self.ad {
            flags |= 0x0020;
        }
        if self.cd {
            flags |= 0x0010;
        }
        flags
    }
}

/// A question entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: u16) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }
}

/// NAPTR record data (RFC 3403).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Naptr {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    /// Substitution expression, already in `!pattern!replacement!` form.
    pub regexp: String,
    /// Replacement domain; empty means the root.
    pub replacement: String,
}

/// Record data carried by a resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    Naptr(Naptr),
    Raw(Vec<u8>),
}

/// A resource record in the answer, authority or additional section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub data: RData,
}

impl ResourceRecord {
    /// Build an IN/NAPTR record.
    pub fn naptr(name: impl Into<String>, ttl: u32, naptr: Naptr) -> Self {
        Self {
            name: name.into(),
            rtype: TYPE_NAPTR,
            class: CLASS_IN,
            ttl,
            data: RData::Naptr(naptr),
        }
    }

    /// The NAPTR data of this record, if it is one.
    pub fn as_naptr(&self) -> Option<&Naptr> {
        match &self.data {
            RData::Naptr(naptr) => Some(naptr),
            RData::Raw(_) => None,
        }
    }
}

/// A complete DNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub question: Vec<Question>,
    pub answer: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

/// An inbound message as handed to request subscribers.
pub type Request = Message;

/// Parse a DNS message from wire format.
///
/// # Arguments
/// * `bytes` - The raw message, without any transport framing.
///
/// # Returns
/// The parsed `Message`, or `DnsError::Protocol` for truncated headers,
/// lengths pointing past the end of the data, or corrupt names.
pub fn parse(bytes: &[u8]) -> Result<Message, DnsError> {
    if bytes.len() < HEADER_LEN {
        return Err(DnsError::Protocol(format!(
            "message of {} bytes is shorter than the header",
            bytes.len()
        )));
    }

    let mut reader = WireReader::new(bytes);
    let id = reader.read_u16()?;
    let flags = reader.read_u16()?;
    let qdcount = reader.read_u16()?;
    let ancount = reader.read_u16()?;
    let nscount = reader.read_u16()?;
    let arcount = reader.read_u16()?;

    let mut question = Vec::with_capacity(qdcount.min(16) as usize);
    for _ in 0..qdcount {
        let name = reader.read_name()?;
        let qtype = reader.read_u16()?;
        let qclass = reader.read_u16()?;
        question.push(Question { name, qtype, qclass });
    }

    Ok(Message {
        header: Header::from_flags(id, flags),
        question,
        answer: read_records(&mut reader, ancount)?,
        authority: read_records(&mut reader, nscount)?,
        additional: read_records(&mut reader, arcount)?,
    })
}

fn read_records(reader: &mut WireReader<'_>, count: u16) -> Result<Vec<ResourceRecord>, DnsError> {
    let mut records = Vec::with_capacity(count.min(16) as usize);
    for _ in 0..count {
        records.push(read_record(reader)?);
    }
    Ok(records)
}

fn read_record(reader: &mut WireReader<'_>) -> Result<ResourceRecord, DnsError> {
    let name = reader.read_name()?;
    let rtype = reader.read_u16()?;
    let class = reader.read_u16()?;
    let ttl = reader.read_u32()?;
    let rdlength = reader.read_u16()? as usize;

    if reader.remaining() < rdlength {
        return Err(DnsError::Protocol(format!(
            "rdlength {} exceeds the {} remaining bytes",
            rdlength,
            reader.remaining()
        )));
    }

    let data = if rtype == TYPE_NAPTR {
        let start = reader.position();
        let naptr = Naptr {
            order: reader.read_u16()?,
            preference: reader.read_u16()?,
            flags: reader.read_character_string()?,
            service: reader.read_character_string()?,
            regexp: reader.read_character_string()?,
            replacement: reader.read_name()?,
        };
        if reader.position() - start != rdlength {
            return Err(DnsError::Protocol(format!(
                "NAPTR rdata length {} does not match declared rdlength {}",
                reader.position() - start,
                rdlength
            )));
        }
        RData::Naptr(naptr)
    } else {
        RData::Raw(reader.read_bytes(rdlength)?.to_vec())
    };

    Ok(ResourceRecord {
        name,
        rtype,
        class,
        ttl,
        data,
    })
}

/// Serialize a message into a caller-supplied buffer.
///
/// # Arguments
/// * `buf` - Destination buffer; its length is the size ceiling.
/// * `message` - The message to serialize.
///
/// # Returns
/// The number of bytes written, or `DnsError::BufferOverflow` when the
/// message does not fit.
pub fn write(buf: &mut [u8], message: &Message) -> Result<usize, DnsError> {
    let mut writer = WireWriter::new(buf);

    writer.put_u16(message.header.id)?;
    writer.put_u16(message.header.flags())?;
    writer.put_u16(section_count(message.question.len())?)?;
    writer.put_u16(section_count(message.answer.len())?)?;
    writer.put_u16(section_count(message.authority.len())?)?;
    writer.put_u16(section_count(message.additional.len())?)?;

    for question in &message.question {
        writer.put_name(&question.name)?;
        writer.put_u16(question.qtype)?;
        writer.put_u16(question.qclass)?;
    }

    for record in message
        .answer
        .iter()
        .chain(&message.authority)
        .chain(&message.additional)
    {
        write_record(&mut writer, record)?;
    }

    Ok(writer.position())
}

fn section_count(len: usize) -> Result<u16, DnsError> {
    u16::try_from(len).map_err(|_| DnsError::Protocol(format!("section of {} entries is too large", len)))
}

fn write_record(writer: &mut WireWriter<'_>, record: &ResourceRecord) -> Result<(), DnsError> {
    writer.put_name(&record.name)?;
    writer.put_u16(record.rtype)?;
    writer.put_u16(record.class)?;
    writer.put_u32(record.ttl)?;

    let rdlength_at = writer.position();
    writer.put_u16(0)?;
    let start = writer.position();

    match &record.data {
        RData::Naptr(naptr) => {
            writer.put_u16(naptr.order)?;
            writer.put_u16(naptr.preference)?;
            writer.put_character_string(&naptr.flags)?;
            writer.put_character_string(&naptr.service)?;
            writer.put_character_string(&naptr.regexp)?;
            writer.put_name(&naptr.replacement)?;
        }
        RData::Raw(bytes) => writer.put_bytes(bytes)?,
    }

    let rdlength = u16::try_from(writer.position() - start)
        .map_err(|_| DnsError::Protocol("rdata exceeds 65535 bytes".into()))?;
    writer.patch_u16(rdlength_at, rdlength)
}
