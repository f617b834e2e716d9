//! Minimal BER/ASN.1 encoding and decoding for SNMP messages.
//!
//! Covers exactly the subset SNMP needs: definite-length TLVs, two's
//! complement integers, octet strings, object identifiers, and the tagged
//! sequences used for PDUs. Indefinite lengths are rejected.

use std::fmt;

/// BER tag values used by SNMP.
pub mod tags {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIMETICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;
    pub const UINTEGER32: u8 = 0x47;
    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;
    pub const GET_REQUEST: u8 = 0xA0;
    pub const GET_RESPONSE: u8 = 0xA2;
    pub const SET_REQUEST: u8 = 0xA3;
    pub const TRAP_PDU_V1: u8 = 0xA4;
    pub const TRAP_PDU_V2: u8 = 0xA7;
    pub const REPORT: u8 = 0xA8;
}

/// Decode error with a short description of what went wrong.
#[derive(Debug)]
pub struct BerError(pub String);

impl fmt::Display for BerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BerError {}

pub type BerResult<T> = Result<T, BerError>;

/// Parse a BER TLV and return (tag, value_bytes, remaining_bytes).
pub fn parse_tlv(data: &[u8]) -> BerResult<(u8, &[u8], &[u8])> {
    if data.is_empty() {
        return Err(BerError("empty data".to_string()));
    }

    let tag = data[0];
    let (length, header_len) = parse_length(&data[1..])?;

    let total_header = 1 + header_len;
    if data.len() < total_header + length {
        return Err(BerError(format!(
            "data too short: need {} bytes, have {}",
            total_header + length,
            data.len()
        )));
    }

    let value = &data[total_header..total_header + length];
    let remaining = &data[total_header + length..];

    Ok((tag, value, remaining))
}

/// Parse a BER length field, returning (length, bytes_consumed).
pub fn parse_length(data: &[u8]) -> BerResult<(usize, usize)> {
    if data.is_empty() {
        return Err(BerError("empty length field".to_string()));
    }

    let first = data[0];

    if first < 0x80 {
        // Short form: length in single byte
        Ok((first as usize, 1))
    } else if first == 0x80 {
        Err(BerError("indefinite length not supported".to_string()))
    } else {
        // Long form: first byte indicates number of length bytes
        let num_bytes = (first & 0x7F) as usize;
        if num_bytes > 4 || data.len() < 1 + num_bytes {
            return Err(BerError("invalid length encoding".to_string()));
        }

        let mut length: usize = 0;
        for byte in &data[1..1 + num_bytes] {
            length = (length << 8) | (*byte as usize);
        }

        Ok((length, 1 + num_bytes))
    }
}

/// Parse a two's complement INTEGER value.
pub fn parse_integer(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }

    let mut value: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in data {
        value = (value << 8) | (byte as i64);
    }
    value
}

/// Parse an unsigned integer value (Counter, Gauge, TimeTicks).
pub fn parse_unsigned(data: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &byte in data {
        value = (value << 8) | (byte as u64);
    }
    value
}

/// Parse an OBJECT IDENTIFIER into its dotted string form.
pub fn parse_oid(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let mut parts: Vec<u64> = Vec::new();

    // First byte encodes the first two components: X*40 + Y
    let first = data[0] as u64;
    parts.push(first / 40);
    parts.push(first % 40);

    // Remaining bytes use base-128 with a continuation bit
    let mut value: u64 = 0;
    for &byte in &data[1..] {
        value = (value << 7) | ((byte & 0x7F) as u64);
        if byte & 0x80 == 0 {
            parts.push(value);
            value = 0;
        }
    }

    parts
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Parse a 4-byte IpAddress.
pub fn parse_ip_address(data: &[u8]) -> BerResult<String> {
    if data.len() != 4 {
        return Err(BerError(format!("invalid IP address length: {}", data.len())));
    }
    Ok(format!("{}.{}.{}.{}", data[0], data[1], data[2], data[3]))
}

/// Encode a BER length field.
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }

    let mut bytes = Vec::new();
    let mut v = length;
    while v > 0 {
        bytes.insert(0, (v & 0xFF) as u8);
        v >>= 8;
    }
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend_from_slice(&bytes);
    out
}

/// Build a TLV from a tag and already-encoded content.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// Encode a two's complement INTEGER TLV.
pub fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    // Trim redundant leading bytes while preserving the sign bit
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    tlv(tags::INTEGER, &bytes)
}

/// Encode an OCTET STRING TLV.
pub fn encode_octet_string(bytes: &[u8]) -> Vec<u8> {
    tlv(tags::OCTET_STRING, bytes)
}

/// Encode a NULL TLV.
pub fn encode_null() -> Vec<u8> {
    vec![tags::NULL, 0x00]
}

/// Encode a dotted OID string as an OBJECT IDENTIFIER TLV.
/// A single leading dot is accepted and ignored.
pub fn encode_oid(oid: &str) -> BerResult<Vec<u8>> {
    let trimmed = oid.strip_prefix('.').unwrap_or(oid);
    let components: Vec<u64> = trimmed
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| BerError(format!("invalid OID component {:?} in {:?}", part, oid)))
        })
        .collect::<BerResult<_>>()?;

    if components.len() < 2 {
        return Err(BerError(format!("OID {:?} has fewer than two components", oid)));
    }
    if components[0] > 2 || components[1] > 39 {
        return Err(BerError(format!("OID {:?} has an invalid prefix", oid)));
    }

    let mut content = vec![(components[0] * 40 + components[1]) as u8];
    for &component in &components[2..] {
        encode_oid_component(component, &mut content);
    }

    Ok(tlv(tags::OBJECT_IDENTIFIER, &content))
}

fn encode_oid_component(value: u64, out: &mut Vec<u8>) {
    if value < 0x80 {
        out.push(value as u8);
        return;
    }

    let mut chunks = Vec::new();
    let mut v = value;
    while v > 0 {
        chunks.push((v & 0x7F) as u8);
        v >>= 7;
    }
    for (i, chunk) in chunks.iter().rev().enumerate() {
        if i == chunks.len() - 1 {
            out.push(*chunk);
        } else {
            out.push(*chunk | 0x80);
        }
    }
}

/// Concatenate encoded parts and wrap them in a SEQUENCE TLV.
pub fn encode_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
    encode_tagged(tags::SEQUENCE, parts)
}

/// Concatenate encoded parts under an arbitrary constructed tag (PDUs).
pub fn encode_tagged(tag: u8, parts: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = parts.iter().flatten().copied().collect();
    tlv(tag, &content)
}
