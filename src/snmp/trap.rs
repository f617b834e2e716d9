//! SNMP v1/v2c trap packet parsing.
//!
//! Pure functions only: raw UDP bytes in, a [`ParsedTrap`] out. The trap
//! receiver worker owns the socket, correlation, and persistence.

use super::ber::{self, tags, BerError};
use super::value::decode_value;
use crate::domain::{SnmpVersion, Value};

/// OID of the snmpTrapOID.0 varbind that names a v2c trap.
pub const SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

/// OID of the sysUpTime.0 varbind that leads a v2c trap.
const SYS_UPTIME_OID: &str = "1.3.6.1.2.1.1.3.0";

/// A parsed trap notification.
#[derive(Debug, Clone)]
pub struct ParsedTrap {
    pub version: SnmpVersion,
    pub community: String,
    /// v2c: the snmpTrapOID.0 value; v1: the enterprise OID (v1 traps carry
    /// no snmpTrapOID varbind).
    pub trap_oid: String,
    /// Agent uptime in TimeTicks at trap emission.
    pub uptime: u32,
    /// Remaining varbinds, with sysUpTime/snmpTrapOID stripped for v2c.
    pub varbinds: Vec<(String, Value)>,
}

/// Parse a raw trap packet.
pub fn parse_trap(data: &[u8]) -> Result<ParsedTrap, BerError> {
    // SNMP message: SEQUENCE { version INTEGER, community OCTET STRING, PDU }
    let (tag, message, _) = ber::parse_tlv(data)?;
    if tag != tags::SEQUENCE {
        return Err(BerError(format!("expected SEQUENCE, got 0x{:02x}", tag)));
    }

    let (tag, version_data, rest) = ber::parse_tlv(message)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for version, got 0x{:02x}",
            tag
        )));
    }
    let version = match ber::parse_integer(version_data) {
        0 => SnmpVersion::V1,
        1 => SnmpVersion::V2c,
        other => return Err(BerError(format!("unsupported trap version: {}", other))),
    };

    let (tag, community_data, rest) = ber::parse_tlv(rest)?;
    if tag != tags::OCTET_STRING {
        return Err(BerError(format!(
            "expected OCTET STRING for community, got 0x{:02x}",
            tag
        )));
    }
    let community = String::from_utf8_lossy(community_data).into_owned();

    let (pdu_tag, pdu_data, _) = ber::parse_tlv(rest)?;
    match (version, pdu_tag) {
        (SnmpVersion::V1, tags::TRAP_PDU_V1) => parse_v1_trap(pdu_data, community),
        (SnmpVersion::V2c, tags::TRAP_PDU_V2) => parse_v2c_trap(pdu_data, community),
        _ => Err(BerError(format!(
            "unexpected PDU tag 0x{:02x} for {}",
            pdu_tag, version
        ))),
    }
}

/// Trap-PDU: enterprise, agent-addr, generic-trap, specific-trap,
/// time-stamp, varbinds.
fn parse_v1_trap(data: &[u8], community: String) -> Result<ParsedTrap, BerError> {
    let (tag, oid_data, rest) = ber::parse_tlv(data)?;
    if tag != tags::OBJECT_IDENTIFIER {
        return Err(BerError(format!(
            "expected OID for enterprise, got 0x{:02x}",
            tag
        )));
    }
    let enterprise_oid = ber::parse_oid(oid_data);

    let (tag, _agent_addr, rest) = ber::parse_tlv(rest)?;
    if tag != tags::IP_ADDRESS {
        return Err(BerError(format!(
            "expected IpAddress for agent-addr, got 0x{:02x}",
            tag
        )));
    }

    let (tag, _generic, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for generic-trap, got 0x{:02x}",
            tag
        )));
    }
    let (tag, _specific, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for specific-trap, got 0x{:02x}",
            tag
        )));
    }

    let (tag, timestamp_data, rest) = ber::parse_tlv(rest)?;
    if tag != tags::TIMETICKS {
        return Err(BerError(format!(
            "expected TimeTicks for time-stamp, got 0x{:02x}",
            tag
        )));
    }
    let uptime = ber::parse_unsigned(timestamp_data) as u32;

    let varbinds = parse_varbind_list(rest)?;

    Ok(ParsedTrap {
        version: SnmpVersion::V1,
        community,
        trap_oid: enterprise_oid,
        uptime,
        varbinds,
    })
}

/// SNMPv2-Trap-PDU: request-id, error-status, error-index, varbinds.
/// The trap OID is carried by the snmpTrapOID.0 varbind.
fn parse_v2c_trap(data: &[u8], community: String) -> Result<ParsedTrap, BerError> {
    let (tag, _request_id, rest) = ber::parse_tlv(data)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for request-id, got 0x{:02x}",
            tag
        )));
    }
    let (tag, _error_status, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for error-status, got 0x{:02x}",
            tag
        )));
    }
    let (tag, _error_index, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(BerError(format!(
            "expected INTEGER for error-index, got 0x{:02x}",
            tag
        )));
    }

    let all_varbinds = parse_varbind_list(rest)?;

    let mut uptime = 0u32;
    let mut trap_oid = String::from("unknown");
    let mut varbinds = Vec::with_capacity(all_varbinds.len());

    for (oid, value) in all_varbinds {
        if oid == SYS_UPTIME_OID {
            uptime = value.as_i64().unwrap_or(0) as u32;
        } else if oid == SNMP_TRAP_OID {
            if let Value::Str(s) = &value {
                trap_oid = s.clone();
            }
        } else {
            varbinds.push((oid, value));
        }
    }

    Ok(ParsedTrap {
        version: SnmpVersion::V2c,
        community,
        trap_oid,
        uptime,
        varbinds,
    })
}

fn parse_varbind_list(data: &[u8]) -> Result<Vec<(String, Value)>, BerError> {
    let (tag, list, _) = ber::parse_tlv(data)?;
    if tag != tags::SEQUENCE {
        return Err(BerError(format!(
            "expected SEQUENCE for varbinds, got 0x{:02x}",
            tag
        )));
    }

    let mut varbinds = Vec::new();
    let mut remaining = list;

    while !remaining.is_empty() {
        let (tag, varbind, rest) = ber::parse_tlv(remaining)?;
        if tag != tags::SEQUENCE {
            return Err(BerError(format!("expected SEQUENCE, got 0x{:02x}", tag)));
        }
        remaining = rest;

        let (oid_tag, oid_data, value_rest) = ber::parse_tlv(varbind)?;
        if oid_tag != tags::OBJECT_IDENTIFIER {
            return Err(BerError(format!("expected OID, got 0x{:02x}", oid_tag)));
        }
        let (value_tag, value_data, _) = ber::parse_tlv(value_rest)?;

        varbinds.push((
            ber::parse_oid(oid_data),
            decode_value(value_tag, value_data),
        ));
    }

    Ok(varbinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid_varbind(oid: &str, value_oid: &str) -> Vec<u8> {
        ber::encode_sequence(&[
            ber::encode_oid(oid).unwrap(),
            ber::encode_oid(value_oid).unwrap(),
        ])
    }

    fn timeticks_varbind(oid: &str, ticks: u32) -> Vec<u8> {
        let mut content = ticks.to_be_bytes().to_vec();
        while content.len() > 1 && content[0] == 0 {
            content.remove(0);
        }
        ber::encode_sequence(&[
            ber::encode_oid(oid).unwrap(),
            ber::tlv(tags::TIMETICKS, &content),
        ])
    }

    fn string_varbind(oid: &str, value: &str) -> Vec<u8> {
        ber::encode_sequence(&[
            ber::encode_oid(oid).unwrap(),
            ber::encode_octet_string(value.as_bytes()),
        ])
    }

    fn v2c_trap_packet(varbinds: &[Vec<u8>]) -> Vec<u8> {
        let pdu = ber::encode_tagged(
            tags::TRAP_PDU_V2,
            &[
                ber::encode_integer(1),
                ber::encode_integer(0),
                ber::encode_integer(0),
                ber::encode_sequence(varbinds),
            ],
        );
        ber::encode_sequence(&[
            ber::encode_integer(1),
            ber::encode_octet_string(b"public"),
            pdu,
        ])
    }

    fn v1_trap_packet() -> Vec<u8> {
        let pdu = ber::encode_tagged(
            tags::TRAP_PDU_V1,
            &[
                ber::encode_oid("1.3.6.1.4.1.318").unwrap(),
                ber::tlv(tags::IP_ADDRESS, &[10, 0, 0, 7]),
                ber::encode_integer(6), // enterpriseSpecific
                ber::encode_integer(5),
                ber::tlv(tags::TIMETICKS, &[0x30, 0x39]), // 12345
                ber::encode_sequence(&[]),
            ],
        );
        ber::encode_sequence(&[
            ber::encode_integer(0),
            ber::encode_octet_string(b"public"),
            pdu,
        ])
    }

    #[test]
    fn test_parse_v2c_trap_extracts_trap_oid() {
        let packet = v2c_trap_packet(&[
            timeticks_varbind(SYS_UPTIME_OID, 5000),
            oid_varbind(SNMP_TRAP_OID, "1.3.6.1.4.1.318.2.3.1"),
            string_varbind("1.3.6.1.4.1.318.2.3.1.1", "on battery"),
        ]);

        let trap = parse_trap(&packet).unwrap();
        assert_eq!(trap.version, SnmpVersion::V2c);
        assert_eq!(trap.community, "public");
        assert_eq!(trap.trap_oid, "1.3.6.1.4.1.318.2.3.1");
        assert_eq!(trap.uptime, 5000);
        assert_eq!(
            trap.varbinds,
            vec![(
                "1.3.6.1.4.1.318.2.3.1.1".to_string(),
                Value::Str("on battery".into())
            )]
        );
    }

    #[test]
    fn test_parse_v2c_trap_without_trap_oid_varbind() {
        let packet = v2c_trap_packet(&[timeticks_varbind(SYS_UPTIME_OID, 1)]);
        let trap = parse_trap(&packet).unwrap();
        assert_eq!(trap.trap_oid, "unknown");
        assert!(trap.varbinds.is_empty());
    }

    #[test]
    fn test_parse_v1_trap_uses_enterprise_oid() {
        let trap = parse_trap(&v1_trap_packet()).unwrap();
        assert_eq!(trap.version, SnmpVersion::V1);
        assert_eq!(trap.trap_oid, "1.3.6.1.4.1.318");
        assert_eq!(trap.uptime, 12345);
        assert!(trap.varbinds.is_empty());
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let packet = ber::encode_sequence(&[
            ber::encode_integer(3),
            ber::encode_octet_string(b"public"),
            ber::encode_tagged(tags::TRAP_PDU_V2, &[]),
        ]);
        assert!(parse_trap(&packet).is_err());
    }

    #[test]
    fn test_rejects_wrong_pdu_tag_for_version() {
        // v1 message wrapping a v2c trap PDU
        let pdu = ber::encode_tagged(
            tags::TRAP_PDU_V2,
            &[
                ber::encode_integer(1),
                ber::encode_integer(0),
                ber::encode_integer(0),
                ber::encode_sequence(&[]),
            ],
        );
        let packet = ber::encode_sequence(&[
            ber::encode_integer(0),
            ber::encode_octet_string(b"public"),
            pdu,
        ]);
        assert!(parse_trap(&packet).is_err());
    }

    #[test]
    fn test_rejects_truncated_packet() {
        assert!(parse_trap(&[0x30, 0x05, 0x02]).is_err());
        assert!(parse_trap(&[]).is_err());
    }
}
