//! Decoding of raw variable-binding payloads into neutral [`Value`]s.

use super::ber::{self, tags};
use crate::domain::Value;

/// Decode a variable binding payload by its BER tag.
///
/// Octet strings are assumed UTF-8 (decoded lossily, not validated), numeric
/// types collapse to `Int`, object identifiers render as dotted strings, and
/// the noSuch* exceptions map to their sentinels so the poller can learn
/// which OIDs a device is missing. Unknown tags pass through as hex strings.
pub fn decode_value(tag: u8, data: &[u8]) -> Value {
    match tag {
        tags::OCTET_STRING => Value::Str(String::from_utf8_lossy(data).into_owned()),
        tags::INTEGER => Value::Int(ber::parse_integer(data)),
        tags::COUNTER32 | tags::GAUGE32 | tags::TIMETICKS | tags::UINTEGER32 => {
            Value::Int(ber::parse_unsigned(data) as i64)
        }
        tags::COUNTER64 => Value::Int(ber::parse_unsigned(data) as i64),
        tags::OBJECT_IDENTIFIER => Value::Str(ber::parse_oid(data)),
        tags::IP_ADDRESS => match ber::parse_ip_address(data) {
            Ok(ip) => Value::Str(ip),
            Err(_) => Value::Str(hex_string(data)),
        },
        tags::NULL | tags::END_OF_MIB_VIEW => Value::Null,
        tags::NO_SUCH_OBJECT => Value::NoSuchObject,
        tags::NO_SUCH_INSTANCE => Value::NoSuchInstance,
        tags::OPAQUE => Value::Str(hex_string(data)),
        _ => Value::Str(hex_string(data)),
    }
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
