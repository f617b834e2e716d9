//! One-shot SNMP GET/SET client over connected UDP.
//!
//! The poller holds one client per device across polls and drops it on
//! error so the next cycle re-dials. v1/v2c use community framing; v3 is
//! supported at the noAuthNoPriv security level only, with the community
//! string acting as the USM user name and a cached engine-id discovery
//! handshake performed on first use.

use super::ber::{self, tags, BerError};
use super::value::decode_value;
use crate::domain::{SnmpVersion, Value};
use crate::secret::SecretString;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

/// Fixed per-attempt timeout for SNMP requests.
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries after the initial attempt.
pub const SNMP_RETRIES: u32 = 2;

const MAX_PACKET_SIZE: usize = 65535;

/// Advertised msgMaxSize for SNMPv3 requests.
const V3_MAX_MESSAGE_SIZE: i64 = 65507;

/// msgFlags for a reportable noAuthNoPriv request.
const V3_FLAG_REPORTABLE: u8 = 0x04;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("device returned error status {status} (index {index})")]
    ErrorStatus { status: i64, index: i64 },

    #[error("device returned report {0}")]
    Report(String),

    #[error("engine discovery failed: {0}")]
    Discovery(String),
}

impl From<BerError> for SnmpError {
    fn from(err: BerError) -> Self {
        SnmpError::Malformed(err.0)
    }
}

pub type SnmpResult<T> = Result<T, SnmpError>;

/// Value written by a SET operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    Int(i32),
    Str(String),
}

/// Authoritative engine parameters learned during v3 discovery.
#[derive(Debug, Clone)]
struct EngineInfo {
    engine_id: Vec<u8>,
    boots: i64,
    time: i64,
}

/// Decoded response PDU.
struct ResponsePdu {
    request_id: i64,
    error_status: i64,
    error_index: i64,
    bindings: Vec<(String, Value)>,
    is_report: bool,
    engine: Option<EngineInfo>,
}

/// A dialled SNMP client for a single target.
pub struct SnmpClient {
    socket: UdpSocket,
    version: SnmpVersion,
    credential: SecretString,
    request_id: i32,
    timeout: Duration,
    retries: u32,
    engine: Option<EngineInfo>,
}

impl SnmpClient {
    /// Dial the target. For v1/v2c `credential` is the community string;
    /// for v3 it is the USM user name.
    pub async fn connect(
        ip: &str,
        port: u16,
        version: SnmpVersion,
        credential: SecretString,
    ) -> SnmpResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect((ip, port)).await?;

        Ok(Self {
            socket,
            version,
            credential,
            request_id: initial_request_id(),
            timeout: SNMP_TIMEOUT,
            retries: SNMP_RETRIES,
            engine: None,
        })
    }

    /// Override the fixed timeout/retry policy (connection probes, tests).
    pub fn with_timeout(mut self, timeout: Duration, retries: u32) -> Self {
        self.timeout = timeout;
        self.retries = retries;
        self
    }

    /// Issue a GET for the given OIDs and return the decoded bindings in
    /// response order. OIDs may carry a leading dot.
    pub async fn get(&mut self, oids: &[String]) -> SnmpResult<Vec<(String, Value)>> {
        let varbinds: Vec<Vec<u8>> = oids
            .iter()
            .map(|oid| {
                Ok(ber::encode_sequence(&[
                    ber::encode_oid(oid)?,
                    ber::encode_null(),
                ]))
            })
            .collect::<SnmpResult<_>>()?;

        let response = self.request(tags::GET_REQUEST, &varbinds).await?;
        if response.error_status != 0 {
            return Err(SnmpError::ErrorStatus {
                status: response.error_status,
                index: response.error_index,
            });
        }
        Ok(response.bindings)
    }

    /// Issue a SET of a single binding.
    pub async fn set(&mut self, oid: &str, value: &SetValue) -> SnmpResult<()> {
        let encoded_value = match value {
            SetValue::Int(i) => ber::encode_integer(*i as i64),
            SetValue::Str(s) => ber::encode_octet_string(s.as_bytes()),
        };
        let varbind = ber::encode_sequence(&[ber::encode_oid(oid)?, encoded_value]);

        let response = self.request(tags::SET_REQUEST, &[varbind]).await?;
        if response.error_status != 0 {
            return Err(SnmpError::ErrorStatus {
                status: response.error_status,
                index: response.error_index,
            });
        }
        Ok(())
    }

    fn next_request_id(&mut self) -> i32 {
        self.request_id = self.request_id.wrapping_add(1) & 0x3FFF_FFFF;
        self.request_id
    }

    async fn request(&mut self, pdu_tag: u8, varbinds: &[Vec<u8>]) -> SnmpResult<ResponsePdu> {
        let request_id = self.next_request_id();
        let pdu = encode_pdu(pdu_tag, request_id, varbinds);

        let frame = match self.version {
            SnmpVersion::V1 | SnmpVersion::V2c => self.encode_community_message(&pdu),
            SnmpVersion::V3 => {
                self.ensure_engine().await?;
                let engine = match self.engine.clone() {
                    Some(engine) => engine,
                    None => return Err(SnmpError::Discovery("engine not established".into())),
                };
                let user = self.credential.expose().as_bytes().to_vec();
                encode_v3_message(request_id, &engine, &user, &pdu)
            }
        };

        let response = self.exchange(&frame, request_id).await?;
        if response.is_report {
            let oid = response
                .bindings
                .first()
                .map(|(oid, _)| oid.clone())
                .unwrap_or_else(|| "(no varbinds)".to_string());
            return Err(SnmpError::Report(oid));
        }
        Ok(response)
    }

    fn encode_community_message(&self, pdu: &[u8]) -> Vec<u8> {
        ber::encode_sequence(&[
            ber::encode_integer(self.version.wire_value()),
            ber::encode_octet_string(self.credential.expose().as_bytes()),
            pdu.to_vec(),
        ])
    }

    /// Learn the agent's authoritative engine id with an unauthenticated
    /// discovery exchange. Cached for the lifetime of the connection.
    async fn ensure_engine(&mut self) -> SnmpResult<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let request_id = self.next_request_id();
        let pdu = encode_pdu(tags::GET_REQUEST, request_id, &[]);
        let discovery = EngineInfo {
            engine_id: Vec::new(),
            boots: 0,
            time: 0,
        };
        let frame = encode_v3_message(request_id, &discovery, &[], &pdu);

        let response = self.exchange(&frame, request_id).await?;
        let engine = response
            .engine
            .filter(|e| !e.engine_id.is_empty())
            .ok_or_else(|| SnmpError::Discovery("agent did not report an engine id".into()))?;
        self.engine = Some(engine);
        Ok(())
    }

    /// Send the frame and wait for a response matching our request id,
    /// retrying on per-attempt timeout. Stale datagrams are skipped.
    async fn exchange(&mut self, frame: &[u8], request_id: i32) -> SnmpResult<ResponsePdu> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        for _attempt in 0..=self.retries {
            self.socket.send(frame).await?;
            let deadline = Instant::now() + self.timeout;

            loop {
                let len = match timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                };

                match self.decode_response(&buf[..len]) {
                    Ok(pdu) if pdu.request_id == request_id as i64 || pdu.is_report => {
                        return Ok(pdu)
                    }
                    // A stale or foreign datagram; keep waiting for ours.
                    Ok(_) | Err(_) => continue,
                }
            }
        }

        Err(SnmpError::Timeout)
    }

    fn decode_response(&self, data: &[u8]) -> SnmpResult<ResponsePdu> {
        let (tag, message, _) = ber::parse_tlv(data)?;
        if tag != tags::SEQUENCE {
            return Err(SnmpError::Malformed(format!(
                "expected SEQUENCE, got 0x{:02x}",
                tag
            )));
        }

        let (tag, version_data, rest) = ber::parse_tlv(message)?;
        if tag != tags::INTEGER {
            return Err(SnmpError::Malformed("missing version".into()));
        }

        match ber::parse_integer(version_data) {
            0 | 1 => decode_community_response(rest),
            3 => decode_v3_response(rest),
            other => Err(SnmpError::Malformed(format!("unknown version {}", other))),
        }
    }
}

/// Result of a one-shot connectivity probe.
#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub sys_descr: Option<String>,
    pub sys_name: Option<String>,
    pub sys_object_id: Option<String>,
    pub response_time: Duration,
}

const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
const SYS_NAME_OID: &str = "1.3.6.1.2.1.1.5.0";
const SYS_OBJECT_ID_OID: &str = "1.3.6.1.2.1.1.2.0";

/// Probe a device with a single GET of the system group, for the device
/// configuration surface.
pub async fn test_connection(
    ip: &str,
    port: u16,
    version: SnmpVersion,
    credential: SecretString,
) -> SnmpResult<ConnectionTest> {
    let started = std::time::Instant::now();

    let mut client = SnmpClient::connect(ip, port, version, credential).await?;
    let oids = vec![
        SYS_DESCR_OID.to_string(),
        SYS_OBJECT_ID_OID.to_string(),
        SYS_NAME_OID.to_string(),
    ];
    let bindings = client.get(&oids).await?;

    let find = |wanted: &str| {
        bindings
            .iter()
            .find(|(oid, _)| oid == wanted)
            .and_then(|(_, value)| match value {
                Value::Str(s) => Some(s.clone()),
                other if !other.is_exception() && !matches!(other, Value::Null) => {
                    Some(other.to_string())
                }
                _ => None,
            })
    };

    Ok(ConnectionTest {
        sys_descr: find(SYS_DESCR_OID),
        sys_name: find(SYS_NAME_OID),
        sys_object_id: find(SYS_OBJECT_ID_OID),
        response_time: started.elapsed(),
    })
}

/// A time-seeded starting request id keeps ids from colliding across
/// repeated redials to the same agent.
fn initial_request_id() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as i32) & 0x3FFF_FFFF
}

fn encode_pdu(pdu_tag: u8, request_id: i32, varbinds: &[Vec<u8>]) -> Vec<u8> {
    ber::encode_tagged(
        pdu_tag,
        &[
            ber::encode_integer(request_id as i64),
            ber::encode_integer(0),
            ber::encode_integer(0),
            ber::encode_sequence(varbinds),
        ],
    )
}

fn encode_v3_message(msg_id: i32, engine: &EngineInfo, user: &[u8], pdu: &[u8]) -> Vec<u8> {
    let header = ber::encode_sequence(&[
        ber::encode_integer(msg_id as i64),
        ber::encode_integer(V3_MAX_MESSAGE_SIZE),
        ber::encode_octet_string(&[V3_FLAG_REPORTABLE]),
        ber::encode_integer(3), // USM
    ]);

    let usm = ber::encode_sequence(&[
        ber::encode_octet_string(&engine.engine_id),
        ber::encode_integer(engine.boots),
        ber::encode_integer(engine.time),
        ber::encode_octet_string(user),
        ber::encode_octet_string(&[]), // auth parameters (noAuth)
        ber::encode_octet_string(&[]), // priv parameters (noPriv)
    ]);

    let scoped_pdu = ber::encode_sequence(&[
        ber::encode_octet_string(&engine.engine_id),
        ber::encode_octet_string(&[]), // context name
        pdu.to_vec(),
    ]);

    ber::encode_sequence(&[
        ber::encode_integer(3),
        header,
        ber::encode_octet_string(&usm),
        scoped_pdu,
    ])
}

fn decode_community_response(data: &[u8]) -> SnmpResult<ResponsePdu> {
    let (tag, _community, rest) = ber::parse_tlv(data)?;
    if tag != tags::OCTET_STRING {
        return Err(SnmpError::Malformed("missing community".into()));
    }

    let (pdu_tag, pdu_data, _) = ber::parse_tlv(rest)?;
    decode_pdu(pdu_tag, pdu_data, None)
}

fn decode_v3_response(data: &[u8]) -> SnmpResult<ResponsePdu> {
    let (tag, _header, rest) = ber::parse_tlv(data)?;
    if tag != tags::SEQUENCE {
        return Err(SnmpError::Malformed("missing v3 header".into()));
    }

    let (tag, security_params, rest) = ber::parse_tlv(rest)?;
    if tag != tags::OCTET_STRING {
        return Err(SnmpError::Malformed("missing security parameters".into()));
    }
    let engine = parse_usm_engine(security_params).ok();

    let (tag, scoped, _) = ber::parse_tlv(rest)?;
    if tag != tags::SEQUENCE {
        return Err(SnmpError::Malformed("missing scoped PDU".into()));
    }

    let (tag, _context_engine, rest) = ber::parse_tlv(scoped)?;
    if tag != tags::OCTET_STRING {
        return Err(SnmpError::Malformed("missing context engine id".into()));
    }
    let (tag, _context_name, rest) = ber::parse_tlv(rest)?;
    if tag != tags::OCTET_STRING {
        return Err(SnmpError::Malformed("missing context name".into()));
    }

    let (pdu_tag, pdu_data, _) = ber::parse_tlv(rest)?;
    decode_pdu(pdu_tag, pdu_data, engine)
}

fn parse_usm_engine(data: &[u8]) -> SnmpResult<EngineInfo> {
    let (tag, usm, _) = ber::parse_tlv(data)?;
    if tag != tags::SEQUENCE {
        return Err(SnmpError::Malformed("USM parameters not a SEQUENCE".into()));
    }

    let (tag, engine_id, rest) = ber::parse_tlv(usm)?;
    if tag != tags::OCTET_STRING {
        return Err(SnmpError::Malformed("missing engine id".into()));
    }
    let (tag, boots, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(SnmpError::Malformed("missing engine boots".into()));
    }
    let (tag, time, _) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(SnmpError::Malformed("missing engine time".into()));
    }

    Ok(EngineInfo {
        engine_id: engine_id.to_vec(),
        boots: ber::parse_integer(boots),
        time: ber::parse_integer(time),
    })
}

fn decode_pdu(pdu_tag: u8, data: &[u8], engine: Option<EngineInfo>) -> SnmpResult<ResponsePdu> {
    let is_report = pdu_tag == tags::REPORT;
    if pdu_tag != tags::GET_RESPONSE && !is_report {
        return Err(SnmpError::Malformed(format!(
            "unexpected PDU tag 0x{:02x}",
            pdu_tag
        )));
    }

    let (tag, request_id, rest) = ber::parse_tlv(data)?;
    if tag != tags::INTEGER {
        return Err(SnmpError::Malformed("missing request id".into()));
    }
    let (tag, error_status, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(SnmpError::Malformed("missing error status".into()));
    }
    let (tag, error_index, rest) = ber::parse_tlv(rest)?;
    if tag != tags::INTEGER {
        return Err(SnmpError::Malformed("missing error index".into()));
    }

    let (tag, varbind_data, _) = ber::parse_tlv(rest)?;
    if tag != tags::SEQUENCE {
        return Err(SnmpError::Malformed("missing varbind list".into()));
    }

    let mut bindings = Vec::new();
    let mut remaining = varbind_data;
    while !remaining.is_empty() {
        let (tag, varbind, rest) = ber::parse_tlv(remaining)?;
        if tag != tags::SEQUENCE {
            return Err(SnmpError::Malformed("varbind is not a SEQUENCE".into()));
        }
        remaining = rest;

        let (tag, oid_data, value_rest) = ber::parse_tlv(varbind)?;
        if tag != tags::OBJECT_IDENTIFIER {
            return Err(SnmpError::Malformed("varbind missing OID".into()));
        }
        let (value_tag, value_data, _) = ber::parse_tlv(value_rest)?;

        bindings.push((ber::parse_oid(oid_data), decode_value(value_tag, value_data)));
    }

    Ok(ResponsePdu {
        request_id: ber::parse_integer(request_id),
        error_status: ber::parse_integer(error_status),
        error_index: ber::parse_integer(error_index),
        bindings,
        is_report,
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Build a GET response frame echoing the given request id.
    fn response_frame(version: i64, request_id: i64, varbinds: &[Vec<u8>]) -> Vec<u8> {
        let pdu = ber::encode_tagged(
            tags::GET_RESPONSE,
            &[
                ber::encode_integer(request_id),
                ber::encode_integer(0),
                ber::encode_integer(0),
                ber::encode_sequence(varbinds),
            ],
        );
        ber::encode_sequence(&[
            ber::encode_integer(version),
            ber::encode_octet_string(b"public"),
            pdu,
        ])
    }

    fn int_varbind(oid: &str, value: i64) -> Vec<u8> {
        ber::encode_sequence(&[ber::encode_oid(oid).unwrap(), ber::encode_integer(value)])
    }

    /// Extract the request id from an incoming GET/SET request frame.
    fn request_id_of(frame: &[u8]) -> i64 {
        let (_, message, _) = ber::parse_tlv(frame).unwrap();
        let (_, _version, rest) = ber::parse_tlv(message).unwrap();
        let (_, _community, rest) = ber::parse_tlv(rest).unwrap();
        let (_, pdu, _) = ber::parse_tlv(rest).unwrap();
        let (_, request_id, _) = ber::parse_tlv(pdu).unwrap();
        ber::parse_integer(request_id)
    }

    /// One-datagram fake agent: answers a single request with the frame
    /// produced by `respond`.
    async fn spawn_agent<F>(respond: F) -> u16
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_PACKET_SIZE];
            let (len, peer) = socket.recv_from(&mut buf).await.unwrap();
            let reply = respond(&buf[..len]);
            socket.send_to(&reply, peer).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_get_decodes_bindings() {
        let port = spawn_agent(|frame| {
            let id = request_id_of(frame);
            response_frame(1, id, &[int_varbind("1.3.6.1.2.1.33.1.2.1.0", 126)])
        })
        .await;

        let mut client = SnmpClient::connect("127.0.0.1", port, SnmpVersion::V2c, "public".into())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(500), 0);

        let bindings = client
            .get(&["1.3.6.1.2.1.33.1.2.1.0".to_string()])
            .await
            .unwrap();
        assert_eq!(
            bindings,
            vec![("1.3.6.1.2.1.33.1.2.1.0".to_string(), Value::Int(126))]
        );
    }

    #[tokio::test]
    async fn test_get_times_out_without_agent() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let mut client = SnmpClient::connect("127.0.0.1", port, SnmpVersion::V2c, "public".into())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(50), 1);

        let err = client
            .get(&["1.3.6.1.2.1.1.1.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SnmpError::Timeout));
    }

    #[tokio::test]
    async fn test_v1_error_status_fails_the_request() {
        let port = spawn_agent(|frame| {
            let id = request_id_of(frame);
            // noSuchName (2) at index 1
            let pdu = ber::encode_tagged(
                tags::GET_RESPONSE,
                &[
                    ber::encode_integer(id),
                    ber::encode_integer(2),
                    ber::encode_integer(1),
                    ber::encode_sequence(&[]),
                ],
            );
            ber::encode_sequence(&[
                ber::encode_integer(0),
                ber::encode_octet_string(b"public"),
                pdu,
            ])
        })
        .await;

        let mut client = SnmpClient::connect("127.0.0.1", port, SnmpVersion::V1, "public".into())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(500), 0);

        let err = client
            .get(&["1.3.6.1.2.1.99.0".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SnmpError::ErrorStatus { status: 2, index: 1 }
        ));
    }

    #[tokio::test]
    async fn test_set_encodes_integer_binding() {
        let port = spawn_agent(|frame| {
            let (_, message, _) = ber::parse_tlv(frame).unwrap();
            let (_, _version, rest) = ber::parse_tlv(message).unwrap();
            let (_, _community, rest) = ber::parse_tlv(rest).unwrap();
            let (pdu_tag, pdu, _) = ber::parse_tlv(rest).unwrap();
            assert_eq!(pdu_tag, tags::SET_REQUEST);
            let (_, request_id, _) = ber::parse_tlv(pdu).unwrap();
            response_frame(
                1,
                ber::parse_integer(request_id),
                &[int_varbind("1.3.6.1.4.1.318.1.1.4.4.2.1.3.1", 2)],
            )
        })
        .await;

        let mut client = SnmpClient::connect("127.0.0.1", port, SnmpVersion::V2c, "private".into())
            .await
            .unwrap()
            .with_timeout(Duration::from_millis(500), 0);

        client
            .set("1.3.6.1.4.1.318.1.1.4.4.2.1.3.1", &SetValue::Int(2))
            .await
            .unwrap();
    }

    #[test]
    fn test_decode_nosuch_sentinels_in_response() {
        let varbind = ber::encode_sequence(&[
            ber::encode_oid("1.3.6.1.2.1.33.1.2.4.0").unwrap(),
            ber::tlv(tags::NO_SUCH_INSTANCE, &[]),
        ]);
        let frame = response_frame(1, 7, &[varbind]);

        let (_, message, _) = ber::parse_tlv(&frame).unwrap();
        let (_, _version, rest) = ber::parse_tlv(message).unwrap();
        let pdu = decode_community_response(rest).unwrap();
        assert_eq!(pdu.bindings[0].1, Value::NoSuchInstance);
    }

    #[test]
    fn test_v3_message_roundtrips_through_decoder() {
        let engine = EngineInfo {
            engine_id: vec![0x80, 0x00, 0x1F, 0x88, 0x01],
            boots: 3,
            time: 1024,
        };
        let pdu = encode_pdu(tags::GET_RESPONSE, 99, &[]);
        let frame = encode_v3_message(99, &engine, b"monitor", &pdu);

        let (_, message, _) = ber::parse_tlv(&frame).unwrap();
        let (_, version_data, rest) = ber::parse_tlv(message).unwrap();
        assert_eq!(ber::parse_integer(version_data), 3);

        let decoded = decode_v3_response(rest).unwrap();
        assert_eq!(decoded.request_id, 99);
        let decoded_engine = decoded.engine.unwrap();
        assert_eq!(decoded_engine.engine_id, engine.engine_id);
        assert_eq!(decoded_engine.boots, 3);
        assert_eq!(decoded_engine.time, 1024);
    }

    #[tokio::test]
    async fn test_connection_probe_reads_system_group() {
        let port = spawn_agent(|frame| {
            let id = request_id_of(frame);
            let descr = ber::encode_sequence(&[
                ber::encode_oid("1.3.6.1.2.1.1.1.0").unwrap(),
                ber::encode_octet_string(b"APC Web/SNMP Management Card"),
            ]);
            let object_id = ber::encode_sequence(&[
                ber::encode_oid("1.3.6.1.2.1.1.2.0").unwrap(),
                ber::encode_oid("1.3.6.1.4.1.318.1.3.27").unwrap(),
            ]);
            let name = ber::encode_sequence(&[
                ber::encode_oid("1.3.6.1.2.1.1.5.0").unwrap(),
                ber::encode_octet_string(b"rack-ups-1"),
            ]);
            response_frame(1, id, &[descr, object_id, name])
        })
        .await;

        let probe = test_connection("127.0.0.1", port, SnmpVersion::V2c, "public".into())
            .await
            .unwrap();
        assert_eq!(
            probe.sys_descr.as_deref(),
            Some("APC Web/SNMP Management Card")
        );
        assert_eq!(probe.sys_name.as_deref(), Some("rack-ups-1"));
        assert_eq!(probe.sys_object_id.as_deref(), Some("1.3.6.1.4.1.318.1.3.27"));
    }

    #[test]
    fn test_initial_request_id_is_masked() {
        let id = initial_request_id();
        assert!(id >= 0);
        assert!(id <= 0x3FFF_FFFF);
    }
}
