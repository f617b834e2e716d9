//! SNMP trap receiver worker.
//!
//! Listens for v1/v2c traps on a UDP socket, classifies severity,
//! correlates the source IP to a configured device, persists the trap log,
//! and hands it to the registered callback (which the binary wires to the
//! MQTT trap stream). A bind failure disables trap reception but leaves
//! the rest of the bridge running.

use crate::domain::{TrapLog, TrapSeverity, Value};
use crate::poller::normalize_oid;
use crate::repository::{DeviceRepository, TrapLogRepository};
use crate::snmp::{parse_trap, ParsedTrap};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Default SNMP trap port.
pub const DEFAULT_TRAP_PORT: u16 = 162;

const MAX_PACKET_SIZE: usize = 65535;

pub type TrapCallback = Arc<dyn Fn(&TrapLog) + Send + Sync>;

pub struct TrapReceiver {
    port: u16,
    device_repo: Arc<dyn DeviceRepository>,
    trap_repo: Arc<dyn TrapLogRepository>,
    on_trap: RwLock<Option<TrapCallback>>,
}

impl TrapReceiver {
    pub fn new(
        port: u16,
        device_repo: Arc<dyn DeviceRepository>,
        trap_repo: Arc<dyn TrapLogRepository>,
    ) -> Self {
        Self {
            port,
            device_repo,
            trap_repo,
            on_trap: RwLock::new(None),
        }
    }

    /// Register the callback invoked for every stored trap.
    pub fn on_trap(&self, callback: TrapCallback) {
        *self.on_trap.write().unwrap() = Some(callback);
    }

    /// Bind the trap port and process packets until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let bind_addr = format!("0.0.0.0:{}", self.port);
        let socket = match UdpSocket::bind(&bind_addr).await {
            Ok(socket) => {
                info!("SNMP trap listener started on UDP port {}", self.port);
                socket
            }
            Err(e) => {
                error!("Failed to bind trap listener to {}: {}", bind_addr, e);
                return;
            }
        };

        self.run_on_socket(socket, shutdown).await;
    }

    async fn run_on_socket(self: Arc<Self>, socket: UdpSocket, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Trap receiver stopped");
                    break;
                }
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, source)) => match parse_trap(&buf[..len]) {
                        Ok(parsed) => self.handle_trap(parsed, source),
                        Err(e) => warn!("Failed to parse SNMP trap from {}: {}", source, e),
                    },
                    Err(e) => warn!("Error receiving trap packet: {}", e),
                }
            }
        }
    }

    fn handle_trap(&self, parsed: ParsedTrap, source: SocketAddr) {
        let source_ip = source.ip().to_string();
        info!(
            "Received {} trap {} from {}",
            parsed.version, parsed.trap_oid, source_ip
        );

        // Correlate the source address to a configured device.
        let device_id = match self.device_repo.get_all() {
            Ok(devices) => devices
                .into_iter()
                .find(|d| d.ip_address == source_ip)
                .map(|d| d.id),
            Err(e) => {
                warn!("Failed to load devices for trap correlation: {}", e);
                None
            }
        };

        let variables: BTreeMap<String, Value> = parsed.varbinds.into_iter().collect();
        let trap = TrapLog {
            id: uuid::Uuid::new_v4().to_string(),
            device_id,
            source_ip,
            trap_oid: parsed.trap_oid.clone(),
            severity: classify_severity(&parsed.trap_oid),
            message: trap_message(&parsed.trap_oid, variables.len()),
            variables,
            received_at: Utc::now(),
        };

        if let Err(e) = self.trap_repo.create(&trap) {
            error!("Failed to save trap: {}", e);
        }

        let callback = self.on_trap.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(&trap);
        }
    }
}

/// Severity classification table, keyed on the trap OID. APC battery
/// transitions are the interesting cases; everything else is info.
pub fn classify_severity(trap_oid: &str) -> TrapSeverity {
    match normalize_oid(trap_oid) {
        // UPS on battery, UPS battery low
        "1.3.6.1.4.1.318.2.3.1" | "1.3.6.1.4.1.318.2.3.5" => TrapSeverity::Critical,
        // Return from battery, communication lost
        "1.3.6.1.4.1.318.2.3.2" | "1.3.6.1.4.1.318.2.3.4" => TrapSeverity::Warning,
        _ => TrapSeverity::Info,
    }
}

/// Human message for a trap, from a small lookup table with a generic
/// fallback.
pub fn trap_message(trap_oid: &str, variable_count: usize) -> String {
    match normalize_oid(trap_oid) {
        "1.3.6.1.4.1.318.2.3.1" => "UPS on battery power".to_string(),
        "1.3.6.1.4.1.318.2.3.2" => "UPS returned to utility power".to_string(),
        "1.3.6.1.4.1.318.2.3.4" => "Communication lost with UPS".to_string(),
        "1.3.6.1.4.1.318.2.3.5" => "UPS battery low".to_string(),
        oid if variable_count > 0 => format!("Trap {} with {} variables", oid, variable_count),
        oid => format!("Trap {}", oid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Device, SnmpVersion, TrapFilter};
    use crate::repository::{RepositoryError, RepositoryResult};
    use crate::secret::SecretString;
    use crate::snmp::ber::{self, tags};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockDeviceRepo {
        devices: Vec<Device>,
    }

    impl DeviceRepository for MockDeviceRepo {
        fn create(&self, _: &Device) -> RepositoryResult<()> {
            Ok(())
        }
        fn get_by_id(&self, id: &str) -> RepositoryResult<Device> {
            Err(RepositoryError::NotFound(format!("device {}", id)))
        }
        fn get_all(&self) -> RepositoryResult<Vec<Device>> {
            Ok(self.devices.clone())
        }
        fn get_enabled(&self) -> RepositoryResult<Vec<Device>> {
            Ok(self.devices.clone())
        }
        fn update(&self, _: &Device) -> RepositoryResult<()> {
            Ok(())
        }
        fn delete(&self, _: &str) -> RepositoryResult<()> {
            Ok(())
        }
        fn update_last_seen(&self, _: &str) -> RepositoryResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTrapRepo {
        traps: Mutex<Vec<TrapLog>>,
    }

    impl TrapLogRepository for MockTrapRepo {
        fn create(&self, trap: &TrapLog) -> RepositoryResult<()> {
            self.traps.lock().unwrap().push(trap.clone());
            Ok(())
        }
        fn get_all(&self, _: &TrapFilter) -> RepositoryResult<Vec<TrapLog>> {
            Ok(self.traps.lock().unwrap().clone())
        }
        fn delete_older_than(&self, _: u32) -> RepositoryResult<usize> {
            Ok(0)
        }
    }

    fn device(id: &str, ip: &str) -> Device {
        Device {
            id: id.into(),
            name: id.into(),
            ip_address: ip.into(),
            port: 161,
            community: SecretString::new("public"),
            write_community: None,
            snmp_version: SnmpVersion::V2c,
            profile_id: None,
            poll_interval: 0,
            enabled: true,
            labels: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_seen: None,
        }
    }

    fn on_battery_trap_packet() -> Vec<u8> {
        let trap_oid_varbind = ber::encode_sequence(&[
            ber::encode_oid("1.3.6.1.6.3.1.1.4.1.0").unwrap(),
            ber::encode_oid("1.3.6.1.4.1.318.2.3.1").unwrap(),
        ]);
        let pdu = ber::encode_tagged(
            tags::TRAP_PDU_V2,
            &[
                ber::encode_integer(1),
                ber::encode_integer(0),
                ber::encode_integer(0),
                ber::encode_sequence(&[trap_oid_varbind]),
            ],
        );
        ber::encode_sequence(&[
            ber::encode_integer(1),
            ber::encode_octet_string(b"public"),
            pdu,
        ])
    }

    #[test]
    fn test_classify_severity_table() {
        assert_eq!(
            classify_severity(".1.3.6.1.4.1.318.2.3.1"),
            TrapSeverity::Critical
        );
        assert_eq!(
            classify_severity("1.3.6.1.4.1.318.2.3.5"),
            TrapSeverity::Critical
        );
        assert_eq!(
            classify_severity("1.3.6.1.4.1.318.2.3.2"),
            TrapSeverity::Warning
        );
        assert_eq!(
            classify_severity(".1.3.6.1.4.1.318.2.3.4"),
            TrapSeverity::Warning
        );
        assert_eq!(classify_severity("1.3.6.1.6.3.1.1.5.1"), TrapSeverity::Info);
    }

    #[test]
    fn test_trap_message_table() {
        assert_eq!(
            trap_message("1.3.6.1.4.1.318.2.3.1", 2),
            "UPS on battery power"
        );
        assert_eq!(trap_message("1.3.6.1.4.1.318.2.3.5", 0), "UPS battery low");
        assert_eq!(
            trap_message("1.3.6.1.6.3.1.1.5.1", 3),
            "Trap 1.3.6.1.6.3.1.1.5.1 with 3 variables"
        );
        assert_eq!(trap_message("1.3.6.1.6.3.1.1.5.1", 0), "Trap 1.3.6.1.6.3.1.1.5.1");
    }

    #[tokio::test]
    async fn test_trap_is_correlated_and_stored() {
        let trap_repo = Arc::new(MockTrapRepo::default());
        let receiver = Arc::new(TrapReceiver::new(
            0,
            Arc::new(MockDeviceRepo {
                devices: vec![device("dev-1", "10.0.0.7")],
            }),
            trap_repo.clone(),
        ));

        let notified = Arc::new(Mutex::new(Vec::new()));
        let sink = notified.clone();
        receiver.on_trap(Arc::new(move |trap| {
            sink.lock().unwrap().push(trap.id.clone());
        }));

        let parsed = parse_trap(&on_battery_trap_packet()).unwrap();
        receiver.handle_trap(parsed, "10.0.0.7:50000".parse().unwrap());

        let stored = trap_repo.traps.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].device_id.as_deref(), Some("dev-1"));
        assert_eq!(stored[0].severity, TrapSeverity::Critical);
        assert_eq!(stored[0].message, "UPS on battery power");
        assert_eq!(stored[0].trap_oid, "1.3.6.1.4.1.318.2.3.1");
        assert_eq!(notified.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_source_leaves_device_unset() {
        let trap_repo = Arc::new(MockTrapRepo::default());
        let receiver = Arc::new(TrapReceiver::new(
            0,
            Arc::new(MockDeviceRepo {
                devices: vec![device("dev-1", "10.0.0.7")],
            }),
            trap_repo.clone(),
        ));

        let parsed = parse_trap(&on_battery_trap_packet()).unwrap();
        receiver.handle_trap(parsed, "192.168.9.9:50000".parse().unwrap());

        let stored = trap_repo.traps.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].device_id.is_none());
    }

    #[tokio::test]
    async fn test_receiver_processes_udp_packets() {
        let trap_repo = Arc::new(MockTrapRepo::default());
        let receiver = Arc::new(TrapReceiver::new(
            0,
            Arc::new(MockDeviceRepo { devices: vec![] }),
            trap_repo.clone(),
        ));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(receiver.clone().run_on_socket(socket, shutdown.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&on_battery_trap_packet(), addr)
            .await
            .unwrap();

        // Give the receiver a moment to pick the datagram up.
        for _ in 0..50 {
            if !trap_repo.traps.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        task.await.unwrap();

        let stored = trap_repo.traps.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].severity, TrapSeverity::Critical);
    }
}
