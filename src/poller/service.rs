//! Per-device SNMP polling with state accumulation and event fan-out.
//!
//! Each enabled device runs its own loop with its own socket and its own
//! missing-OID set, so a slow or dead device never blocks the others. The
//! service also owns the device-state map and the subscriber bus: every
//! completed poll merges into the accumulated state and emits a full
//! snapshot to every subscriber, dropping the event for subscribers whose
//! queue is full (the next snapshot supersedes it).

use super::transform::{derive_values, normalize_oid, transform};
use crate::domain::{Device, DeviceState, OidMapping, Profile, SnmpVersion, Value};
use crate::repository::{DeviceRepository, ProfileRepository, RepositoryResult};
use crate::snmp::SnmpClient;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded capacity of each subscriber's event queue.
const EVENT_QUEUE_CAPACITY: usize = 100;

/// GET batch size for v2c/v3.
const BATCH_SIZE: usize = 10;

/// Polled when a device has no profile (or the cycle selects no OIDs):
/// sysDescr.0 and sysUpTime.0.
const BASE_OIDS: [&str; 2] = [".1.3.6.1.2.1.1.1.0", ".1.3.6.1.2.1.1.3.0"];

/// Emitted after every completed poll with the full accumulated snapshot.
#[derive(Debug, Clone)]
pub struct StateUpdateEvent {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: HashMap<String, Value>,
    pub online: bool,
}

/// Handle for one device's polling loop.
struct DeviceHandle {
    trigger_tx: mpsc::Sender<()>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct PollerInner {
    device_repo: Arc<dyn DeviceRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    devices: RwLock<HashMap<String, DeviceHandle>>,
    states: RwLock<HashMap<String, DeviceState>>,
    subscribers: RwLock<Vec<mpsc::Sender<StateUpdateEvent>>>,
    default_interval: Duration,
    shutdown: CancellationToken,
}

/// Manages SNMP polling for all devices.
#[derive(Clone)]
pub struct PollerService {
    inner: Arc<PollerInner>,
}

impl PollerService {
    pub fn new(
        device_repo: Arc<dyn DeviceRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        default_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                device_repo,
                profile_repo,
                devices: RwLock::new(HashMap::new()),
                states: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                default_interval,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Load enabled devices from the repository and start their loops.
    pub fn start(&self) -> RepositoryResult<()> {
        let devices = self.inner.device_repo.get_enabled()?;
        let count = devices.len();
        for device in devices {
            self.add_device(device);
        }
        info!("Poller started with {} devices", count);
        Ok(())
    }

    /// Stop every device loop, wait for them to finish their in-flight
    /// cycle, then close all subscriber queues.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();

        let handles: Vec<DeviceHandle> = {
            let mut devices = self.inner.devices.write().unwrap();
            devices.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            let _ = handle.task.await;
        }

        self.inner.subscribers.write().unwrap().clear();
        info!("Poller stopped");
    }

    /// Register a subscriber. Events are dropped for this subscriber when
    /// its queue is full; subscribers are closed on shutdown.
    pub fn subscribe(&self) -> mpsc::Receiver<StateUpdateEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        self.inner.subscribers.write().unwrap().push(tx);
        rx
    }

    /// Start polling a device. Adding an already-present device is a no-op.
    pub fn add_device(&self, device: Device) {
        let mut devices = self.inner.devices.write().unwrap();
        if devices.contains_key(&device.id) {
            return;
        }

        let profile = device
            .profile_id
            .as_deref()
            .and_then(|id| self.inner.profile_repo.get_by_id(id).ok());

        let interval = if device.poll_interval > 0 {
            Duration::from_secs(device.poll_interval as u64)
        } else {
            self.inner.default_interval
        };

        let device_id = device.id.clone();
        self.inner
            .states
            .write()
            .unwrap()
            .entry(device_id.clone())
            .or_insert_with(|| DeviceState::new(&device_id));

        // Trigger channel is conflating: capacity 1, extra triggers dropped.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let stop = self.inner.shutdown.child_token();

        let task = tokio::spawn(run_device_loop(
            self.inner.clone(),
            DevicePoller::new(device, profile),
            interval,
            trigger_rx,
            stop.clone(),
        ));

        devices.insert(
            device_id,
            DeviceHandle {
                trigger_tx,
                stop,
                task,
            },
        );
    }

    /// Stop a device's loop, wait for it to exit, and drop its state.
    pub async fn remove_device(&self, id: &str) {
        let handle = self.inner.devices.write().unwrap().remove(id);
        if let Some(handle) = handle {
            handle.stop.cancel();
            let _ = handle.task.await;
        }
        self.inner.states.write().unwrap().remove(id);
    }

    /// Remove-then-add so the loop rebinds cleanly to the new snapshot
    /// and profile.
    pub async fn update_device(&self, device: Device) {
        self.remove_device(&device.id).await;
        if device.enabled {
            self.add_device(device);
        }
    }

    /// Request an immediate poll. Conflated: a trigger while one is
    /// already pending is dropped.
    pub fn trigger_poll(&self, device_id: &str) {
        let devices = self.inner.devices.read().unwrap();
        if let Some(handle) = devices.get(device_id) {
            let _ = handle.trigger_tx.try_send(());
        }
    }

    pub fn get_state(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.states.read().unwrap().get(device_id).cloned()
    }

    pub fn get_all_states(&self) -> HashMap<String, DeviceState> {
        self.inner.states.read().unwrap().clone()
    }

    pub fn device_count(&self) -> usize {
        self.inner.devices.read().unwrap().len()
    }
}

impl PollerInner {
    /// Merge a poll's values into the accumulated state (keys are never
    /// cleared) and emit a full-snapshot event.
    fn update_state(
        &self,
        device_id: &str,
        values: HashMap<String, Value>,
        online: bool,
        errors: Vec<String>,
    ) {
        let full_values = {
            let mut states = self.states.write().unwrap();
            let state = states
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceState::new(device_id));

            state.online = online;
            state.last_poll = Utc::now();
            state.errors = errors;
            for (key, value) in values {
                state.values.insert(key, value);
            }
            state.values.clone()
        };

        let event = StateUpdateEvent {
            device_id: device_id.to_string(),
            timestamp: Utc::now(),
            values: full_values,
            online,
        };

        let subscribers = self.subscribers.read().unwrap();
        for tx in subscribers.iter() {
            // Non-blocking: a full queue drops the event for that
            // subscriber only; the next snapshot supersedes it.
            let _ = tx.try_send(event.clone());
        }
    }
}

async fn run_device_loop(
    inner: Arc<PollerInner>,
    mut poller: DevicePoller,
    interval: Duration,
    mut trigger_rx: mpsc::Receiver<()>,
    stop: CancellationToken,
) {
    debug!(
        "Polling loop started for device {} every {:?}",
        poller.device.id, interval
    );

    // Initial poll before the ticker starts
    poller.poll(&inner).await;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => poller.poll(&inner).await,
            Some(_) = trigger_rx.recv() => poller.poll(&inner).await,
        }
    }

    debug!("Polling loop stopped for device {}", poller.device.id);
}

/// Per-device polling state: the device snapshot, its cached profile and
/// OID index, the dialled client, and the learned missing-OID set. Owned
/// exclusively by the device's loop.
struct DevicePoller {
    device: Device,
    oid_index: HashMap<String, Vec<OidMapping>>,
    mappings: Vec<OidMapping>,
    client: Option<SnmpClient>,
    poll_count: u64,
    missing_oids: HashSet<String>,
}

impl DevicePoller {
    fn new(device: Device, profile: Option<Profile>) -> Self {
        let mappings = profile.map(|p| p.oid_mappings).unwrap_or_default();
        Self {
            device,
            oid_index: build_oid_index(&mappings),
            mappings,
            client: None,
            poll_count: 0,
            missing_oids: HashSet::new(),
        }
    }

    async fn poll(&mut self, inner: &PollerInner) {
        self.poll_count += 1;

        if self.client.is_none() {
            match self.dial().await {
                Ok(client) => self.client = Some(client),
                Err(message) => {
                    inner.update_state(&self.device.id, HashMap::new(), false, vec![message]);
                    return;
                }
            }
        }

        let oids = self.oids_to_poll();
        let batch_size = match self.device.snmp_version {
            // v1 response-size limits and noSuchName semantics make batches
            // unreliable; individual queries are the compatibility baseline.
            SnmpVersion::V1 => 1,
            _ => BATCH_SIZE,
        };

        let mut values: HashMap<String, Value> = HashMap::new();
        let mut errors: Vec<String> = Vec::new();

        let batches: Vec<Vec<String>> = oids.chunks(batch_size).map(<[String]>::to_vec).collect();
        for batch in batches {
            let result = match self.client.as_mut() {
                Some(client) => client.get(&batch).await,
                None => break,
            };

            match result {
                Ok(bindings) => self.ingest(bindings, &mut values),
                Err(e) if self.device.snmp_version == SnmpVersion::V1 => {
                    debug!(
                        "SNMP GET failed for device {} ({}), retrying OIDs individually",
                        self.device.id, e
                    );
                    // Reopen the socket for a clean state, then query each
                    // OID on its own, silently dropping the ones that fail.
                    self.client = None;
                    match self.dial().await {
                        Ok(client) => self.client = Some(client),
                        Err(message) => {
                            errors.push(message);
                            continue;
                        }
                    }
                    for oid in &batch {
                        let single = match self.client.as_mut() {
                            Some(client) => client.get(std::slice::from_ref(oid)).await,
                            None => break,
                        };
                        match single {
                            Ok(bindings) => self.ingest(bindings, &mut values),
                            Err(e) => debug!("OID {} not available: {}", oid, e),
                        }
                    }
                }
                Err(e) => {
                    errors.push(e.to_string());
                    // Drop the socket; it is re-dialled on the next cycle.
                    self.client = None;
                    break;
                }
            }
        }

        derive_values(&mut values);

        let online = errors.is_empty();
        inner.update_state(&self.device.id, values, online, errors);

        if online {
            if let Err(e) = inner.device_repo.update_last_seen(&self.device.id) {
                warn!("Failed to update last_seen for {}: {}", self.device.id, e);
            }
        }
    }

    async fn dial(&self) -> Result<SnmpClient, String> {
        SnmpClient::connect(
            &self.device.ip_address,
            self.device.port,
            self.device.snmp_version,
            self.device.community.clone(),
        )
        .await
        .map_err(|e| e.to_string())
    }

    /// The OIDs this cycle should request: poll-group gating, learned
    /// missing OIDs skipped, deduplicated (composite mappings share an
    /// OID). Falls back to the base OIDs when nothing is selected.
    fn oids_to_poll(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut oids = Vec::new();

        for mapping in &self.mappings {
            if self.poll_count % mapping.poll_group.interval() != 0 {
                continue;
            }
            let normalized = normalize_oid(&mapping.oid);
            if self.missing_oids.contains(normalized) {
                continue;
            }
            if seen.insert(normalized.to_string()) {
                oids.push(mapping.oid.clone());
            }
        }

        if oids.is_empty() {
            oids = BASE_OIDS.iter().map(|s| s.to_string()).collect();
        }

        oids
    }

    /// Feed decoded bindings into the value map. noSuch* responses teach
    /// the missing-OID set; every surviving value is stored under both the
    /// mapping names and the raw OID. Duplicate OIDs in one response
    /// resolve to the last one seen.
    fn ingest(&mut self, bindings: Vec<(String, Value)>, values: &mut HashMap<String, Value>) {
        for (oid, value) in bindings {
            let normalized = normalize_oid(&oid).to_string();

            if value.is_exception() {
                if self.missing_oids.insert(normalized.clone()) {
                    info!(
                        "OID {} not available on device {} - skipping in future polls",
                        normalized, self.device.name
                    );
                }
                continue;
            }
            if value.is_null() {
                continue;
            }

            if let Some(mappings) = self.oid_index.get(&normalized) {
                for mapping in mappings {
                    values.insert(mapping.name.clone(), transform(&value, mapping));
                }
            }
            values.insert(normalized, value);
        }
    }
}

/// Index mappings by normalized OID. Composite mappings legitimately share
/// an OID, so the index maps to a list.
fn build_oid_index(mappings: &[OidMapping]) -> HashMap<String, Vec<OidMapping>> {
    let mut index: HashMap<String, Vec<OidMapping>> = HashMap::new();
    for mapping in mappings {
        index
            .entry(normalize_oid(&mapping.oid).to_string())
            .or_default()
            .push(mapping.clone());
    }
    index
}
