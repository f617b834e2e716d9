//! Routes poller state events to MQTT topics and translates inbound bus
//! commands into SNMP SET operations.
//!
//! Commands resolve against the device's profile: the SET target is always
//! the mapping's write OID. Composite switches are read-modify-write on
//! the shared composite string; the read/write race window is accepted
//! rather than serializing unrelated SNMP operations behind a mutex.

use super::client::{CommandHandler, MqttClient};
use super::discovery::{sanitize_entity_id, Discovery};
use crate::domain::{
    Device, DeviceState, HaComponent, OidMapping, OidType, Profile, Value,
};
use crate::poller::{derive_values, normalize_oid, PollerService, StateUpdateEvent};
use crate::repository::ProfileRepository;
use crate::snmp::{SetValue, SnmpClient};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raw values a device may report that mean "no problem".
const GOOD_VALUES: [&str; 9] = [
    "ok",
    "normal",
    "redundant",
    "on",
    "connected",
    "online",
    "healthy",
    "good",
    "active",
];

/// Mapping names whose select entity shows the ATS source choice.
const SOURCE_SELECT_NAMES: [&str; 2] = ["Preferred Source", "Selected Source"];

struct DeviceEntry {
    device: Device,
    profile: Option<Profile>,
    /// Last (source A, source B) names published to the select discovery
    /// documents; re-publish only on change.
    published_sources: Option<(String, String)>,
}

struct PublisherInner {
    client: MqttClient,
    discovery: Discovery,
    poller: PollerService,
    profile_repo: Arc<dyn ProfileRepository>,
    devices: RwLock<HashMap<String, DeviceEntry>>,
    shutdown: CancellationToken,
}

/// Publishes device state to MQTT and handles inbound commands.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    pub fn new(
        client: MqttClient,
        discovery: Discovery,
        poller: PollerService,
        profile_repo: Arc<dyn ProfileRepository>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                client,
                discovery,
                poller,
                profile_repo,
                devices: RwLock::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// Subscribe to poller events and start the publishing task.
    pub fn start(&self) {
        let rx = self.inner.poller.subscribe();
        tokio::spawn(run_event_loop(self.inner.clone(), rx));
        info!("MQTT publisher started");
    }

    /// Register a device: publish its discovery documents and subscribe to
    /// its command topics.
    pub async fn register_device(&self, device: Device) {
        let profile = device
            .profile_id
            .as_deref()
            .and_then(|id| match self.inner.profile_repo.get_by_id(id) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("Failed to load profile for device {}: {}", device.id, e);
                    None
                }
            });

        let device_id = device.id.clone();
        self.inner.devices.write().unwrap().insert(
            device_id.clone(),
            DeviceEntry {
                device: device.clone(),
                profile: profile.clone(),
                published_sources: None,
            },
        );

        if let Some(profile) = &profile {
            if self.inner.client.is_connected() {
                if let Err(e) = self.inner.discovery.publish_device(&device, profile).await {
                    warn!("Failed to publish discovery for device {}: {}", device_id, e);
                }
            }
        }

        let inner = self.inner.clone();
        let handler: CommandHandler = Arc::new(move |device_id, entity_id, payload| {
            let inner = inner.clone();
            tokio::spawn(async move {
                handle_command(inner, device_id, entity_id, payload).await;
            });
        });

        if let Err(e) = self.inner.client.subscribe_commands(&device_id, handler).await {
            warn!("Failed to subscribe to commands for device {}: {}", device_id, e);
        }
    }

    /// Unregister a device: withdraw discovery documents and drop the
    /// command subscription.
    pub async fn unregister_device(&self, device_id: &str) {
        let entry = self.inner.devices.write().unwrap().remove(device_id);

        if let Some(entry) = entry {
            if let Some(profile) = &entry.profile {
                if self.inner.client.is_connected() {
                    if let Err(e) = self.inner.discovery.remove_device(device_id, profile).await {
                        warn!("Failed to remove discovery for device {}: {}", device_id, e);
                    }
                }
            }
        }

        self.inner.client.unsubscribe_commands(device_id).await;
    }
}

async fn run_event_loop(inner: Arc<PublisherInner>, mut rx: mpsc::Receiver<StateUpdateEvent>) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => publish_state(&inner, event).await,
                None => break,
            }
        }
    }
}

async fn publish_state(inner: &Arc<PublisherInner>, event: StateUpdateEvent) {
    if !inner.client.is_connected() {
        return;
    }

    let (device, profile) = {
        let devices = inner.devices.read().unwrap();
        match devices.get(&event.device_id) {
            Some(entry) => (entry.device.clone(), entry.profile.clone()),
            None => return,
        }
    };
    let profile = match profile {
        Some(profile) => profile,
        None => return,
    };

    let mut values = event.values;
    // Idempotent with the poller-side derivation; repairs events that
    // predate a profile edit.
    derive_values(&mut values);

    let sources = learned_source_names(&values);
    if let Some((source_a, source_b)) = &sources {
        maybe_republish_source_selects(inner, &device, &profile, source_a, source_b).await;
    }

    let prefix = inner.client.topic_prefix();
    for mapping in &profile.oid_mappings {
        let value = values
            .get(&mapping.name)
            .or_else(|| values.get(normalize_oid(&mapping.oid)));
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => continue,
        };

        let payload = entity_payload(mapping, value, sources.as_ref());
        let entity_id = sanitize_entity_id(&mapping.name);
        let topic = format!("{}/{}/{}/state", prefix, event.device_id, entity_id);

        if let Err(e) = inner.client.publish(&topic, &payload, true).await {
            warn!(
                "Failed to publish state for {}/{}: {}",
                event.device_id, entity_id, e
            );
        }
    }

    // Aggregate device state, non-retained.
    let state = DeviceState {
        device_id: event.device_id.clone(),
        online: event.online,
        last_poll: event.timestamp,
        values,
        errors: Vec::new(),
    };
    let topic = format!("{}/{}/state", prefix, event.device_id);
    if let Err(e) = inner.client.publish_json(&topic, &state, false).await {
        warn!("Failed to publish full state for {}: {}", event.device_id, e);
    }
}

/// Both ATS source names, once the device has reported them.
fn learned_source_names(values: &HashMap<String, Value>) -> Option<(String, String)> {
    let source_a = values.get("Source A Name")?.to_string();
    let source_b = values.get("Source B Name")?.to_string();
    if source_a.is_empty() || source_b.is_empty() {
        return None;
    }
    Some((source_a, source_b))
}

/// Re-publish source-select discovery documents when the learned names
/// changed. Discovery documents are retained, so unchanged names need no
/// re-publish.
async fn maybe_republish_source_selects(
    inner: &Arc<PublisherInner>,
    device: &Device,
    profile: &Profile,
    source_a: &str,
    source_b: &str,
) {
    {
        let mut devices = inner.devices.write().unwrap();
        match devices.get_mut(&device.id) {
            Some(entry) => {
                let pair = (source_a.to_string(), source_b.to_string());
                if entry.published_sources.as_ref() == Some(&pair) {
                    return;
                }
                entry.published_sources = Some(pair);
            }
            None => return,
        }
    }

    for mapping in &profile.oid_mappings {
        if mapping.ha_component != HaComponent::Select {
            continue;
        }
        if !SOURCE_SELECT_NAMES.contains(&mapping.name.as_str()) {
            continue;
        }

        let options = vec![source_a.to_string(), source_b.to_string()];
        if let Err(e) = inner
            .discovery
            .update_select_options(device, profile, mapping, options)
            .await
        {
            warn!(
                "Failed to update select options for {}/{}: {}",
                device.id, mapping.name, e
            );
        }
    }
}

/// Coerce an accumulated value into the payload its component expects.
fn entity_payload(
    mapping: &OidMapping,
    value: &Value,
    sources: Option<&(String, String)>,
) -> String {
    match mapping.ha_component {
        HaComponent::BinarySensor => {
            binary_sensor_payload(value, mapping.device_class.as_deref()).to_string()
        }
        HaComponent::Switch => switch_payload(value).to_string(),
        HaComponent::Select if SOURCE_SELECT_NAMES.contains(&mapping.name.as_str()) => {
            source_select_payload(value, sources)
        }
        _ => value.to_string(),
    }
}

/// ON/OFF for a binary sensor, keyed on the device class: for `problem`
/// and `safety` a good state is OFF; for `power` a good state is ON; with
/// no device class good maps to OFF.
fn binary_sensor_payload(value: &Value, device_class: Option<&str>) -> &'static str {
    let good = GOOD_VALUES.contains(&value.to_string().to_lowercase().as_str());
    match device_class {
        Some("problem") | Some("safety") => {
            if good {
                "OFF"
            } else {
                "ON"
            }
        }
        Some("power") => {
            if good {
                "ON"
            } else {
                "OFF"
            }
        }
        _ => {
            if good {
                "OFF"
            } else {
                "ON"
            }
        }
    }
}

/// ON for `on`/`1`/`true` (case-insensitive), OFF otherwise.
fn switch_payload(value: &Value) -> &'static str {
    match value.to_string().to_lowercase().as_str() {
        "on" | "1" | "true" => "ON",
        _ => "OFF",
    }
}

/// Replace the generic `Source A`/`Source B` (or raw `1`/`2`) readings of
/// an ATS source select with the learned source names.
fn source_select_payload(value: &Value, sources: Option<&(String, String)>) -> String {
    let raw = value.to_string();
    if let Some((source_a, source_b)) = sources {
        if raw == "Source A" || raw == "1" {
            return source_a.clone();
        }
        if raw == "Source B" || raw == "2" {
            return source_b.clone();
        }
    }
    raw
}

async fn handle_command(
    inner: Arc<PublisherInner>,
    device_id: String,
    entity_id: String,
    payload: Vec<u8>,
) {
    let payload = String::from_utf8_lossy(&payload).trim().to_string();
    info!("Received command for {}/{}: {}", device_id, entity_id, payload);

    let (device, profile) = {
        let devices = inner.devices.read().unwrap();
        match devices.get(&device_id) {
            Some(entry) => (entry.device.clone(), entry.profile.clone()),
            None => {
                warn!("Command for unknown device {}", device_id);
                return;
            }
        }
    };
    let profile = match profile {
        Some(profile) => profile,
        None => {
            warn!("Device {} has no profile, dropping command", device_id);
            return;
        }
    };

    let mapping = profile
        .oid_mappings
        .iter()
        .find(|m| sanitize_entity_id(&m.name) == entity_id);
    let mapping = match mapping {
        Some(mapping) => mapping,
        None => {
            warn!("No mapping for entity {} on device {}", entity_id, device_id);
            return;
        }
    };
    if !mapping.writable {
        warn!("Mapping {} is not writable, dropping command", mapping.name);
        return;
    }

    let set_value = if mapping.kind == OidType::CompositeSwitch {
        match composite_set_value(&device, mapping, &payload).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to build composite value: {}", e);
                return;
            }
        }
    } else {
        match convert_payload(&payload, mapping) {
            Ok(value) => value,
            Err(e) => {
                info!("Dropping command for {}: {}", mapping.name, e);
                return;
            }
        }
    };

    let write_oid = mapping.write_oid();
    match send_set(&device, write_oid, &set_value).await {
        Ok(()) => {
            info!(
                "SNMP SET ok for {}/{}: {} -> {:?}",
                device_id, entity_id, payload, set_value
            );
            // Confirm the change immediately instead of waiting for the
            // next scheduled cycle.
            inner.poller.trigger_poll(&device_id);
        }
        Err(e) => warn!("SNMP SET failed for {}/{}: {}", device_id, entity_id, e),
    }
}

/// Convert an MQTT command payload to the SNMP value to write.
fn convert_payload(payload: &str, mapping: &OidMapping) -> Result<SetValue, String> {
    match mapping.ha_component {
        HaComponent::Switch => Ok(SetValue::Int(switch_command_value(mapping, payload))),
        HaComponent::Select => {
            if let Some(enum_values) = &mapping.enum_values {
                for (key, label) in enum_values {
                    if label.eq_ignore_ascii_case(payload) {
                        return Ok(SetValue::Int(*key as i32));
                    }
                }
            }
            Err(format!("unknown select value: {}", payload))
        }
        HaComponent::Number => payload
            .parse::<i32>()
            .map(SetValue::Int)
            .map_err(|_| format!("invalid number: {}", payload)),
        _ => Ok(SetValue::Str(payload.to_string())),
    }
}

/// The integer a switch command writes: the enum key labelled On/Off when
/// the mapping defines one, else the APC convention ON=1/OFF=2.
fn switch_command_value(mapping: &OidMapping, payload: &str) -> i32 {
    let on = payload.eq_ignore_ascii_case("ON");
    if let Some(enum_values) = &mapping.enum_values {
        for (key, label) in enum_values {
            if on && label.eq_ignore_ascii_case("On") {
                return *key as i32;
            }
            if !on && label.eq_ignore_ascii_case("Off") {
                return *key as i32;
            }
        }
    }
    if on {
        1
    } else {
        2
    }
}

/// The field value a composite switch command writes: the enum key
/// labelled On/Off when defined, else the Energenie convention ON=1/OFF=0.
fn composite_field_value(mapping: &OidMapping, payload: &str) -> String {
    let on = payload.eq_ignore_ascii_case("ON");
    if let Some(enum_values) = &mapping.enum_values {
        for (key, label) in enum_values {
            if on && label.eq_ignore_ascii_case("On") {
                return key.to_string();
            }
            if !on && label.eq_ignore_ascii_case("Off") {
                return key.to_string();
            }
        }
    }
    if on {
        "1".to_string()
    } else {
        "0".to_string()
    }
}

/// Replace one field of a separator-joined composite string.
fn splice_composite(
    current: &str,
    mapping: &OidMapping,
    field_value: &str,
) -> Result<String, String> {
    let separator = mapping.separator();
    let mut parts: Vec<&str> = current.split(separator).collect();
    if mapping.composite_index >= parts.len() {
        return Err(format!(
            "composite index {} out of range (len={})",
            mapping.composite_index,
            parts.len()
        ));
    }
    parts[mapping.composite_index] = field_value;
    Ok(parts.join(separator))
}

/// Read the current composite string from the device and splice the
/// commanded field in. There is a race window between the read and the
/// subsequent SET; it is accepted.
async fn composite_set_value(
    device: &Device,
    mapping: &OidMapping,
    payload: &str,
) -> Result<SetValue, String> {
    let field_value = composite_field_value(mapping, payload);

    let mut client = SnmpClient::connect(
        &device.ip_address,
        device.port,
        device.snmp_version,
        device.community.clone(),
    )
    .await
    .map_err(|e| format!("failed to connect: {}", e))?;

    let read_oid = mapping.oid.clone();
    let bindings = client
        .get(std::slice::from_ref(&read_oid))
        .await
        .map_err(|e| format!("failed to read current value: {}", e))?;

    let current = bindings
        .first()
        .map(|(_, value)| value.clone())
        .ok_or_else(|| format!("no result for OID {}", mapping.oid))?;
    let current = current
        .as_str()
        .ok_or_else(|| format!("current value is not a string: {:?}", current))?
        .to_string();

    splice_composite(&current, mapping, &field_value).map(SetValue::Str)
}

/// Issue the SET with the device's write community (falling back to the
/// read community).
async fn send_set(device: &Device, oid: &str, value: &SetValue) -> Result<(), String> {
    let mut client = SnmpClient::connect(
        &device.ip_address,
        device.port,
        device.snmp_version,
        device.write_credential().clone(),
    )
    .await
    .map_err(|e| format!("failed to connect: {}", e))?;

    client
        .set(oid, value)
        .await
        .map_err(|e| e.to_string())
}
