//! Home Assistant MQTT discovery documents.
//!
//! One retained config document per profile mapping, published under
//! `<discoveryPrefix>/<component>/<deviceId>/<entityId>/config`. An empty
//! retained payload removes the entity.

use super::client::{MqttClient, MqttResult};
use crate::domain::{Device, HaComponent, OidMapping, Profile};
use serde::Serialize;
use std::collections::BTreeMap;

/// Discovery payload. Optional fields are omitted from the JSON entirely.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryConfig {
    pub name: String,
    pub unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_not_available: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DiscoveryDevice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// Device block shared by all of a device's entities.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub via_device: String,
}

/// Derive a stable entity id from a mapping's display name: lowercase,
/// runs of space/dash/dot become a single underscore, anything else
/// outside `[a-z0-9_]` is dropped. Idempotent.
pub fn sanitize_entity_id(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.to_lowercase().chars() {
        if matches!(c, ' ' | '-' | '.') {
            if !pending_separator {
                result.push('_');
                pending_separator = true;
            }
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            result.push(c);
            pending_separator = false;
        }
    }

    result
}

pub fn unique_id(device_id: &str, entity_id: &str) -> String {
    format!("snmp_bridge_{}_{}", device_id, entity_id)
}

/// Select options in order of integer key (1, 2, 3, ...), with any
/// remaining labels appended afterwards.
pub fn select_options(enum_values: &BTreeMap<i64, String>) -> Vec<String> {
    let mut options = Vec::with_capacity(enum_values.len());
    for key in 1..=enum_values.len() as i64 {
        if let Some(label) = enum_values.get(&key) {
            options.push(label.clone());
        }
    }
    for label in enum_values.values() {
        if !options.contains(label) {
            options.push(label.clone());
        }
    }
    options
}

/// Build the discovery document for one mapping of one device.
pub fn build_entity_config(
    device: &Device,
    profile: &Profile,
    mapping: &OidMapping,
    topic_prefix: &str,
) -> DiscoveryConfig {
    let entity_id = sanitize_entity_id(&mapping.name);

    let mut config = DiscoveryConfig {
        // Device labels override the mapping's display name.
        name: device
            .label_for(&mapping.name)
            .unwrap_or(&mapping.name)
            .to_string(),
        unique_id: unique_id(&device.id, &entity_id),
        object_id: Some(entity_id.clone()),
        state_topic: Some(format!("{}/{}/{}/state", topic_prefix, device.id, entity_id)),
        availability_topic: Some(format!("{}/bridge/status", topic_prefix)),
        payload_available: Some("online".to_string()),
        payload_not_available: Some("offline".to_string()),
        device: Some(DiscoveryDevice {
            identifiers: vec![format!("snmp_bridge_{}", device.id)],
            name: device.name.clone(),
            manufacturer: profile.manufacturer.clone(),
            model: profile.model.clone(),
            via_device: "snmp_mqtt_bridge".to_string(),
        }),
        device_class: mapping.device_class.clone(),
        state_class: mapping.state_class.clone(),
        unit_of_measurement: mapping.unit.clone(),
        icon: mapping.icon.clone(),
        entity_category: mapping.category.clone(),
        ..DiscoveryConfig::default()
    };

    if mapping.writable {
        config.command_topic = Some(format!(
            "{}/{}/{}/set",
            topic_prefix, device.id, entity_id
        ));
    }

    match mapping.ha_component {
        HaComponent::BinarySensor | HaComponent::Switch => {
            config.payload_on = Some("ON".to_string());
            config.payload_off = Some("OFF".to_string());
        }
        HaComponent::Select => {
            if let Some(enum_values) = &mapping.enum_values {
                config.options = Some(select_options(enum_values));
            }
        }
        HaComponent::Number => {
            config.min = Some(0.0);
            config.max = Some(100.0);
            config.step = Some(1.0);
        }
        _ => {}
    }

    config
}

/// Publishes and withdraws discovery documents.
#[derive(Clone)]
pub struct Discovery {
    client: MqttClient,
    discovery_prefix: String,
    topic_prefix: String,
}

impl Discovery {
    pub fn new(
        client: MqttClient,
        discovery_prefix: impl Into<String>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            discovery_prefix: discovery_prefix.into(),
            topic_prefix: topic_prefix.into(),
        }
    }

    fn config_topic(&self, component: HaComponent, device_id: &str, entity_id: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.discovery_prefix, component, device_id, entity_id
        )
    }

    /// Publish retained discovery documents for every entity of a device.
    pub async fn publish_device(&self, device: &Device, profile: &Profile) -> MqttResult<()> {
        for mapping in &profile.oid_mappings {
            let config = build_entity_config(device, profile, mapping, &self.topic_prefix);
            let entity_id = sanitize_entity_id(&mapping.name);
            let topic = self.config_topic(mapping.ha_component, &device.id, &entity_id);
            self.client.publish_json(&topic, &config, true).await?;
        }
        Ok(())
    }

    /// Re-publish a select entity's document with replacement options
    /// (learned ATS source names).
    pub async fn update_select_options(
        &self,
        device: &Device,
        profile: &Profile,
        mapping: &OidMapping,
        options: Vec<String>,
    ) -> MqttResult<()> {
        let mut config = build_entity_config(device, profile, mapping, &self.topic_prefix);
        config.options = Some(options);

        let entity_id = sanitize_entity_id(&mapping.name);
        let topic = self.config_topic(mapping.ha_component, &device.id, &entity_id);
        self.client.publish_json(&topic, &config, true).await
    }

    /// Withdraw all discovery documents for a device by publishing empty
    /// retained payloads.
    pub async fn remove_device(&self, device_id: &str, profile: &Profile) -> MqttResult<()> {
        for mapping in &profile.oid_mappings {
            let entity_id = sanitize_entity_id(&mapping.name);
            let topic = self.config_topic(mapping.ha_component, device_id, &entity_id);
            self.client.publish(&topic, "", true).await?;
        }
        Ok(())
    }
}
