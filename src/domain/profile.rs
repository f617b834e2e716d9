use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Equipment category a profile targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Ups,
    Ats,
    Pdu,
}

/// Declared data type of an OID value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OidType {
    String,
    Integer,
    Gauge,
    Counter,
    Bool,
    Enum,
    /// A delimiter-joined vector of sub-values, one per controllable unit
    /// (e.g. per-outlet status reported as "1,0,1,-1").
    CompositeSwitch,
}

/// Home Assistant component an entity is discovered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaComponent {
    Sensor,
    BinarySensor,
    Switch,
    Button,
    Number,
    Select,
}

impl fmt::Display for HaComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HaComponent::Sensor => "sensor",
            HaComponent::BinarySensor => "binary_sensor",
            HaComponent::Switch => "switch",
            HaComponent::Button => "button",
            HaComponent::Number => "number",
            HaComponent::Select => "select",
        };
        write!(f, "{}", s)
    }
}

/// Polling cadence tag. `Frequent` mappings are polled every cycle,
/// `Static` ones every tenth cycle; unknown tags fall back to `Frequent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollGroup {
    Static,
    #[default]
    Frequent,
}

impl<'de> Deserialize<'de> for PollGroup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "static" => PollGroup::Static,
            _ => PollGroup::Frequent,
        })
    }
}

impl PollGroup {
    /// Cycle multiplier: a mapping is included when
    /// `poll_count % interval() == 0`.
    pub fn interval(&self) -> u64 {
        match self {
            PollGroup::Frequent => 1,
            PollGroup::Static => 10,
        }
    }
}

fn default_scale() -> f64 {
    0.0
}

/// How one OID (or one field of a composite OID value) becomes one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidMapping {
    pub oid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: OidType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Multiplier applied to numeric raw values; 0 means no scaling.
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub ha_component: HaComponent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<BTreeMap<i64, String>>,
    #[serde(default)]
    pub writable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_oid: Option<String>,
    #[serde(default)]
    pub poll_group: PollGroup,
    /// Home Assistant entity category (config, diagnostic).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 0-based index into the separator-joined composite value.
    #[serde(default)]
    pub composite_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_separator: Option<String>,
}

impl OidMapping {
    /// The OID targeted by SET operations.
    pub fn write_oid(&self) -> &str {
        match &self.write_oid {
            Some(oid) if !oid.is_empty() => oid,
            _ => &self.oid,
        }
    }

    pub fn separator(&self) -> &str {
        match &self.composite_separator {
            Some(s) if !s.is_empty() => s,
            _ => ",",
        }
    }

    pub fn enum_label(&self, key: i64) -> Option<&str> {
        self.enum_values
            .as_ref()
            .and_then(|m| m.get(&key))
            .map(String::as_str)
    }

    /// Structural invariants: a non-empty OID, enum mappings carry labels,
    /// writable mappings resolve to a settable OID.
    pub fn validate(&self) -> Result<(), String> {
        if self.oid.is_empty() {
            return Err(format!("mapping {:?} has an empty oid", self.name));
        }
        if self.kind == OidType::Enum
            && self.enum_values.as_ref().map_or(true, BTreeMap::is_empty)
        {
            return Err(format!("enum mapping {:?} has no enum_values", self.name));
        }
        if self.writable && self.write_oid().is_empty() {
            return Err(format!("writable mapping {:?} has no settable oid", self.name));
        }
        Ok(())
    }
}

/// A device profile: the ordered set of OID mappings for one equipment model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    pub category: DeviceCategory,
    /// sysObjectID used for profile auto-detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_object_id: Option<String>,
    pub oid_mappings: Vec<OidMapping>,
}

impl Profile {
    pub fn validate(&self) -> Result<(), String> {
        for mapping in &self.oid_mappings {
            mapping.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(name: &str, kind: OidType) -> OidMapping {
        OidMapping {
            oid: "1.3.6.1.2.1.33.1.2.1.0".into(),
            name: name.into(),
            description: None,
            kind,
            unit: None,
            scale: 0.0,
            ha_component: HaComponent::Sensor,
            device_class: None,
            state_class: None,
            icon: None,
            enum_values: None,
            writable: false,
            write_oid: None,
            poll_group: PollGroup::default(),
            category: None,
            composite_index: 0,
            composite_separator: None,
        }
    }

    #[test]
    fn test_poll_group_intervals() {
        assert_eq!(PollGroup::Frequent.interval(), 1);
        assert_eq!(PollGroup::Static.interval(), 10);
    }

    #[test]
    fn test_poll_group_deserializes_unknown_as_frequent() {
        let g: PollGroup = serde_json::from_str(r#""static""#).unwrap();
        assert_eq!(g, PollGroup::Static);
        let g: PollGroup = serde_json::from_str(r#""hourly""#).unwrap();
        assert_eq!(g, PollGroup::Frequent);
    }

    #[test]
    fn test_write_oid_falls_back() {
        let mut m = mapping("Outlet 1", OidType::Integer);
        assert_eq!(m.write_oid(), "1.3.6.1.2.1.33.1.2.1.0");
        m.write_oid = Some("1.3.6.1.4.1.318.1.1.4.4.2.1.3.1".into());
        assert_eq!(m.write_oid(), "1.3.6.1.4.1.318.1.1.4.4.2.1.3.1");
    }

    #[test]
    fn test_separator_default() {
        let mut m = mapping("Outlet 1", OidType::CompositeSwitch);
        assert_eq!(m.separator(), ",");
        m.composite_separator = Some(";".into());
        assert_eq!(m.separator(), ";");
    }

    #[test]
    fn test_validate_enum_requires_values() {
        let mut m = mapping("Battery Status", OidType::Enum);
        assert!(m.validate().is_err());
        m.enum_values = Some(BTreeMap::from([(1, "OK".into()), (2, "Low".into())]));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_oid() {
        let mut m = mapping("Broken", OidType::String);
        m.oid = String::new();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_profile_validate_surfaces_bad_mapping() {
        let mut bad = mapping("Battery Status", OidType::Enum);
        bad.enum_values = None;
        let profile = Profile {
            id: "p1".into(),
            name: "Test".into(),
            manufacturer: String::new(),
            model: String::new(),
            category: DeviceCategory::Ups,
            sys_object_id: None,
            oid_mappings: vec![mapping("OK", OidType::String), bad],
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_mapping_deserializes_with_defaults() {
        let json = r#"{
            "oid": ".1.3.6.1.2.1.33.1.2.4.0",
            "name": "Battery Status",
            "type": "enum",
            "ha_component": "sensor",
            "enum_values": {"1": "OK", "2": "Low"}
        }"#;
        let m: OidMapping = serde_json::from_str(json).unwrap();
        assert_eq!(m.kind, OidType::Enum);
        assert_eq!(m.scale, 0.0);
        assert_eq!(m.poll_group, PollGroup::Frequent);
        assert!(!m.writable);
        assert_eq!(m.enum_label(1), Some("OK"));
    }
}
