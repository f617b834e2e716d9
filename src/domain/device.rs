use super::Value;
use crate::secret::SecretString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// SNMP protocol version. v3 is supported in the noAuthNoPriv security
/// level only; the community string doubles as the v3 user name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2c")]
    V2c,
    #[serde(rename = "v3")]
    V3,
}

impl SnmpVersion {
    /// The version number carried on the wire.
    pub fn wire_value(&self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
            SnmpVersion::V3 => 3,
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "v1"),
            SnmpVersion::V2c => write!(f, "v2c"),
            SnmpVersion::V3 => write!(f, "v3"),
        }
    }
}

impl FromStr for SnmpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" | "1" => Ok(SnmpVersion::V1),
            "v2c" | "2c" | "v2" => Ok(SnmpVersion::V2c),
            "v3" | "3" => Ok(SnmpVersion::V3),
            other => Err(format!("unknown SNMP version: {}", other)),
        }
    }
}

/// A configured SNMP device. Owned by the configuration store; the poller
/// works from an immutable snapshot that is replaced on update.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub ip_address: String,
    pub port: u16,
    pub community: SecretString,
    /// Community used for SET operations; falls back to `community`.
    pub write_community: Option<SecretString>,
    pub snmp_version: SnmpVersion,
    pub profile_id: Option<String>,
    /// Poll interval in seconds; 0 selects the configured default.
    pub poll_interval: u32,
    pub enabled: bool,
    /// Display-name overrides keyed by mapping name (e.g. outlet labels).
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// The credential to use for SET operations.
    pub fn write_credential(&self) -> &SecretString {
        self.write_community.as_ref().unwrap_or(&self.community)
    }

    pub fn label_for(&self, mapping_name: &str) -> Option<&str> {
        self.labels.get(mapping_name).map(String::as_str)
    }
}

/// Accumulated runtime state of a device. Successive polls overwrite keys
/// but never clear the map; keys are both mapping names and normalized OIDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceState {
    pub device_id: String,
    pub online: bool,
    pub last_poll: DateTime<Utc>,
    pub values: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl DeviceState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            online: false,
            last_poll: Utc::now(),
            values: HashMap::new(),
            errors: Vec::new(),
        }
    }
}
