use super::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity assigned to a received trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrapSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for TrapSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrapSeverity::Info => "info",
            TrapSeverity::Warning => "warning",
            TrapSeverity::Error => "error",
            TrapSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A received SNMP trap, correlated to a device where the source IP matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapLog {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub source_ip: String,
    pub trap_oid: String,
    pub variables: BTreeMap<String, Value>,
    pub severity: TrapSeverity,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

/// Filter options for querying stored trap logs.
#[derive(Debug, Clone, Default)]
pub struct TrapFilter {
    pub device_id: Option<String>,
    pub severity: Option<TrapSeverity>,
    pub limit: usize,
    pub offset: usize,
}
