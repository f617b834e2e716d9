//! Profile-driven value transformation: composite-field extraction, scaling,
//! enum lookup, and derived-value computation.

use crate::domain::{OidMapping, OidType, Value};
use log::debug;
use std::collections::HashMap;

/// Strip exactly one leading dot for consistent OID comparison.
pub fn normalize_oid(oid: &str) -> &str {
    oid.strip_prefix('.').unwrap_or(oid)
}

/// Apply a mapping's transformation to a decoded raw value.
pub fn transform(value: &Value, mapping: &OidMapping) -> Value {
    if mapping.kind == OidType::CompositeSwitch {
        return extract_composite(value, mapping);
    }

    if mapping.scale != 0.0 {
        // Some devices report numbers as octet strings; those scale too.
        if let Some(numeric) = value.as_f64() {
            let scaled = numeric * mapping.scale;
            let decimals = if mapping.scale < 0.01 { 3 } else { 2 };
            return Value::Float(round_to(scaled, decimals));
        }
    }

    if mapping.kind == OidType::Enum {
        if let Value::Int(raw) = value {
            if let Some(label) = mapping.enum_label(*raw) {
                return Value::Str(label.to_string());
            }
        }
    }

    value.clone()
}

/// Extract the value at `composite_index` from a separator-joined string
/// (e.g. per-outlet status reported as "1,0,1,-1").
fn extract_composite(value: &Value, mapping: &OidMapping) -> Value {
    let raw = match value.as_str() {
        Some(s) => s,
        None => return value.clone(),
    };

    let parts: Vec<&str> = raw.split(mapping.separator()).collect();
    if mapping.composite_index >= parts.len() {
        debug!(
            "Composite index {} out of range for value {:?} (len={})",
            mapping.composite_index,
            raw,
            parts.len()
        );
        return Value::Null;
    }

    let part = parts[mapping.composite_index].trim();
    if let Ok(int_value) = part.parse::<i64>() {
        if let Some(label) = mapping.enum_label(int_value) {
            return Value::Str(label.to_string());
        }
        return Value::Int(int_value);
    }

    Value::Str(part.to_string())
}

/// Fill in values derivable from other measurements. PDUs that omit power
/// but report voltage and current get `Active Power = V * I`.
pub fn derive_values(values: &mut HashMap<String, Value>) {
    let active_power = values
        .get("Active Power")
        .map(Value::numeric_or_zero)
        .unwrap_or(0.0);
    if active_power != 0.0 {
        return;
    }

    let voltage = values.get("Voltage").map(Value::numeric_or_zero).unwrap_or(0.0);
    let current = values
        .get("Total Current")
        .map(Value::numeric_or_zero)
        .unwrap_or(0.0);

    if voltage > 0.0 && current > 0.0 {
        values.insert(
            "Active Power".to_string(),
            Value::Float(round_to(voltage * current, 1)),
        );
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
