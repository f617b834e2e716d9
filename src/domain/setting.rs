use serde::{Deserialize, Serialize};

/// A persisted key/value setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}
