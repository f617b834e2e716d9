mod service;
mod transform;

pub use service::{PollerService, StateUpdateEvent};
pub use transform::{derive_values, normalize_oid, transform};
