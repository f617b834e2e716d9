mod client;
mod discovery;
mod publisher;

pub use client::{CommandHandler, MessageHandler, MqttClient, MqttError, MqttResult};
pub use discovery::{
    build_entity_config, sanitize_entity_id, select_options, unique_id, Discovery,
    DiscoveryConfig, DiscoveryDevice,
};
pub use publisher::Publisher;
