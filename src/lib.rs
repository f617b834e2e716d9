//! SNMP to MQTT bridge for managed power equipment (UPS, ATS, PDU).
//!
//! The bridge polls a fleet of SNMP devices, normalizes raw OID values
//! through per-model profiles, publishes state and Home Assistant discovery
//! documents to an MQTT broker, translates bus commands back into SNMP SET
//! operations, and receives/classifies/persists SNMP trap notifications.

pub mod config;
pub mod domain;
pub mod mqtt;
pub mod poller;
pub mod repository;
pub mod secret;
pub mod snmp;
pub mod trap_receiver;
