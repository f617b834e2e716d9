use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{info, warn, LevelFilter, Metadata, Record};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use snmp_mqtt_bridge::config::{Config, LoggingConfig};
use snmp_mqtt_bridge::mqtt::{Discovery, MqttClient, Publisher};
use snmp_mqtt_bridge::poller::PollerService;
use snmp_mqtt_bridge::repository::{
    DeviceRepository, SqliteDeviceRepository, SqliteProfileRepository, SqliteStore,
    SqliteTrapLogRepository,
};
use snmp_mqtt_bridge::trap_receiver::TrapReceiver;

/// Overall deadline for the shutdown sequence.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Minimal logger that writes to stderr with timestamps, in plain text or
/// JSON lines depending on configuration.
struct BridgeLogger {
    level: LevelFilter,
    json: bool,
}

impl log::Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if self.json {
            let line = serde_json::json!({
                "ts": Local::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            eprintln!("{}", line);
        } else {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            eprintln!("[{}] [{}] {}", timestamp, record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger(cfg: &LoggingConfig) {
    let level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .or_else(|| cfg.level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let logger = BridgeLogger {
        level,
        json: cfg.format.eq_ignore_ascii_case("json"),
    };
    log::set_boxed_logger(Box::new(logger))
        .map(|()| log::set_max_level(level))
        .ok();
}

#[derive(Parser)]
#[command(name = "snmp-mqtt-bridge")]
#[command(about = "SNMP to MQTT bridge for UPS/ATS/PDU power equipment", long_about = None)]
struct Args {
    /// Path to config.yaml (default: /data, ., ./config)
    #[arg(long, env = "SNMP_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = Config::load(args.config.as_deref())?;
    init_logger(&cfg.logging);

    info!("Starting SNMP-MQTT bridge");

    if cfg.database.driver != "sqlite" {
        warn!(
            "Database driver {:?} is not shipped in this build, using sqlite",
            cfg.database.driver
        );
    }
    if let Some(parent) = std::path::Path::new(&cfg.database.dsn).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let store = SqliteStore::open(&cfg.database.dsn)
        .with_context(|| format!("failed to open database {}", cfg.database.dsn))?;
    let device_repo = Arc::new(SqliteDeviceRepository::new(&store));
    let profile_repo = Arc::new(SqliteProfileRepository::new(&store));
    let trap_repo = Arc::new(SqliteTrapLogRepository::new(&store));

    let shutdown = CancellationToken::new();

    let poller = PollerService::new(
        device_repo.clone(),
        profile_repo.clone(),
        Duration::from_secs(cfg.snmp.poll_interval_seconds),
    );

    // Broker unavailability is not fatal: the event loop keeps retrying and
    // publishes fail until it appears.
    let mqtt = MqttClient::new();
    if let Err(e) = mqtt.connect(&cfg.mqtt).await {
        warn!("MQTT broker not reachable yet: {}", e);
    }

    let discovery = Discovery::new(
        mqtt.clone(),
        cfg.mqtt.discovery_prefix.clone(),
        cfg.mqtt.topic_prefix.clone(),
    );
    let publisher = Publisher::new(
        mqtt.clone(),
        discovery,
        poller.clone(),
        profile_repo.clone(),
        shutdown.clone(),
    );

    poller.start().context("failed to start poller")?;
    publisher.start();

    match device_repo.get_enabled() {
        Ok(devices) => {
            for device in devices {
                publisher.register_device(device).await;
            }
        }
        Err(e) => warn!("Failed to register devices with MQTT publisher: {}", e),
    }

    let trap_receiver = Arc::new(TrapReceiver::new(
        cfg.snmp.trap_port,
        device_repo.clone(),
        trap_repo.clone(),
    ));
    {
        let mqtt = mqtt.clone();
        let trap_topic = format!("{}/traps", cfg.mqtt.topic_prefix);
        trap_receiver.on_trap(Arc::new(move |trap| {
            if !mqtt.is_connected() {
                return;
            }
            let mqtt = mqtt.clone();
            let topic = trap_topic.clone();
            let trap = trap.clone();
            tokio::spawn(async move {
                if let Err(e) = mqtt.publish_json(&topic, &trap, false).await {
                    warn!("Failed to publish trap to MQTT: {}", e);
                }
            });
        }));
    }
    tokio::spawn(trap_receiver.run(shutdown.clone()));

    wait_for_signal().await;
    info!("Shutting down");

    shutdown.cancel();
    let sequence = async {
        poller.stop().await;
        mqtt.disconnect().await;
    };
    match tokio::time::timeout(SHUTDOWN_DEADLINE, sequence).await {
        Ok(()) => info!("Shutdown complete"),
        Err(_) => warn!("Shutdown deadline of {:?} exceeded", SHUTDOWN_DEADLINE),
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
