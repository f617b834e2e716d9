//! SQLite-backed repositories for device configuration, profiles, trap
//! history, and settings. All repositories share one connection behind a
//! mutex; statements are short and the schema is created idempotently on
//! open.

use super::{
    DeviceRepository, ProfileRepository, RepositoryError, RepositoryResult, SettingRepository,
    TrapLogRepository,
};
use crate::domain::{
    Device, Profile, Setting, SnmpVersion, TrapFilter, TrapLog, TrapSeverity,
};
use crate::secret::SecretString;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared SQLite handle. Cheap to clone into the per-domain repositories.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> RepositoryResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests and ephemeral runs.
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> RepositoryResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 161,
                community TEXT NOT NULL,
                write_community TEXT,
                snmp_version TEXT NOT NULL,
                profile_id TEXT,
                poll_interval INTEGER NOT NULL DEFAULT 0,
                enabled INTEGER NOT NULL DEFAULT 1,
                labels TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_seen TEXT
            );
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                manufacturer TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                sys_object_id TEXT,
                oid_mappings TEXT NOT NULL DEFAULT '[]'
            );
            CREATE TABLE IF NOT EXISTS trap_logs (
                id TEXT PRIMARY KEY,
                device_id TEXT,
                source_ip TEXT NOT NULL,
                trap_oid TEXT NOT NULL,
                variables TEXT NOT NULL DEFAULT '{}',
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                received_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trap_logs_device ON trap_logs(device_id);
            CREATE INDEX IF NOT EXISTS idx_trap_logs_received ON trap_logs(received_at);
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn parse_timestamp(text: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Invalid(format!("bad timestamp {:?}: {}", text, e)))
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<(Device, String, Option<String>, String)> {
    let labels_json: String = row.get("labels")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_seen: Option<String> = row.get("last_seen")?;
    let version: String = row.get("snmp_version")?;
    let community: String = row.get("community")?;
    let write_community: Option<String> = row.get("write_community")?;

    let device = Device {
        id: row.get("id")?,
        name: row.get("name")?,
        ip_address: row.get("ip_address")?,
        port: row.get::<_, i64>("port")? as u16,
        community: SecretString::new(community),
        write_community: write_community.map(SecretString::new),
        snmp_version: version.parse().unwrap_or(SnmpVersion::V2c),
        profile_id: row.get("profile_id")?,
        poll_interval: row.get::<_, i64>("poll_interval")? as u32,
        enabled: row.get::<_, i64>("enabled")? != 0,
        labels: serde_json::from_str(&labels_json).unwrap_or_default(),
        created_at: Utc::now(), // patched below from the text columns
        updated_at: Utc::now(),
        last_seen: None,
    };

    Ok((device, created_at, last_seen, updated_at))
}

fn finish_device(
    (mut device, created_at, last_seen, updated_at): (Device, String, Option<String>, String),
) -> RepositoryResult<Device> {
    device.created_at = parse_timestamp(&created_at)?;
    device.updated_at = parse_timestamp(&updated_at)?;
    device.last_seen = match last_seen {
        Some(text) => Some(parse_timestamp(&text)?),
        None => None,
    };
    Ok(device)
}

#[derive(Clone)]
pub struct SqliteDeviceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeviceRepository {
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            conn: store.conn.clone(),
        }
    }

    fn query_devices(&self, sql: &str) -> RepositoryResult<Vec<Device>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], device_from_row)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(finish_device(row?)?);
        }
        Ok(devices)
    }
}

impl DeviceRepository for SqliteDeviceRepository {
    fn create(&self, device: &Device) -> RepositoryResult<()> {
        let labels = serde_json::to_string(&device.labels)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO devices (id, name, ip_address, port, community, write_community,
                snmp_version, profile_id, poll_interval, enabled, labels, created_at, updated_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                device.id,
                device.name,
                device.ip_address,
                device.port,
                device.community.expose(),
                device.write_community.as_ref().map(|c| c.expose().to_string()),
                device.snmp_version.to_string(),
                device.profile_id,
                device.poll_interval,
                device.enabled,
                labels,
                device.created_at.to_rfc3339(),
                device.updated_at.to_rfc3339(),
                device.last_seen.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> RepositoryResult<Device> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM devices WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], device_from_row)?;

        match rows.next() {
            Some(row) => finish_device(row?),
            None => Err(RepositoryError::NotFound(format!("device {}", id))),
        }
    }

    fn get_all(&self) -> RepositoryResult<Vec<Device>> {
        self.query_devices("SELECT * FROM devices ORDER BY name")
    }

    fn get_enabled(&self) -> RepositoryResult<Vec<Device>> {
        self.query_devices("SELECT * FROM devices WHERE enabled = 1 ORDER BY name")
    }

    fn update(&self, device: &Device) -> RepositoryResult<()> {
        let labels = serde_json::to_string(&device.labels)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE devices SET name = ?2, ip_address = ?3, port = ?4, community = ?5,
                write_community = ?6, snmp_version = ?7, profile_id = ?8, poll_interval = ?9,
                enabled = ?10, labels = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                device.id,
                device.name,
                device.ip_address,
                device.port,
                device.community.expose(),
                device.write_community.as_ref().map(|c| c.expose().to_string()),
                device.snmp_version.to_string(),
                device.profile_id,
                device.poll_interval,
                device.enabled,
                labels,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if changed == 0 {
            return Err(RepositoryError::NotFound(format!("device {}", device.id)));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> RepositoryResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn update_last_seen(&self, id: &str) -> RepositoryResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE devices SET last_seen = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SqliteProfileRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProfileRepository {
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            conn: store.conn.clone(),
        }
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<(Profile, String, String)> {
    let category: String = row.get("category")?;
    let mappings_json: String = row.get("oid_mappings")?;

    let profile = Profile {
        id: row.get("id")?,
        name: row.get("name")?,
        manufacturer: row.get("manufacturer")?,
        model: row.get("model")?,
        category: crate::domain::DeviceCategory::Ups, // patched below
        sys_object_id: row.get("sys_object_id")?,
        oid_mappings: Vec::new(),
    };

    Ok((profile, category, mappings_json))
}

fn finish_profile(
    (mut profile, category, mappings_json): (Profile, String, String),
) -> RepositoryResult<Profile> {
    profile.category = serde_json::from_value(serde_json::Value::String(category.clone()))
        .map_err(|_| RepositoryError::Invalid(format!("unknown category {:?}", category)))?;
    profile.oid_mappings = serde_json::from_str(&mappings_json)?;
    Ok(profile)
}

impl ProfileRepository for SqliteProfileRepository {
    fn get_by_id(&self, id: &str) -> RepositoryResult<Profile> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM profiles WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], profile_from_row)?;

        match rows.next() {
            Some(row) => finish_profile(row?),
            None => Err(RepositoryError::NotFound(format!("profile {}", id))),
        }
    }

    fn get_all(&self) -> RepositoryResult<Vec<Profile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM profiles ORDER BY name")?;
        let rows = stmt.query_map([], profile_from_row)?;

        let mut profiles = Vec::new();
        for row in rows {
            profiles.push(finish_profile(row?)?);
        }
        Ok(profiles)
    }

    fn upsert(&self, profile: &Profile) -> RepositoryResult<()> {
        profile
            .validate()
            .map_err(RepositoryError::Invalid)?;

        let category = serde_json::to_value(profile.category)?
            .as_str()
            .unwrap_or("ups")
            .to_string();
        let mappings = serde_json::to_string(&profile.oid_mappings)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO profiles (id, name, manufacturer, model, category, sys_object_id, oid_mappings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                manufacturer = excluded.manufacturer,
                model = excluded.model,
                category = excluded.category,
                sys_object_id = excluded.sys_object_id,
                oid_mappings = excluded.oid_mappings",
            params![
                profile.id,
                profile.name,
                profile.manufacturer,
                profile.model,
                category,
                profile.sys_object_id,
                mappings,
            ],
        )?;
        Ok(())
    }

    fn get_by_sys_object_id(&self, sys_oid: &str) -> RepositoryResult<Option<Profile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM profiles WHERE sys_object_id = ?1")?;
        let mut rows = stmt.query_map(params![sys_oid], profile_from_row)?;

        match rows.next() {
            Some(row) => Ok(Some(finish_profile(row?)?)),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct SqliteTrapLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTrapLogRepository {
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            conn: store.conn.clone(),
        }
    }
}

fn trap_from_row(row: &Row<'_>) -> rusqlite::Result<(TrapLog, String, String, String)> {
    let variables_json: String = row.get("variables")?;
    let severity: String = row.get("severity")?;
    let received_at: String = row.get("received_at")?;

    let trap = TrapLog {
        id: row.get("id")?,
        device_id: row.get("device_id")?,
        source_ip: row.get("source_ip")?,
        trap_oid: row.get("trap_oid")?,
        variables: Default::default(),
        severity: TrapSeverity::Info, // patched below
        message: row.get("message")?,
        received_at: Utc::now(),
    };

    Ok((trap, variables_json, severity, received_at))
}

fn finish_trap(
    (mut trap, variables_json, severity, received_at): (TrapLog, String, String, String),
) -> RepositoryResult<TrapLog> {
    trap.variables = serde_json::from_str(&variables_json)?;
    trap.severity = serde_json::from_value(serde_json::Value::String(severity.clone()))
        .map_err(|_| RepositoryError::Invalid(format!("unknown severity {:?}", severity)))?;
    trap.received_at = parse_timestamp(&received_at)?;
    Ok(trap)
}

impl TrapLogRepository for SqliteTrapLogRepository {
    fn create(&self, trap: &TrapLog) -> RepositoryResult<()> {
        let variables = serde_json::to_string(&trap.variables)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trap_logs (id, device_id, source_ip, trap_oid, variables, severity, message, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trap.id,
                trap.device_id,
                trap.source_ip,
                trap.trap_oid,
                variables,
                trap.severity.to_string(),
                trap.message,
                trap.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_all(&self, filter: &TrapFilter) -> RepositoryResult<Vec<TrapLog>> {
        let mut sql = String::from("SELECT * FROM trap_logs WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(device_id) = &filter.device_id {
            sql.push_str(" AND device_id = ?");
            args.push(Box::new(device_id.clone()));
        }
        if let Some(severity) = filter.severity {
            sql.push_str(" AND severity = ?");
            args.push(Box::new(severity.to_string()));
        }

        sql.push_str(" ORDER BY received_at DESC LIMIT ? OFFSET ?");
        let limit: i64 = if filter.limit == 0 { -1 } else { filter.limit as i64 };
        args.push(Box::new(limit));
        args.push(Box::new(filter.offset as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt.query_map(params.as_slice(), trap_from_row)?;

        let mut traps = Vec::new();
        for row in rows {
            traps.push(finish_trap(row?)?);
        }
        Ok(traps)
    }

    fn delete_older_than(&self, days: u32) -> RepositoryResult<usize> {
        let cutoff = (Utc::now() - Duration::days(days as i64)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM trap_logs WHERE received_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

#[derive(Clone)]
pub struct SqliteSettingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSettingRepository {
    pub fn new(store: &SqliteStore) -> Self {
        Self {
            conn: store.conn.clone(),
        }
    }
}

impl SettingRepository for SqliteSettingRepository {
    fn get(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> RepositoryResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_all(&self) -> RepositoryResult<Vec<Setting>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok(Setting {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut settings = Vec::new();
        for row in rows {
            settings.push(row?);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceCategory, HaComponent, OidMapping, OidType, PollGroup, Value};
    use std::collections::{BTreeMap, HashMap};

    fn device(id: &str) -> Device {
        Device {
            id: id.into(),
            name: format!("Device {}", id),
            ip_address: "10.0.0.7".into(),
            port: 161,
            community: SecretString::new("public"),
            write_community: Some(SecretString::new("private")),
            snmp_version: SnmpVersion::V2c,
            profile_id: Some("apc-ups".into()),
            poll_interval: 30,
            enabled: true,
            labels: HashMap::from([("Outlet 1 State".to_string(), "Server".to_string())]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_seen: None,
        }
    }

    fn profile(id: &str) -> Profile {
        Profile {
            id: id.into(),
            name: "APC Smart-UPS".into(),
            manufacturer: "APC".into(),
            model: "SMT1500".into(),
            category: DeviceCategory::Ups,
            sys_object_id: Some("1.3.6.1.4.1.318.1.3.27".into()),
            oid_mappings: vec![OidMapping {
                oid: ".1.3.6.1.2.1.33.1.2.1.0".into(),
                name: "Battery Voltage".into(),
                description: None,
                kind: OidType::Integer,
                unit: Some("V".into()),
                scale: 0.1,
                ha_component: HaComponent::Sensor,
                device_class: Some("voltage".into()),
                state_class: Some("measurement".into()),
                icon: None,
                enum_values: None,
                writable: false,
                write_oid: None,
                poll_group: PollGroup::Frequent,
                category: None,
                composite_index: 0,
                composite_separator: None,
            }],
        }
    }

    fn trap(id: &str, severity: TrapSeverity) -> TrapLog {
        TrapLog {
            id: id.into(),
            device_id: Some("dev-1".into()),
            source_ip: "10.0.0.7".into(),
            trap_oid: ".1.3.6.1.4.1.318.2.3.1".into(),
            variables: BTreeMap::from([("1.3.6.1.2.1.1.3.0".to_string(), Value::Int(42))]),
            severity,
            message: "UPS on battery power".into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_device_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteDeviceRepository::new(&store);

        repo.create(&device("dev-1")).unwrap();
        let loaded = repo.get_by_id("dev-1").unwrap();

        assert_eq!(loaded.name, "Device dev-1");
        assert_eq!(loaded.community.expose(), "public");
        assert_eq!(loaded.write_community.unwrap().expose(), "private");
        assert_eq!(loaded.snmp_version, SnmpVersion::V2c);
        assert_eq!(loaded.poll_interval, 30);
        assert_eq!(loaded.labels["Outlet 1 State"], "Server");
        assert!(loaded.last_seen.is_none());
    }

    #[test]
    fn test_get_enabled_filters_disabled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteDeviceRepository::new(&store);

        let mut disabled = device("dev-2");
        disabled.enabled = false;
        repo.create(&device("dev-1")).unwrap();
        repo.create(&disabled).unwrap();

        assert_eq!(repo.get_all().unwrap().len(), 2);
        let enabled = repo.get_enabled().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "dev-1");
    }

    #[test]
    fn test_update_last_seen() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteDeviceRepository::new(&store);

        repo.create(&device("dev-1")).unwrap();
        repo.update_last_seen("dev-1").unwrap();

        let loaded = repo.get_by_id("dev-1").unwrap();
        assert!(loaded.last_seen.is_some());
    }

    #[test]
    fn test_update_missing_device_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteDeviceRepository::new(&store);
        let err = repo.update(&device("ghost")).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn test_profile_upsert_and_fetch() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteProfileRepository::new(&store);

        repo.upsert(&profile("apc-ups")).unwrap();
        let loaded = repo.get_by_id("apc-ups").unwrap();
        assert_eq!(loaded.category, DeviceCategory::Ups);
        assert_eq!(loaded.oid_mappings.len(), 1);
        assert_eq!(loaded.oid_mappings[0].scale, 0.1);

        // Upsert replaces the mapping list
        let mut updated = profile("apc-ups");
        updated.oid_mappings.clear();
        repo.upsert(&updated).unwrap();
        assert!(repo.get_by_id("apc-ups").unwrap().oid_mappings.is_empty());
    }

    #[test]
    fn test_profile_lookup_by_sys_object_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteProfileRepository::new(&store);
        repo.upsert(&profile("apc-ups")).unwrap();

        let found = repo.get_by_sys_object_id("1.3.6.1.4.1.318.1.3.27").unwrap();
        assert_eq!(found.unwrap().id, "apc-ups");
        assert!(repo.get_by_sys_object_id("1.2.3").unwrap().is_none());
    }

    #[test]
    fn test_profile_upsert_rejects_invalid_mapping() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteProfileRepository::new(&store);

        let mut bad = profile("bad");
        bad.oid_mappings[0].oid = String::new();
        assert!(matches!(
            repo.upsert(&bad).unwrap_err(),
            RepositoryError::Invalid(_)
        ));
    }

    #[test]
    fn test_trap_roundtrip_and_filter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteTrapLogRepository::new(&store);

        repo.create(&trap("t-1", TrapSeverity::Critical)).unwrap();
        repo.create(&trap("t-2", TrapSeverity::Info)).unwrap();

        let all = repo.get_all(&TrapFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].variables["1.3.6.1.2.1.1.3.0"], Value::Int(42));

        let critical = repo
            .get_all(&TrapFilter {
                severity: Some(TrapSeverity::Critical),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].id, "t-1");
    }

    #[test]
    fn test_trap_retention() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteTrapLogRepository::new(&store);

        let mut old = trap("t-old", TrapSeverity::Info);
        old.received_at = Utc::now() - Duration::days(45);
        repo.create(&old).unwrap();
        repo.create(&trap("t-new", TrapSeverity::Info)).unwrap();

        let deleted = repo.delete_older_than(30).unwrap();
        assert_eq!(deleted, 1);
        let remaining = repo.get_all(&TrapFilter::default()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "t-new");
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = SqliteSettingRepository::new(&store);

        assert!(repo.get("mqtt.broker").unwrap().is_none());
        repo.set("mqtt.broker", "localhost").unwrap();
        repo.set("mqtt.broker", "broker.lan").unwrap();
        assert_eq!(repo.get("mqtt.broker").unwrap().unwrap(), "broker.lan");

        repo.set("mqtt.port", "1883").unwrap();
        assert_eq!(repo.get_all().unwrap().len(), 2);

        repo.delete("mqtt.broker").unwrap();
        assert!(repo.get("mqtt.broker").unwrap().is_none());
    }
}
