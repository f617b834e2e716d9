//! Persistence contracts consumed by the bridge core, plus the SQLite
//! implementation used by the binary. The HTTP/UI surface talks to the same
//! traits.

mod sqlite;

pub use sqlite::{
    SqliteDeviceRepository, SqliteProfileRepository, SqliteSettingRepository, SqliteStore,
    SqliteTrapLogRepository,
};

use crate::domain::{Device, Profile, Setting, TrapFilter, TrapLog};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid record: {0}")]
    Invalid(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

pub trait DeviceRepository: Send + Sync {
    fn create(&self, device: &Device) -> RepositoryResult<()>;
    fn get_by_id(&self, id: &str) -> RepositoryResult<Device>;
    fn get_all(&self) -> RepositoryResult<Vec<Device>>;
    fn get_enabled(&self) -> RepositoryResult<Vec<Device>>;
    fn update(&self, device: &Device) -> RepositoryResult<()>;
    fn delete(&self, id: &str) -> RepositoryResult<()>;
    fn update_last_seen(&self, id: &str) -> RepositoryResult<()>;
}

pub trait ProfileRepository: Send + Sync {
    fn get_by_id(&self, id: &str) -> RepositoryResult<Profile>;
    fn get_all(&self) -> RepositoryResult<Vec<Profile>>;
    fn upsert(&self, profile: &Profile) -> RepositoryResult<()>;
    fn get_by_sys_object_id(&self, sys_oid: &str) -> RepositoryResult<Option<Profile>>;
}

pub trait TrapLogRepository: Send + Sync {
    fn create(&self, trap: &TrapLog) -> RepositoryResult<()>;
    fn get_all(&self, filter: &TrapFilter) -> RepositoryResult<Vec<TrapLog>>;
    fn delete_older_than(&self, days: u32) -> RepositoryResult<usize>;
}

pub trait SettingRepository: Send + Sync {
    fn get(&self, key: &str) -> RepositoryResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> RepositoryResult<()>;
    fn delete(&self, key: &str) -> RepositoryResult<()>;
    fn get_all(&self) -> RepositoryResult<Vec<Setting>>;
}
