mod device;
mod profile;
mod setting;
mod trap;
mod value;

pub use device::{Device, DeviceState, SnmpVersion};
pub use profile::{DeviceCategory, HaComponent, OidMapping, OidType, PollGroup, Profile};
pub use setting::Setting;
pub use trap::{TrapFilter, TrapLog, TrapSeverity};
pub use value::Value;
