pub mod config;
pub mod data;
pub mod monitor;
pub mod paths;
pub mod profile;
pub mod projection;
pub mod registry;
pub mod store;
pub mod telemetry;

pub use config::Settings;
pub use data::{GpuInfo, TelemetrySnapshot};
pub use profile::{ComputeUnits, DisplayMode, FieldValue, GpuProfile, RegistryEntry, Vendor};
pub use registry::{ApplyOutcome, ApplyReport, GpuRegistry, RegistryError};
pub use store::{ProfileStore, StoreError};
pub use telemetry::{SubscriberId, TelemetrySimulator};
