use chrono::{DateTime, Utc};
use serde::Serialize;

// One simulated telemetry sample
#[derive(Clone, Debug, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    // simulated seconds since the profile was set
    pub elapsed_secs: f64,
    pub sequence: u64,
    // bumped on every profile switch
    pub generation: u64,

    pub gpu_utilization: f64,
    pub memory_utilization: f64,
    pub encoder_utilization: f64,
    pub decoder_utilization: f64,

    pub memory_used_mb: f64,
    pub memory_free_mb: f64,
    pub memory_total_mb: f64,

    pub gpu_clock_mhz: u32,
    pub memory_clock_mhz: u32,

    pub temperature_core: f64,
    pub temperature_memory: f64,
    pub temperature_hotspot: f64,

    pub power_draw_watts: f64,
    pub power_limit_watts: f64,

    pub fan_speed_percent: f64,
}

impl TelemetrySnapshot {
    pub fn memory_used_percent(&self) -> f64 {
        if self.memory_total_mb > 0.0 {
            self.memory_used_mb / self.memory_total_mb * 100.0
        } else {
            0.0
        }
    }

    pub fn power_percent(&self) -> f64 {
        if self.power_limit_watts > 0.0 {
            self.power_draw_watts / self.power_limit_watts * 100.0
        } else {
            0.0
        }
    }
}

// Static adapter facts shown next to the live metrics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GpuInfo {
    pub name: String,
    pub manufacturer: String,
    pub pnp_device_id: String,
    pub architecture: String,
    pub pcie_gen: u32,
    pub pcie_width: u32,
    pub driver_version: String,
    pub vbios_version: String,
}
