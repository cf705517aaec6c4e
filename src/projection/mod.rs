pub mod arch;
mod tools;

pub use arch::{generation_for, Generation};
pub use tools::{dxdiag, dxdiag_xml, gpuz, hwinfo, speccy};

use crate::data::GpuInfo;
use crate::profile::{FieldMap, FieldValue, GpuProfile, RegistryEntry};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_VENDOR_ID: &str = "10DE";
pub const PLACEHOLDER_DEVICE_ID: &str = "0000";

const DEFAULT_MODE: (u32, u32, u32) = (1920, 1080, 60);

// Vendor/device pair as upper-case hex strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciIds {
    pub vendor: String,
    pub device: String,
}

// Resolves the profile's PCI ids. A `"VENDOR-DEVICE"` device id carries its
// own vendor, which takes precedence over `pci_vendor_id`.
pub fn pci_ids(profile: &GpuProfile) -> PciIds {
    let mut vendor = non_empty(&profile.pci_vendor_id).unwrap_or(DEFAULT_VENDOR_ID).to_string();
    let mut device = non_empty(&profile.pci_device_id)
        .unwrap_or(PLACEHOLDER_DEVICE_ID)
        .to_string();

    if let Some((v, d)) = device.clone().split_once('-') {
        if !v.is_empty() && !d.is_empty() && !d.contains('-') {
            vendor = v.to_string();
            device = d.to_string();
        }
    }

    PciIds {
        vendor: vendor.to_ascii_uppercase(),
        device: device.to_ascii_uppercase(),
    }
}

pub fn pnp_device_id(profile: &GpuProfile) -> String {
    if let Some(pnp) = profile.hardware_ids.get("pnp_id") {
        return pnp.clone();
    }
    let ids = pci_ids(profile);
    format!(
        "PCI\\VEN_{}&DEV_{}&SUBSYS_00000000&REV_A1",
        ids.vendor, ids.device
    )
}

// `0x10DE / 0x2684` style id used by the diagnostic exports.
pub fn device_id_string(profile: &GpuProfile) -> String {
    let ids = pci_ids(profile);
    format!("0x{} / 0x{}", ids.vendor, ids.device)
}

fn matching_device_id(profile: &GpuProfile) -> String {
    let ids = pci_ids(profile);
    format!("pci\\ven_{}&dev_{}", ids.vendor, ids.device).to_ascii_lowercase()
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn or_fallback<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    non_empty(value).unwrap_or(fallback)
}

fn bios_version(profile: &GpuProfile) -> String {
    profile
        .registry_text("HardwareInformation.BiosString")
        .unwrap_or("Unknown")
        .to_string()
}

fn merge(mut defaults: FieldMap, overrides: Option<&FieldMap>) -> FieldMap {
    if let Some(overrides) = overrides {
        defaults.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    defaults
}

fn field(map: &mut FieldMap, key: &str, value: impl Into<FieldValue>) {
    map.insert(key.to_string(), value.into());
}

// Values for the adapter's subkey under the display class key.
// The profile's own `registry_entries` are kept verbatim; standard values are
// only added when the profile does not already carry them.
pub fn registry_entries(profile: &GpuProfile) -> BTreeMap<String, RegistryEntry> {
    let mut entries = profile.registry_entries.clone();
    let vram = RegistryEntry::from(profile.vram_bytes());

    let defaults: [(&str, RegistryEntry); 10] = [
        ("DriverDesc", profile.name.as_str().into()),
        ("ProviderName", profile.manufacturer.as_str().into()),
        ("DriverVersion", profile.driver_version.as_str().into()),
        ("DriverDate", profile.driver_date.as_str().into()),
        ("MatchingDeviceId", matching_device_id(profile).into()),
        ("HardwareInformation.AdapterString", profile.name.as_str().into()),
        (
            "HardwareInformation.ChipType",
            or_fallback(&profile.video_processor, &profile.name).into(),
        ),
        ("HardwareInformation.DacType", profile.dac_type.as_str().into()),
        ("HardwareInformation.MemorySize", vram.clone()),
        ("HardwareInformation.qwMemorySize", vram),
    ];
    for (key, value) in defaults {
        entries.entry(key.to_string()).or_insert(value);
    }
    entries
}

// `Win32_VideoController` record.
pub fn wmi_video_controller(profile: &GpuProfile) -> FieldMap {
    let (width, height, refresh) = profile
        .max_resolution()
        .map(|m| (m.width, m.height, m.refresh_hz))
        .unwrap_or(DEFAULT_MODE);
    let max_refresh = profile
        .display_modes
        .iter()
        .map(|m| m.refresh_hz)
        .max()
        .unwrap_or(refresh);

    let mut d = FieldMap::new();
    field(&mut d, "Name", profile.name.as_str());
    field(&mut d, "Description", profile.device_description.as_str());
    field(
        &mut d,
        "VideoProcessor",
        or_fallback(&profile.video_processor, &profile.name),
    );
    field(&mut d, "AdapterRAM", profile.vram_bytes());
    field(&mut d, "AdapterDACType", profile.dac_type.as_str());
    field(&mut d, "DriverVersion", profile.driver_version.as_str());
    field(&mut d, "DriverDate", profile.driver_date.as_str());
    field(
        &mut d,
        "AdapterCompatibility",
        or_fallback(&profile.adapter_compatibility, &profile.manufacturer),
    );
    field(
        &mut d,
        "VideoModeDescription",
        format!("{width} x {height} x 4294967296 colors"),
    );
    field(&mut d, "CurrentHorizontalResolution", width);
    field(&mut d, "CurrentVerticalResolution", height);
    field(&mut d, "CurrentRefreshRate", refresh);
    field(&mut d, "MaxRefreshRate", max_refresh);
    field(&mut d, "Status", "OK");
    field(&mut d, "PNPDeviceID", pnp_device_id(profile));
    field(&mut d, "DeviceID", "VideoController1");

    merge(d, profile.wmi_data.as_ref())
}

// NVAPI shim record. Empty for anything but an NVIDIA profile.
pub fn nvapi(profile: &GpuProfile) -> FieldMap {
    if !profile.is_nvidia() {
        return FieldMap::new();
    }
    let generation = arch::nvidia_generation(&profile.name);

    let mut d = FieldMap::new();
    field(&mut d, "gpu_name", profile.name.as_str());
    field(&mut d, "gpu_type", "DISCRETE");
    field(&mut d, "architecture", generation.name);
    field(&mut d, "bus_type", generation.bus_type());
    field(&mut d, "vram_size_kb", u64::from(profile.vram_mb) * 1024);
    field(&mut d, "vram_type", profile.vram_type.as_str());
    field(&mut d, "vram_bus_width", profile.memory_bus_width);
    field(&mut d, "cuda_cores", profile.compute.cuda_cores());
    field(&mut d, "base_clock_khz", u64::from(profile.base_clock_mhz) * 1000);
    field(&mut d, "boost_clock_khz", u64::from(profile.boost_clock_mhz) * 1000);
    field(&mut d, "memory_clock_khz", u64::from(profile.memory_clock_mhz) * 1000);
    field(&mut d, "tdp_watts", profile.tdp_watts);
    field(&mut d, "thermal_limit_c", generation.thermal_limit_c);
    field(&mut d, "power_limit_percent", 100u32);
    field(&mut d, "driver_version", profile.driver_version.as_str());
    field(&mut d, "bios_version", bios_version(profile));
    field(&mut d, "ray_tracing", profile.feature_flag("ray_tracing", false));
    field(&mut d, "dlss", profile.feature_flag("dlss", false));
    field(&mut d, "nvenc", profile.feature_flag("nvenc", true));

    merge(d, profile.nvapi_data.as_ref())
}

// AMD Display Library shim record. Empty for anything but an AMD profile.
pub fn adl(profile: &GpuProfile) -> FieldMap {
    if !profile.is_amd() {
        return FieldMap::new();
    }
    let generation = arch::amd_generation(&profile.name);

    let mut d = FieldMap::new();
    field(&mut d, "adapter_name", profile.name.as_str());
    field(&mut d, "adapter_type", "DISCRETE");
    field(&mut d, "architecture", generation.name);
    field(&mut d, "bus_type", generation.bus_type());
    field(&mut d, "memory_size_mb", profile.vram_mb);
    field(&mut d, "memory_type", profile.vram_type.as_str());
    field(&mut d, "memory_bus_width", profile.memory_bus_width);
    field(&mut d, "stream_processors", profile.compute.stream_processors());
    field(&mut d, "core_clock_mhz", profile.base_clock_mhz);
    field(&mut d, "boost_clock_mhz", profile.boost_clock_mhz);
    field(&mut d, "memory_clock_mhz", profile.memory_clock_mhz);
    field(&mut d, "tdp_watts", profile.tdp_watts);
    field(&mut d, "driver_version", profile.driver_version.as_str());
    field(&mut d, "bios_version", bios_version(profile));
    field(&mut d, "ray_tracing", profile.feature_flag("ray_tracing", false));
    field(&mut d, "fsr", profile.feature_flag("fsr", true));

    merge(d, profile.adl_data.as_ref())
}

pub fn static_info(profile: &GpuProfile) -> GpuInfo {
    let generation = generation_for(profile.vendor(), &profile.name);
    GpuInfo {
        name: profile.name.clone(),
        manufacturer: profile.manufacturer.clone(),
        pnp_device_id: pnp_device_id(profile),
        architecture: generation.map(|g| g.name).unwrap_or("Unknown").to_string(),
        pcie_gen: generation.map_or(4, |g| u32::from(g.pcie_gen)),
        pcie_width: 16,
        driver_version: profile.driver_version.clone(),
        vbios_version: bios_version(profile),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BypassState {
    Active,
    Partial,
    Unavailable,
}

impl BypassState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassState::Active => "active",
            BypassState::Partial => "partial",
            BypassState::Unavailable => "unavailable",
        }
    }
}

// How far a detection surface is covered for the current profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassStatus {
    pub method: &'static str,
    pub state: BypassState,
    pub description: &'static str,
}

pub fn bypass_status(profile: Option<&GpuProfile>) -> Vec<BypassStatus> {
    use BypassState::*;

    let any = profile.is_some();
    let nvidia = profile.is_some_and(GpuProfile::is_nvidia);
    let amd = profile.is_some_and(GpuProfile::is_amd);
    let pick = |cond: bool, on: BypassState| if cond { on } else { Unavailable };

    vec![
        BypassStatus {
            method: "Registry",
            state: pick(any, Active),
            description: "Display adapter registry keys",
        },
        BypassStatus {
            method: "WMI",
            state: pick(any, Active),
            description: "Win32_VideoController class",
        },
        BypassStatus {
            method: "NVAPI",
            state: pick(nvidia, Partial),
            description: "NVIDIA API (registry shims only)",
        },
        BypassStatus {
            method: "ADL",
            state: pick(amd, Partial),
            description: "AMD Display Library (registry shims only)",
        },
        BypassStatus {
            method: "DirectX DXGI",
            state: pick(any, Partial),
            description: "DXGI adapter enumeration",
        },
        BypassStatus {
            method: "Direct PCI",
            state: Unavailable,
            description: "Requires kernel driver",
        },
    ]
}
