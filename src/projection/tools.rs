// Export records in the shape third-party diagnostic tools present.

use super::{arch, bios_version, device_id_string, field, or_fallback, pci_ids};
use crate::profile::{FieldMap, GpuProfile};

fn vendor_name(vendor_hex: &str) -> &'static str {
    match vendor_hex {
        "10DE" => "NVIDIA",
        "1002" => "AMD",
        "8086" => "Intel",
        "1414" => "Microsoft",
        _ => "Unknown",
    }
}

fn current_resolution(profile: &GpuProfile) -> String {
    profile
        .display_modes
        .first()
        .map(|m| format!("{} x {} @ {} Hz", m.width, m.height, m.refresh_hz))
        .unwrap_or_else(|| "1920 x 1080 @ 60 Hz".to_string())
}

// Speccy "Graphics" section.
pub fn speccy(profile: &GpuProfile) -> FieldMap {
    let mut d = FieldMap::new();
    field(&mut d, "Manufacturer", profile.manufacturer.as_str());
    field(&mut d, "Model", profile.name.as_str());
    field(&mut d, "Device ID", device_id_string(profile));
    field(&mut d, "Revision", "A1");
    field(&mut d, "Driver Version", profile.driver_version.as_str());
    field(&mut d, "Driver Date", profile.driver_date.as_str());
    field(&mut d, "Memory", format!("{} MB", profile.vram_mb));
    field(&mut d, "Memory Type", profile.vram_type.as_str());
    field(&mut d, "Bus Width", format!("{}-bit", profile.memory_bus_width));
    field(&mut d, "Current Resolution", current_resolution(profile));
    field(&mut d, "DAC Type", profile.dac_type.as_str());
    d
}

// HWiNFO "Video Adapter" summary.
pub fn hwinfo(profile: &GpuProfile) -> FieldMap {
    let mut d = FieldMap::new();
    field(&mut d, "GPU", profile.name.as_str());
    field(
        &mut d,
        "GPU Codename",
        profile
            .registry_text("HardwareInformation.ChipType")
            .unwrap_or("Unknown"),
    );
    field(&mut d, "Vendor", profile.manufacturer.as_str());
    field(&mut d, "Subvendor", profile.manufacturer.as_str());
    field(&mut d, "Device ID", device_id_string(profile));
    field(&mut d, "VRAM Size", format!("{} MB", profile.vram_mb));
    field(&mut d, "VRAM Type", profile.vram_type.as_str());
    field(&mut d, "VRAM Bus Width", format!("{} bit", profile.memory_bus_width));
    field(&mut d, "GPU Clock (Base)", format!("{} MHz", profile.base_clock_mhz));
    field(&mut d, "GPU Clock (Boost)", format!("{} MHz", profile.boost_clock_mhz));
    field(&mut d, "Memory Clock", format!("{} MHz", profile.memory_clock_mhz));
    field(&mut d, "Shader Units", profile.compute.count());
    field(&mut d, "TDP", format!("{} W", profile.tdp_watts));
    field(&mut d, "Driver Version", profile.driver_version.as_str());
    field(&mut d, "BIOS Version", bios_version(profile));
    d
}

// GPU-Z "Graphics Card" tab.
pub fn gpuz(profile: &GpuProfile) -> FieldMap {
    let ids = pci_ids(profile);
    let vendor = vendor_name(&ids.vendor);
    let shaders = profile.compute.count();
    let bandwidth_gbs =
        f64::from(profile.memory_clock_mhz) * f64::from(profile.memory_bus_width) / 8.0 / 1000.0;
    let process = arch::generation_for(profile.vendor(), &profile.name)
        .map(|g| g.process)
        .unwrap_or("Unknown");

    let mut d = FieldMap::new();
    field(&mut d, "name", profile.name.as_str());
    field(
        &mut d,
        "GPU",
        or_fallback(&profile.video_processor, &profile.name),
    );
    field(&mut d, "vendor", vendor);
    field(&mut d, "subvendor", vendor);
    field(&mut d, "device_id", format!("{}-{}", ids.vendor, ids.device));
    field(&mut d, "revision", "A1");
    field(&mut d, "process", process);
    field(&mut d, "BIOS", bios_version(profile));
    field(&mut d, "driver_version", profile.driver_version.as_str());
    field(&mut d, "driver_date", profile.driver_date.as_str());
    field(&mut d, "digital_signature", "WHQL");
    field(&mut d, "memory_type", profile.vram_type.as_str());
    field(&mut d, "memory_size", format!("{} MB", profile.vram_mb));
    field(&mut d, "memory_bus_width", format!("{} bit", profile.memory_bus_width));
    field(&mut d, "memory_bandwidth", format!("{bandwidth_gbs:.0} GB/s"));
    field(&mut d, "gpu_clock", format!("{} MHz", profile.base_clock_mhz));
    field(&mut d, "boost_clock", format!("{} MHz", profile.boost_clock_mhz));
    field(&mut d, "memory_clock", format!("{} MHz", profile.memory_clock_mhz));
    field(&mut d, "shaders", shaders);
    field(&mut d, "tmus", shaders / 32);
    field(&mut d, "rops", if profile.vram_mb >= 16384 { 128u32 } else { 64 });
    field(&mut d, "tdp", format!("{} W", profile.tdp_watts));
    field(
        &mut d,
        "power_connectors",
        if profile.tdp_watts > 300 { "16-pin" } else { "8-pin" },
    );
    field(&mut d, "directx", profile.feature_text("directx", "12"));
    field(&mut d, "opengl", profile.feature_text("opengl", "4.6"));
    field(&mut d, "vulkan", profile.feature_text("vulkan", "1.3"));
    field(&mut d, "opencl", "3.0");
    field(&mut d, "cuda", profile.feature_flag("cuda", profile.is_nvidia()));
    field(&mut d, "ray_tracing", profile.feature_flag("ray_tracing", false));
    d
}

// DxDiag "Display Devices" record.
pub fn dxdiag(profile: &GpuProfile) -> FieldMap {
    let ids = pci_ids(profile);
    let memory = format!("{} MB", profile.vram_mb);

    let mut d = FieldMap::new();
    field(&mut d, "szDescription", profile.name.as_str());
    field(&mut d, "szManufacturer", vendor_name(&ids.vendor));
    field(&mut d, "szChipType", profile.feature_text("chip_type", "Unknown"));
    field(&mut d, "szDACType", profile.dac_type.as_str());
    field(&mut d, "szDeviceType", "Full Device");
    field(
        &mut d,
        "szDeviceKey",
        format!("Enum\\PCI\\VEN_{}&DEV_{}", ids.vendor, ids.device),
    );
    field(&mut d, "szDisplayMemoryLocalized", memory.as_str());
    field(&mut d, "szDisplayMemoryEnglish", memory);
    field(&mut d, "szDriverVersion", profile.driver_version.as_str());
    field(&mut d, "szDriverDateLocalized", profile.driver_date.as_str());
    field(&mut d, "szVendorId", format!("0x{}", ids.vendor));
    field(&mut d, "szDeviceId", format!("0x{}", ids.device));
    field(&mut d, "szSubSysId", "0x00000000");
    field(&mut d, "szRevisionId", "0x00A1");
    field(&mut d, "b3DAPIsAvail", true);
    field(&mut d, "bAGPEnabled", false);
    field(&mut d, "bAGPExistenceValid", true);
    field(&mut d, "bDDPoweredUp", true);
    d
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// Saved-DxDiag XML document for tools that parse exported reports.
pub fn dxdiag_xml(profile: &GpuProfile) -> String {
    let info = dxdiag(profile);
    let get = |key: &str| {
        info.get(key)
            .map(|v| xml_escape(&v.to_string()))
            .unwrap_or_default()
    };

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<DxDiag>\n");
    out.push_str("  <SystemInfo>\n");
    out.push_str("    <Time>12:00:00</Time>\n");
    out.push_str("    <MachineName>GPU-SIM</MachineName>\n");
    out.push_str("    <OperatingSystem>Windows 11 Pro 64-bit</OperatingSystem>\n");
    out.push_str("  </SystemInfo>\n");
    out.push_str("  <DisplayDevices>\n");
    out.push_str("    <DisplayDevice>\n");
    let rows = [
        ("CardName", get("szDescription")),
        ("Manufacturer", get("szManufacturer")),
        ("ChipType", get("szChipType")),
        ("DACType", get("szDACType")),
        ("DeviceType", get("szDeviceType")),
        ("DisplayMemory", get("szDisplayMemoryEnglish")),
        ("DedicatedMemory", format!("{} MB", profile.vram_mb)),
        ("SharedMemory", "0 MB".to_string()),
        ("DriverVersion", get("szDriverVersion")),
        ("DriverDate", get("szDriverDateLocalized")),
        ("VendorID", get("szVendorId")),
        ("DeviceID", get("szDeviceId")),
        (
            "FeatureLevels",
            "12_1,12_0,11_1,11_0,10_1,10_0,9_3,9_2,9_1".to_string(),
        ),
        ("DirectXDriverVersion", "12".to_string()),
    ];
    for (tag, value) in rows {
        out.push_str(&format!("      <{tag}>{value}</{tag}>\n"));
    }
    out.push_str("    </DisplayDevice>\n");
    out.push_str("  </DisplayDevices>\n");
    out.push_str("</DxDiag>\n");
    out
}
