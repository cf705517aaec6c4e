use serde::{ser, Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// Open map of per-surface overrides (`wmi_data`, `nvapi_data`, `adl_data`)
// and of projected surface records.
pub type FieldMap = BTreeMap<String, FieldValue>;

// A tagged scalar used by feature flags, surface overrides and projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    #[serde(serialize_with = "finite_float")]
    Float(f64),
    Text(String),
}

// JSON has no NaN or infinity.
fn finite_float<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if v.is_finite() {
        serializer.serialize_f64(*v)
    } else {
        Err(ser::Error::custom(format_args!("non-finite float {v}")))
    }
}

impl FieldValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryEntry {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl RegistryEntry {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegistryEntry::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for RegistryEntry {
    fn from(v: &str) -> Self {
        RegistryEntry::Text(v.to_string())
    }
}

impl From<String> for RegistryEntry {
    fn from(v: String) -> Self {
        RegistryEntry::Text(v)
    }
}

impl From<i64> for RegistryEntry {
    fn from(v: i64) -> Self {
        RegistryEntry::Int(v)
    }
}

impl From<u64> for RegistryEntry {
    fn from(v: u64) -> Self {
        RegistryEntry::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<Vec<u8>> for RegistryEntry {
    fn from(v: Vec<u8>) -> Self {
        RegistryEntry::Bytes(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    #[serde(rename = "refresh")]
    pub refresh_hz: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_hz,
        }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} @ {}Hz", self.width, self.height, self.refresh_hz)
    }
}

// Shader count of the profile, tagged with the vendor terminology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeUnits {
    CudaCores(u32),
    StreamProcessors(u32),
    Unknown,
}

impl ComputeUnits {
    // Counts as a document carries them. A non-zero count wins, CUDA cores
    // first; a lone zero keeps its tag.
    pub fn from_counts(cuda_cores: Option<u32>, stream_processors: Option<u32>) -> Self {
        match (cuda_cores, stream_processors) {
            (Some(n), _) if n > 0 => ComputeUnits::CudaCores(n),
            (_, Some(n)) if n > 0 => ComputeUnits::StreamProcessors(n),
            (Some(n), None) => ComputeUnits::CudaCores(n),
            (None, Some(n)) => ComputeUnits::StreamProcessors(n),
            _ => ComputeUnits::Unknown,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            ComputeUnits::CudaCores(n) | ComputeUnits::StreamProcessors(n) => *n,
            ComputeUnits::Unknown => 0,
        }
    }

    pub fn cuda_cores(&self) -> u32 {
        match self {
            ComputeUnits::CudaCores(n) => *n,
            _ => 0,
        }
    }

    pub fn stream_processors(&self) -> u32 {
        match self {
            ComputeUnits::StreamProcessors(n) => *n,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Nvidia,
    Amd,
    Unknown,
}

impl Vendor {
    pub fn from_manufacturer(manufacturer: &str) -> Self {
        let upper = manufacturer.to_ascii_uppercase();
        if upper.contains("NVIDIA") {
            return Vendor::Nvidia;
        }
        // "ATI" only as a whole word: "CORPORATION" would match otherwise.
        let ati_word = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == "ATI");
        if upper.contains("AMD") || upper.contains("ADVANCED MICRO DEVICES") || ati_word {
            return Vendor::Amd;
        }
        Vendor::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileDocument", into = "ProfileDocument")]
pub struct GpuProfile {
    pub id: String,
    pub name: String,
    pub manufacturer: String,

    pub driver_version: String,
    pub driver_date: String,

    pub vram_mb: u32,
    pub vram_type: String,
    pub memory_bus_width: u32,

    pub base_clock_mhz: u32,
    pub boost_clock_mhz: u32,
    pub memory_clock_mhz: u32,

    pub tdp_watts: u32,

    pub compute: ComputeUnits,

    pub pci_vendor_id: String,
    pub pci_device_id: String,
    pub subsystem_id: String,

    pub device_description: String,
    pub video_processor: String,
    pub dac_type: String,
    pub adapter_compatibility: String,

    pub display_modes: Vec<DisplayMode>,
    pub features: FieldMap,

    pub registry_entries: BTreeMap<String, RegistryEntry>,
    pub hardware_ids: BTreeMap<String, String>,
    pub wmi_data: Option<FieldMap>,
    pub nvapi_data: Option<FieldMap>,
    pub adl_data: Option<FieldMap>,
}

impl GpuProfile {
    // Profile with the document defaults for every field but the identity.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        manufacturer: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            device_description: name.clone(),
            name,
            manufacturer: manufacturer.into(),
            driver_version: default_driver_version(),
            driver_date: String::new(),
            vram_mb: 0,
            vram_type: default_vram_type(),
            memory_bus_width: default_bus_width(),
            base_clock_mhz: 0,
            boost_clock_mhz: 0,
            memory_clock_mhz: 0,
            tdp_watts: 0,
            compute: ComputeUnits::Unknown,
            pci_vendor_id: String::new(),
            pci_device_id: String::new(),
            subsystem_id: String::new(),
            video_processor: String::new(),
            dac_type: default_dac_type(),
            adapter_compatibility: String::new(),
            display_modes: Vec::new(),
            features: FieldMap::new(),
            registry_entries: BTreeMap::new(),
            hardware_ids: BTreeMap::new(),
            wmi_data: None,
            nvapi_data: None,
            adl_data: None,
        }
    }

    // Copy of this profile stored under another id.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    pub fn vram_bytes(&self) -> u64 {
        u64::from(self.vram_mb) * 1024 * 1024
    }

    pub fn vram_gb(&self) -> f64 {
        f64::from(self.vram_mb) / 1024.0
    }

    pub fn compute_units(&self) -> ComputeUnits {
        self.compute
    }

    pub fn vendor(&self) -> Vendor {
        Vendor::from_manufacturer(&self.manufacturer)
    }

    pub fn is_nvidia(&self) -> bool {
        self.vendor() == Vendor::Nvidia
    }

    pub fn is_amd(&self) -> bool {
        self.vendor() == Vendor::Amd
    }

    // The mode with the most pixels; the first one listed wins a tie.
    pub fn max_resolution(&self) -> Option<DisplayMode> {
        self.display_modes
            .iter()
            .copied()
            .fold(None, |best: Option<DisplayMode>, mode| match best {
                Some(b) if b.pixels() >= mode.pixels() => Some(b),
                _ => Some(mode),
            })
    }

    pub fn feature(&self, key: &str) -> Option<&FieldValue> {
        self.features.get(key)
    }

    pub fn feature_flag(&self, key: &str, default: bool) -> bool {
        self.feature(key).and_then(FieldValue::as_bool).unwrap_or(default)
    }

    pub fn feature_text(&self, key: &str, default: &str) -> String {
        self.feature(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn registry_text(&self, key: &str) -> Option<&str> {
        self.registry_entries.get(key).and_then(RegistryEntry::as_str)
    }

    // Fails on a NaN or infinite float field.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(ProfileDocument::from(self.clone()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl fmt::Display for GpuProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.0}GB)", self.name, self.vram_gb())
    }
}

fn default_manufacturer() -> String {
    "Unknown".to_string()
}

fn default_driver_version() -> String {
    "1.0.0".to_string()
}

fn default_vram_type() -> String {
    "GDDR5".to_string()
}

fn default_bus_width() -> u32 {
    256
}

fn default_dac_type() -> String {
    "Integrated RAMDAC".to_string()
}

// On-disk shape of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileDocument {
    id: String,
    name: String,
    #[serde(default = "default_manufacturer")]
    manufacturer: String,
    #[serde(default = "default_driver_version")]
    driver_version: String,
    #[serde(default)]
    driver_date: String,
    #[serde(default)]
    vram_mb: u32,
    #[serde(default = "default_vram_type")]
    vram_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cuda_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream_processors: Option<u32>,
    #[serde(default)]
    base_clock_mhz: u32,
    #[serde(default)]
    boost_clock_mhz: u32,
    #[serde(default)]
    memory_clock_mhz: u32,
    #[serde(default = "default_bus_width")]
    memory_bus_width: u32,
    #[serde(default)]
    tdp_watts: u32,
    #[serde(default)]
    pci_device_id: String,
    #[serde(default)]
    pci_vendor_id: String,
    #[serde(default)]
    subsystem_id: String,
    #[serde(default)]
    device_description: Option<String>,
    #[serde(default)]
    video_processor: String,
    #[serde(default = "default_dac_type")]
    dac_type: String,
    #[serde(default)]
    adapter_compatibility: String,
    #[serde(default)]
    registry_entries: BTreeMap<String, RegistryEntry>,
    #[serde(default)]
    display_modes: Vec<DisplayMode>,
    #[serde(default)]
    features: FieldMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    hardware_ids: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wmi_data: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nvapi_data: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adl_data: Option<FieldMap>,
}

impl TryFrom<ProfileDocument> for GpuProfile {
    type Error = String;

    fn try_from(doc: ProfileDocument) -> Result<Self, Self::Error> {
        if doc.id.trim().is_empty() {
            return Err("profile `id` must not be empty".to_string());
        }
        if doc.name.trim().is_empty() {
            return Err("profile `name` must not be empty".to_string());
        }
        Ok(GpuProfile {
            device_description: doc.device_description.unwrap_or_else(|| doc.name.clone()),
            id: doc.id,
            name: doc.name,
            manufacturer: doc.manufacturer,
            driver_version: doc.driver_version,
            driver_date: doc.driver_date,
            vram_mb: doc.vram_mb,
            vram_type: doc.vram_type,
            memory_bus_width: doc.memory_bus_width,
            base_clock_mhz: doc.base_clock_mhz,
            boost_clock_mhz: doc.boost_clock_mhz,
            memory_clock_mhz: doc.memory_clock_mhz,
            tdp_watts: doc.tdp_watts,
            compute: ComputeUnits::from_counts(doc.cuda_cores, doc.stream_processors),
            pci_vendor_id: doc.pci_vendor_id,
            pci_device_id: doc.pci_device_id,
            subsystem_id: doc.subsystem_id,
            video_processor: doc.video_processor,
            dac_type: doc.dac_type,
            adapter_compatibility: doc.adapter_compatibility,
            display_modes: doc.display_modes,
            features: doc.features,
            registry_entries: doc.registry_entries,
            hardware_ids: doc.hardware_ids,
            wmi_data: doc.wmi_data,
            nvapi_data: doc.nvapi_data,
            adl_data: doc.adl_data,
        })
    }
}

impl From<GpuProfile> for ProfileDocument {
    fn from(p: GpuProfile) -> Self {
        ProfileDocument {
            cuda_cores: match p.compute {
                ComputeUnits::CudaCores(n) => Some(n),
                _ => None,
            },
            stream_processors: match p.compute {
                ComputeUnits::StreamProcessors(n) => Some(n),
                _ => None,
            },
            id: p.id,
            name: p.name,
            manufacturer: p.manufacturer,
            driver_version: p.driver_version,
            driver_date: p.driver_date,
            vram_mb: p.vram_mb,
            vram_type: p.vram_type,
            base_clock_mhz: p.base_clock_mhz,
            boost_clock_mhz: p.boost_clock_mhz,
            memory_clock_mhz: p.memory_clock_mhz,
            memory_bus_width: p.memory_bus_width,
            tdp_watts: p.tdp_watts,
            pci_device_id: p.pci_device_id,
            pci_vendor_id: p.pci_vendor_id,
            subsystem_id: p.subsystem_id,
            device_description: Some(p.device_description),
            video_processor: p.video_processor,
            dac_type: p.dac_type,
            adapter_compatibility: p.adapter_compatibility,
            registry_entries: p.registry_entries,
            display_modes: p.display_modes,
            features: p.features,
            hardware_ids: p.hardware_ids,
            wmi_data: p.wmi_data,
            nvapi_data: p.nvapi_data,
            adl_data: p.adl_data,
        }
    }
}
