use super::RegistryError;
use crate::profile::RegistryEntry;
use std::fmt;

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;

// Value names containing this (case-insensitive) hold a 64-bit memory size
// stored as raw little-endian bytes rather than a QWORD.
const MEMORY_SIZE_MARKER: &str = "qwmemorysize";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Sz(String),
    Dword(u32),
    Qword(u64),
    Binary(Vec<u8>),
    Other { ty: u32, bytes: Vec<u8> },
}

impl RegValue {
    pub fn ty(&self) -> u32 {
        match self {
            RegValue::Sz(_) => REG_SZ,
            RegValue::Dword(_) => REG_DWORD,
            RegValue::Qword(_) => REG_QWORD,
            RegValue::Binary(_) => REG_BINARY,
            RegValue::Other { ty, .. } => *ty,
        }
    }

    // Raw bytes as passed to `RegSetValueExW`. Strings are NUL-terminated UTF-16LE.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RegValue::Sz(s) => encode_utf16z(s),
            RegValue::Dword(v) => v.to_le_bytes().to_vec(),
            RegValue::Qword(v) => v.to_le_bytes().to_vec(),
            RegValue::Binary(b) => b.clone(),
            RegValue::Other { bytes, .. } => bytes.clone(),
        }
    }

    pub fn from_bytes(ty: u32, bytes: Vec<u8>) -> Self {
        match ty {
            REG_SZ => match decode_utf16(&bytes) {
                Some(s) => RegValue::Sz(s),
                None => RegValue::Other { ty, bytes },
            },
            REG_DWORD if bytes.len() == 4 => {
                RegValue::Dword(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            REG_QWORD if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                RegValue::Qword(u64::from_le_bytes(raw))
            }
            REG_BINARY => RegValue::Binary(bytes),
            _ => RegValue::Other { ty, bytes },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegValue::Sz(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RegValue::Dword(v) => Some(u64::from(*v)),
            RegValue::Qword(v) => Some(*v),
            _ => None,
        }
    }

    // Best-effort text form: strings as-is, expandable and multi-strings
    // decoded (multi-strings joined with ", "), numbers in decimal.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RegValue::Sz(s) => Some(s.clone()),
            RegValue::Dword(v) => Some(v.to_string()),
            RegValue::Qword(v) => Some(v.to_string()),
            RegValue::Other { ty: REG_EXPAND_SZ, bytes } => decode_utf16(bytes),
            RegValue::Other { ty: REG_MULTI_SZ, bytes } => decode_utf16_raw(bytes).map(|s| {
                s.split('\0')
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ")
            }),
            RegValue::Binary(_) | RegValue::Other { .. } => None,
        }
    }
}

impl fmt::Display for RegValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(&text),
            None => {
                for (i, b) in self.to_bytes().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

pub fn is_memory_size_key(name: &str) -> bool {
    name.to_lowercase().contains(MEMORY_SIZE_MARKER)
}

// Chooses the on-disk encoding for one projected registry entry.
pub fn encode_entry(name: &str, entry: &RegistryEntry) -> Result<RegValue, RegistryError> {
    match entry {
        RegistryEntry::Int(v) if *v < 0 => Err(RegistryError::NegativeValue {
            name: name.to_string(),
            value: *v,
        }),
        RegistryEntry::Int(v) => {
            let v = *v as u64;
            if is_memory_size_key(name) {
                Ok(RegValue::Binary(v.to_le_bytes().to_vec()))
            } else if v > u64::from(u32::MAX) {
                Ok(RegValue::Qword(v))
            } else {
                Ok(RegValue::Dword(v as u32))
            }
        }
        RegistryEntry::Text(s) => Ok(RegValue::Sz(s.clone())),
        RegistryEntry::Bytes(b) => Ok(RegValue::Binary(b.clone())),
    }
}

pub(crate) fn encode_utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn decode_utf16_raw(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

pub(crate) fn decode_utf16(bytes: &[u8]) -> Option<String> {
    decode_utf16_raw(bytes).map(|s| s.trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_size_becomes_little_endian_binary() {
        let v = encode_entry(
            "HardwareInformation.qwMemorySize",
            &RegistryEntry::Int(17_179_869_184),
        )
        .unwrap();
        assert_eq!(v, RegValue::Binary(17_179_869_184u64.to_le_bytes().to_vec()));

        // Small sizes still go out as eight bytes.
        let v = encode_entry("QWMEMORYSIZE", &RegistryEntry::Int(1)).unwrap();
        assert_eq!(v.to_bytes().len(), 8);
    }

    #[test]
    fn integers_pick_dword_or_qword() {
        assert_eq!(
            encode_entry("Clock", &RegistryEntry::Int(1500)).unwrap(),
            RegValue::Dword(1500)
        );
        assert_eq!(
            encode_entry("Max", &RegistryEntry::Int(0xFFFF_FFFF)).unwrap(),
            RegValue::Dword(u32::MAX)
        );
        assert_eq!(
            encode_entry("Big", &RegistryEntry::Int(0x1_0000_0000)).unwrap(),
            RegValue::Qword(0x1_0000_0000)
        );
    }

    #[test]
    fn negative_integers_are_rejected() {
        assert!(matches!(
            encode_entry("Bad", &RegistryEntry::Int(-1)),
            Err(RegistryError::NegativeValue { value: -1, .. })
        ));
    }

    #[test]
    fn strings_are_nul_terminated_utf16() {
        let v = encode_entry("DriverDesc", &RegistryEntry::Text("AB".into())).unwrap();
        assert_eq!(v.to_bytes(), vec![b'A', 0, b'B', 0, 0, 0]);
        assert_eq!(RegValue::from_bytes(REG_SZ, v.to_bytes()), v);
    }

    #[test]
    fn multi_sz_text_is_joined() {
        let mut raw = encode_utf16z("PCI\\VEN_10DE&DEV_2204");
        raw.extend(encode_utf16z("PCI\\VEN_10DE"));
        raw.extend([0, 0]);
        let v = RegValue::from_bytes(REG_MULTI_SZ, raw);
        assert_eq!(v.as_text().unwrap(), "PCI\\VEN_10DE&DEV_2204, PCI\\VEN_10DE");
    }
}
