use super::hive::{KeyWriter, RegistryHive, ValueMap};
use super::value::RegValue;
use super::RegistryError;
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_SUCCESS, WIN32_ERROR};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegEnumKeyExW, RegEnumValueW, RegOpenKeyExW, RegQueryInfoKeyW,
    RegSetValueExW, HKEY, HKEY_LOCAL_MACHINE, KEY_READ, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE,
    REG_SAM_FLAGS, REG_VALUE_TYPE,
};

pub struct WindowsHive;

impl WindowsHive {
    pub fn local_machine() -> Self {
        WindowsHive
    }
}

struct OwnedHKey(HKEY);

impl Drop for OwnedHKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn check(path: &str, status: WIN32_ERROR) -> Result<(), RegistryError> {
    if status == ERROR_SUCCESS {
        return Ok(());
    }
    if status == ERROR_ACCESS_DENIED {
        return Err(RegistryError::AccessDenied {
            path: path.to_string(),
        });
    }
    Err(RegistryError::Os {
        path: path.to_string(),
        source: std::io::Error::from_raw_os_error(status.0 as i32),
    })
}

fn open_key(path: &str, access: REG_SAM_FLAGS) -> Result<OwnedHKey, RegistryError> {
    let wide = to_wide(path);
    let mut out = HKEY::default();
    let status =
        unsafe { RegOpenKeyExW(HKEY_LOCAL_MACHINE, PCWSTR(wide.as_ptr()), 0, access, &mut out) };
    check(path, status).map_err(|e| match e {
        RegistryError::Os { path, source } => RegistryError::KeyUnavailable {
            path,
            reason: source.to_string(),
        },
        other => other,
    })?;
    Ok(OwnedHKey(out))
}

fn create_key(path: &str) -> Result<OwnedHKey, RegistryError> {
    let wide = to_wide(path);
    let mut out = HKEY::default();
    let mut disposition = Default::default();
    let status = unsafe {
        RegCreateKeyExW(
            HKEY_LOCAL_MACHINE,
            PCWSTR(wide.as_ptr()),
            0,
            PCWSTR::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_READ | KEY_SET_VALUE,
            None,
            &mut out,
            Some(&mut disposition),
        )
    };
    check(path, status)?;
    Ok(OwnedHKey(out))
}

impl RegistryHive for WindowsHive {
    fn subkeys(&self, path: &str) -> Result<Vec<String>, RegistryError> {
        let key = open_key(path, KEY_READ)?;
        unsafe {
            let mut count = 0u32;
            let mut max_len = 0u32;
            let status = RegQueryInfoKeyW(
                key.0,
                None,
                None,
                None,
                Some(&mut count),
                Some(&mut max_len),
                None,
                None,
                None,
                None,
                None,
                None,
            );
            check(path, status)?;

            let mut names = Vec::with_capacity(count as usize);
            let mut buf = vec![0u16; (max_len + 1) as usize];
            for index in 0..count {
                let mut len = max_len + 1;
                let status = RegEnumKeyExW(
                    key.0,
                    index,
                    PWSTR(buf.as_mut_ptr()),
                    &mut len,
                    None,
                    None,
                    None,
                    None,
                );
                check(path, status)?;
                names.push(String::from_utf16_lossy(&buf[..len as usize]));
            }
            names.sort();
            Ok(names)
        }
    }

    fn values(&self, path: &str) -> Result<ValueMap, RegistryError> {
        let key = open_key(path, KEY_READ)?;
        unsafe {
            let mut count = 0u32;
            let mut max_name_len = 0u32;
            let mut max_data_len = 0u32;
            let status = RegQueryInfoKeyW(
                key.0,
                None,
                None,
                None,
                None,
                None,
                None,
                Some(&mut count),
                Some(&mut max_name_len),
                Some(&mut max_data_len),
                None,
                None,
            );
            check(path, status)?;

            let mut values = ValueMap::new();
            let mut name_buf = vec![0u16; (max_name_len + 1) as usize];
            let mut data_buf = vec![0u8; max_data_len as usize];
            for index in 0..count {
                let mut name_len = max_name_len + 1;
                let mut ty = 0u32;
                let mut data_len = max_data_len;
                let status = RegEnumValueW(
                    key.0,
                    index,
                    PWSTR(name_buf.as_mut_ptr()),
                    &mut name_len,
                    None,
                    Some(&mut ty),
                    Some(data_buf.as_mut_ptr()),
                    Some(&mut data_len),
                );
                check(path, status)?;
                let name = String::from_utf16_lossy(&name_buf[..name_len as usize]);
                let data = data_buf[..data_len as usize].to_vec();
                values.insert(name, RegValue::from_bytes(ty, data));
            }
            Ok(values)
        }
    }

    fn open_for_write(
        &self,
        path: &str,
        create: bool,
    ) -> Result<Box<dyn KeyWriter + '_>, RegistryError> {
        let key = if create {
            create_key(path)?
        } else {
            open_key(path, KEY_READ | KEY_SET_VALUE)?
        };
        Ok(Box::new(WindowsKeyWriter {
            key,
            path: path.to_string(),
        }))
    }
}

struct WindowsKeyWriter {
    key: OwnedHKey,
    path: String,
}

impl KeyWriter for WindowsKeyWriter {
    fn set_value(&mut self, name: &str, value: &RegValue) -> Result<(), RegistryError> {
        let wide = to_wide(name);
        let data = value.to_bytes();
        let status = unsafe {
            RegSetValueExW(
                self.key.0,
                PCWSTR(wide.as_ptr()),
                0,
                REG_VALUE_TYPE(value.ty()),
                Some(&data),
            )
        };
        check(&format!("{}\\{name}", self.path), status)
    }
}
