use super::hive::{join_path, KeyWriter, RegistryHive, ValueMap};
use super::value::RegValue;
use super::RegistryError;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// In-memory registry used for tests, dry runs and non-Windows hosts.
// Key and value names compare case-insensitively like the real registry.
// Writes can be made to fail with access-denied per key or per value.
#[derive(Default)]
pub struct MemoryHive {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    keys: BTreeMap<String, Key>,
    denied_open: BTreeSet<String>,
    denied_values: BTreeSet<(String, Option<String>)>,
}

struct Key {
    name: String,
    values: ValueMap,
}

fn norm(path: &str) -> String {
    path.trim_matches('\\').to_lowercase()
}

impl State {
    fn ensure_key(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.trim_matches('\\').split('\\').filter(|s| !s.is_empty()) {
            current = join_path(&current, segment);
            self.keys.entry(norm(&current)).or_insert_with(|| Key {
                name: segment.to_string(),
                values: ValueMap::new(),
            });
        }
    }

    fn value_denied(&self, path: &str, name: &str) -> bool {
        let key = norm(path);
        self.denied_values.contains(&(key.clone(), None))
            || self.denied_values.contains(&(key, Some(name.to_lowercase())))
    }
}

impl MemoryHive {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_key(&self, path: &str) {
        self.write().ensure_key(path);
    }

    // Sets a value directly, creating the key. Ignores denial rules.
    pub fn set(&self, path: &str, name: &str, value: RegValue) {
        let mut state = self.write();
        state.ensure_key(path);
        if let Some(key) = state.keys.get_mut(&norm(path)) {
            insert_value(&mut key.values, name, value);
        }
    }

    pub fn get(&self, path: &str, name: &str) -> Option<RegValue> {
        self.read().keys.get(&norm(path)).and_then(|key| {
            key.values
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        })
    }

    pub fn contains_key(&self, path: &str) -> bool {
        self.read().keys.contains_key(&norm(path))
    }

    // Opening `path` for writing fails with access denied.
    pub fn deny_open(&self, path: &str) {
        self.write().denied_open.insert(norm(path));
    }

    // Writing value `name` under `path` fails with access denied.
    pub fn deny_value(&self, path: &str, name: &str) {
        self.write()
            .denied_values
            .insert((norm(path), Some(name.to_lowercase())));
    }

    // Every value write under `path` fails with access denied.
    pub fn deny_values(&self, path: &str) {
        self.write().denied_values.insert((norm(path), None));
    }
}

fn insert_value(values: &mut ValueMap, name: &str, value: RegValue) {
    let existing = values
        .keys()
        .find(|n| n.eq_ignore_ascii_case(name))
        .cloned();
    values.insert(existing.unwrap_or_else(|| name.to_string()), value);
}

fn unavailable(path: &str) -> RegistryError {
    RegistryError::KeyUnavailable {
        path: path.to_string(),
        reason: "key does not exist".to_string(),
    }
}

impl RegistryHive for MemoryHive {
    fn subkeys(&self, path: &str) -> Result<Vec<String>, RegistryError> {
        let state = self.read();
        let base = norm(path);
        if !state.keys.contains_key(&base) {
            return Err(unavailable(path));
        }
        let prefix = format!("{base}\\");
        Ok(state
            .keys
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('\\'))
            .map(|(_, key)| key.name.clone())
            .collect())
    }

    fn values(&self, path: &str) -> Result<ValueMap, RegistryError> {
        self.read()
            .keys
            .get(&norm(path))
            .map(|key| key.values.clone())
            .ok_or_else(|| unavailable(path))
    }

    fn open_for_write(
        &self,
        path: &str,
        create: bool,
    ) -> Result<Box<dyn KeyWriter + '_>, RegistryError> {
        let mut state = self.write();
        if state.denied_open.contains(&norm(path)) {
            return Err(RegistryError::AccessDenied {
                path: path.to_string(),
            });
        }
        if !state.keys.contains_key(&norm(path)) {
            if !create {
                return Err(unavailable(path));
            }
            state.ensure_key(path);
        }
        Ok(Box::new(MemoryKeyWriter {
            hive: self,
            path: path.to_string(),
        }))
    }
}

struct MemoryKeyWriter<'a> {
    hive: &'a MemoryHive,
    path: String,
}

impl KeyWriter for MemoryKeyWriter<'_> {
    fn set_value(&mut self, name: &str, value: &RegValue) -> Result<(), RegistryError> {
        let mut state = self.hive.write();
        if state.value_denied(&self.path, name) {
            return Err(RegistryError::AccessDenied {
                path: join_path(&self.path, name),
            });
        }
        let key = state
            .keys
            .get_mut(&norm(&self.path))
            .ok_or_else(|| unavailable(&self.path))?;
        insert_value(&mut key.values, name, value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subkeys_are_immediate_children_only() {
        let hive = MemoryHive::new();
        hive.create_key("A\\B\\0000");
        hive.create_key("A\\B\\0001\\Settings");
        hive.create_key("A\\Bc");

        assert_eq!(hive.subkeys("a\\b").unwrap(), ["0000", "0001"]);
        assert_eq!(hive.subkeys("A").unwrap(), ["B", "Bc"]);
        assert!(hive.subkeys("Missing").is_err());
    }

    #[test]
    fn names_are_case_insensitive() {
        let hive = MemoryHive::new();
        hive.set("Key", "DriverDesc", RegValue::Sz("one".into()));
        hive.set("KEY", "driverdesc", RegValue::Sz("two".into()));
        let values = hive.values("key").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["DriverDesc"], RegValue::Sz("two".into()));
    }

    #[test]
    fn denial_rules_apply_to_writers_only() {
        let hive = MemoryHive::new();
        hive.create_key("Locked");
        hive.create_key("Partial");
        hive.deny_open("Locked");
        hive.deny_value("Partial", "Secret");

        assert!(matches!(
            hive.open_for_write("Locked", false),
            Err(RegistryError::AccessDenied { .. })
        ));
        assert!(hive.values("Locked").is_ok());

        let mut writer = hive.open_for_write("Partial", false).unwrap();
        assert!(writer.set_value("Open", &RegValue::Dword(1)).is_ok());
        assert!(matches!(
            writer.set_value("secret", &RegValue::Dword(1)),
            Err(RegistryError::AccessDenied { .. })
        ));
    }

    #[test]
    fn open_without_create_requires_existing_key() {
        let hive = MemoryHive::new();
        assert!(matches!(
            hive.open_for_write("Nope", false),
            Err(RegistryError::KeyUnavailable { .. })
        ));
        assert!(hive.open_for_write("Nope\\Child", true).is_ok());
        assert!(hive.contains_key("nope"));
    }
}
