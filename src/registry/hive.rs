use super::value::RegValue;
use super::RegistryError;
use std::collections::BTreeMap;

pub type ValueMap = BTreeMap<String, RegValue>;

// A registry backend rooted at `HKEY_LOCAL_MACHINE`. Paths are relative to
// the root and use `\` separators.
pub trait RegistryHive: Send + Sync {
    fn subkeys(&self, path: &str) -> Result<Vec<String>, RegistryError>;

    fn values(&self, path: &str) -> Result<ValueMap, RegistryError>;

    // Opens `path` for writing. With `create`, missing keys (and their
    // parents) are created first.
    fn open_for_write(
        &self,
        path: &str,
        create: bool,
    ) -> Result<Box<dyn KeyWriter + '_>, RegistryError>;
}

pub trait KeyWriter {
    fn set_value(&mut self, name: &str, value: &RegValue) -> Result<(), RegistryError>;
}

pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('\\');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}\\{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_root_and_trailing_separator() {
        assert_eq!(join_path("", "SYSTEM"), "SYSTEM");
        assert_eq!(join_path("SYSTEM\\", "Select"), "SYSTEM\\Select");
        assert_eq!(join_path("A\\B", "0000"), "A\\B\\0000");
    }
}
