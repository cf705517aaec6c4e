use dirs::{config_dir, data_dir};
use std::path::PathBuf;

const APP_DIR: &str = "GPU-SIM";

// ~/.local/share/GPU-SIM   (or platform-equivalent), unless `GPU_SIM_HOME` is set.
pub fn gpusim_home() -> PathBuf {
    if let Some(home) = std::env::var_os("GPU_SIM_HOME") {
        return PathBuf::from(home);
    }
    data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join(APP_DIR)
}

// ~/.local/share/GPU-SIM/gpu_profiles
pub fn profiles_dir() -> PathBuf {
    gpusim_home().join("gpu_profiles")
}

// ~/.local/share/GPU-SIM/backups
pub fn backups_dir() -> PathBuf {
    gpusim_home().join("backups")
}

// ~/.local/share/GPU-SIM/settings.json
pub fn settings_path() -> PathBuf {
    gpusim_home().join("settings.json")
}

// ~/.config/GPU-SIM/active_profile.json
// Lives in the per-user config dir, outside the profiles directory, so every
// process sharing the same store configuration sees the same selection.
pub fn active_marker_path() -> PathBuf {
    if let Some(home) = std::env::var_os("GPU_SIM_HOME") {
        return PathBuf::from(home).join("active_profile.json");
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join(APP_DIR)
        .join("active_profile.json")
}
