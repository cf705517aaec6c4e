use gpu_sim::registry::{
    ApplyPhase, BackupManager, MemoryHive, RegValue, DISPLAY_CLASS_PATH, GRAPHICS_DRIVERS_PATH,
    VIDEO_PATH,
};
use gpu_sim::{ApplyOutcome, GpuProfile, GpuRegistry, RegistryError, Settings};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn adapter() -> String {
    format!("{DISPLAY_CLASS_PATH}\\0000")
}

fn windows_like_hive() -> Arc<MemoryHive> {
    let hive = Arc::new(MemoryHive::new());
    hive.set(
        &adapter(),
        "DriverDesc",
        RegValue::Sz("Microsoft Basic Display Adapter".into()),
    );
    hive.set(&adapter(), "ProviderName", RegValue::Sz("Microsoft".into()));
    hive.set(
        &format!("{VIDEO_PATH}\\{{11111111-2222-3333-4444-555555555555}}\\0000"),
        "Device Description",
        RegValue::Sz("Microsoft Basic Display Adapter".into()),
    );
    hive.set(GRAPHICS_DRIVERS_PATH, "HwSchMode", RegValue::Dword(2));
    hive
}

fn rtx_4080() -> GpuProfile {
    GpuProfile {
        vram_mb: 16384,
        pci_vendor_id: "10DE".into(),
        pci_device_id: "2704".into(),
        ..GpuProfile::new("rtx_4080", "NVIDIA GeForce RTX 4080", "NVIDIA Corporation")
    }
}

#[test]
fn qw_memory_size_is_written_as_binary() {
    let hive = windows_like_hive();
    let mut engine = GpuRegistry::new(hive.clone(), None);

    let report = engine.apply_profile(&rtx_4080()).unwrap();
    assert_eq!(report.outcome(), ApplyOutcome::Committed);

    assert_eq!(
        hive.get(&adapter(), "HardwareInformation.qwMemorySize"),
        Some(RegValue::Binary(17179869184u64.to_le_bytes().to_vec()))
    );
    assert_eq!(
        hive.get(&adapter(), "HardwareInformation.MemorySize"),
        Some(RegValue::Qword(17179869184))
    );
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("NVIDIA GeForce RTX 4080".into()))
    );
    assert_eq!(
        hive.get(&adapter(), "ProviderName"),
        Some(RegValue::Sz("NVIDIA Corporation".into()))
    );
}

#[test]
fn small_memory_size_fits_a_dword() {
    let hive = windows_like_hive();
    let mut engine = GpuRegistry::new(hive.clone(), None);
    let profile = GpuProfile {
        vram_mb: 2048,
        ..rtx_4080()
    };
    engine.apply_profile(&profile).unwrap();
    assert_eq!(
        hive.get(&adapter(), "HardwareInformation.MemorySize"),
        Some(RegValue::Dword(2147483648))
    );
}

#[test]
fn denied_adapter_key_fails_with_access_denied() {
    let hive = windows_like_hive();
    hive.deny_open(&adapter());
    let mut engine = GpuRegistry::new(hive.clone(), None);

    let err = engine.apply_profile(&rtx_4080()).unwrap_err();
    assert!(err.is_access_denied());
    assert!(err.to_string().contains("administrator"));
    assert_eq!(engine.phase(), ApplyPhase::Failed);
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("Microsoft Basic Display Adapter".into()))
    );
}

#[test]
fn every_value_denied_is_access_denied() {
    let hive = windows_like_hive();
    hive.deny_values(&adapter());
    let mut engine = GpuRegistry::new(hive, None);

    let err = engine.apply_profile(&rtx_4080()).unwrap_err();
    assert!(matches!(err, RegistryError::AccessDenied { .. }));
    assert_eq!(engine.phase(), ApplyPhase::Failed);
}

#[test]
fn one_denied_value_is_counted_not_fatal() {
    let hive = windows_like_hive();
    hive.deny_value(&adapter(), "DriverDate");
    let mut engine = GpuRegistry::new(hive.clone(), None);

    let report = engine.apply_profile(&rtx_4080()).unwrap();
    assert_eq!(report.outcome(), ApplyOutcome::CompletedWithFailures(1));
    assert_eq!(report.failures[0].name, "DriverDate");
    assert!(report.failures[0].error.is_access_denied());
    assert_eq!(engine.phase(), ApplyPhase::Committed);
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("NVIDIA GeForce RTX 4080".into()))
    );
}

#[test]
fn apply_targets_the_requested_adapter() {
    let hive = windows_like_hive();
    let second = format!("{DISPLAY_CLASS_PATH}\\0001");
    hive.create_key(&second);
    let mut engine = GpuRegistry::new(hive.clone(), None);

    let report = engine.apply_profile_to(&rtx_4080(), "0001").unwrap();
    assert_eq!(report.adapter_path, second);
    assert_eq!(
        hive.get(&second, "DriverDesc"),
        Some(RegValue::Sz("NVIDIA GeForce RTX 4080".into()))
    );
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("Microsoft Basic Display Adapter".into()))
    );
}

#[test]
fn failed_backup_does_not_block_the_write() {
    let tmp = tempdir().unwrap();
    let blocked = tmp.path().join("backups");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let hive = windows_like_hive();
    let mut engine = GpuRegistry::new(hive.clone(), Some(BackupManager::new(&blocked, 10)));

    let report = engine.apply_profile(&rtx_4080()).unwrap();
    assert!(report.backup_error.is_some());
    assert!(report.backups.is_empty());
    assert_eq!(report.outcome(), ApplyOutcome::Committed);
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("NVIDIA GeForce RTX 4080".into()))
    );
}

#[test]
fn backup_then_restore_undoes_the_apply() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let hive = windows_like_hive();
    let mut engine = GpuRegistry::from_settings(hive.clone(), &settings);

    let report = engine.apply_profile(&rtx_4080()).unwrap();
    assert_eq!(report.backups.len(), 3);
    for path in &report.backups {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("gpu_") && name.ends_with(".reg"), "{name}");
        assert!(path.starts_with(&settings.backup_dir));
    }
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("NVIDIA GeForce RTX 4080".into()))
    );

    let manager = engine.backup_manager().unwrap();
    let class_backup = manager.latest_backup("gpu_4d36e968").unwrap();
    let restored = manager.restore_backup(hive.as_ref(), &class_backup).unwrap();
    assert!(restored.restored >= 2);
    assert!(restored.failures.is_empty());

    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("Microsoft Basic Display Adapter".into()))
    );
    assert_eq!(
        hive.get(&adapter(), "ProviderName"),
        Some(RegValue::Sz("Microsoft".into()))
    );
}

#[test]
fn denied_value_does_not_stop_the_restore() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let hive = windows_like_hive();
    hive.set(&adapter(), "InfSection", RegValue::Sz("BasicDisplay".into()));
    let mut engine = GpuRegistry::from_settings(hive.clone(), &settings);
    engine.apply_profile(&rtx_4080()).unwrap();

    // Values restore in name order: DriverDesc, InfSection, ProviderName.
    hive.set(&adapter(), "InfSection", RegValue::Sz("nv_dispi".into()));
    hive.deny_value(&adapter(), "InfSection");

    let manager = engine.backup_manager().unwrap();
    let class_backup = manager.latest_backup("gpu_4d36e968").unwrap();
    let report = manager.restore_backup(hive.as_ref(), &class_backup).unwrap();

    assert_eq!(report.restored, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].name.ends_with("0000\\InfSection"));
    assert!(report.failures[0].error.is_access_denied());
    assert_eq!(
        hive.get(&adapter(), "DriverDesc"),
        Some(RegValue::Sz("Microsoft Basic Display Adapter".into()))
    );
    assert_eq!(
        hive.get(&adapter(), "ProviderName"),
        Some(RegValue::Sz("Microsoft".into()))
    );
    assert_eq!(
        hive.get(&adapter(), "InfSection"),
        Some(RegValue::Sz("nv_dispi".into()))
    );
}

#[test]
fn restore_with_every_write_denied_is_access_denied() {
    let tmp = tempdir().unwrap();
    let manager = BackupManager::new(tmp.path(), 10);
    let hive = windows_like_hive();
    let backup = manager.create_backup(hive.as_ref(), &adapter(), None).unwrap();

    hive.deny_values(&adapter());
    assert!(matches!(
        manager.restore_backup(hive.as_ref(), &backup),
        Err(RegistryError::AccessDenied { .. })
    ));
}

#[test]
fn old_backups_are_pruned_to_keep_count() {
    let tmp = tempdir().unwrap();
    let hive = windows_like_hive();
    let mut engine = GpuRegistry::new(
        hive,
        Some(BackupManager::new(tmp.path().join("backups"), 3)),
    );

    let first = engine.apply_profile(&rtx_4080()).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let second = engine.apply_profile(&rtx_4080()).unwrap();

    let manager = engine.backup_manager().unwrap();
    let remaining = manager.list_backups();
    assert_eq!(remaining.len(), 3);
    for path in &second.backups {
        assert!(remaining.contains(path));
    }
    for path in &first.backups {
        assert!(!path.exists());
    }
}

#[test]
fn applied_profile_reads_back_as_current_gpu() {
    let hive = windows_like_hive();
    let mut engine = GpuRegistry::new(hive, None);
    engine.apply_profile(&rtx_4080()).unwrap();

    let info = engine.current_gpu_info().unwrap();
    assert_eq!(info.name, "NVIDIA GeForce RTX 4080");
    assert_eq!(info.manufacturer, "NVIDIA Corporation");
    assert!(info.device_id.to_uppercase().contains("VEN_10DE"));
    assert!(engine.detect_virtual_display_driver().is_none());
}
