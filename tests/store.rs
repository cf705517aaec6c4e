use gpu_sim::profile::{ComputeUnits, DisplayMode, FieldMap, FieldValue};
use gpu_sim::store::EXPORT_METADATA_KEY;
use gpu_sim::{GpuProfile, ProfileStore, Settings};
use serde_json::Value;
use tempfile::tempdir;

fn rtx_3080() -> GpuProfile {
    GpuProfile {
        vram_mb: 10240,
        vram_type: "GDDR6X".into(),
        base_clock_mhz: 1440,
        boost_clock_mhz: 1710,
        tdp_watts: 320,
        compute: ComputeUnits::CudaCores(8704),
        pci_vendor_id: "10DE".into(),
        pci_device_id: "2206".into(),
        display_modes: vec![DisplayMode::new(3840, 2160, 120)],
        ..GpuProfile::new("rtx_3080", "NVIDIA GeForce RTX 3080", "NVIDIA Corporation")
    }
}

#[test]
fn export_writes_metadata_envelope() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let mut store = ProfileStore::from_settings(&settings);
    assert!(store.save(rtx_3080(), false));

    let out = store
        .export("rtx_3080", tmp.path().join("exports").join("rtx.json"))
        .unwrap();
    let doc: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();

    let meta = &doc[EXPORT_METADATA_KEY];
    assert_eq!(meta["original_id"], "rtx_3080");
    assert_eq!(meta["application"], "GPU-SIM");
    assert_eq!(meta["format_version"], 1);
    let stamp = meta["exported_at"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
    assert_eq!(doc["name"], "NVIDIA GeForce RTX 3080");
    assert_eq!(doc["cuda_cores"], 8704);
}

#[test]
fn import_collision_never_overwrites() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let mut store = ProfileStore::from_settings(&settings);
    let original = rtx_3080();
    store.save(original.clone(), false);

    let exported = store
        .export("rtx_3080", tmp.path().join("rtx.json"))
        .unwrap();
    let imported = store.import(&exported, false).unwrap();

    assert_ne!(imported.id, "rtx_3080");
    let suffix = imported.id.strip_prefix("rtx_3080_").unwrap();
    assert_eq!(suffix.len(), 8);
    assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(store.get("rtx_3080"), Some(&original));
    assert_eq!(store.len(), 2);

    let stored = settings.profiles_dir.join(format!("{}.json", imported.id));
    let doc: Value = serde_json::from_slice(&std::fs::read(stored).unwrap()).unwrap();
    assert!(doc.get(EXPORT_METADATA_KEY).is_none());
    assert_eq!(doc["name"], "NVIDIA GeForce RTX 3080");
}

#[test]
fn import_with_overwrite_replaces_in_place() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let mut store = ProfileStore::from_settings(&settings);
    store.save(rtx_3080(), false);

    let renamed = GpuProfile {
        name: "NVIDIA GeForce RTX 3080 Ti".into(),
        ..rtx_3080()
    };
    let path = tmp.path().join("incoming.json");
    std::fs::write(&path, serde_json::to_vec(&renamed).unwrap()).unwrap();

    let imported = store.import(&path, true).unwrap();
    assert_eq!(imported.id, "rtx_3080");
    assert_eq!(store.len(), 1);
    assert_eq!(store.get("rtx_3080").unwrap().name, "NVIDIA GeForce RTX 3080 Ti");
}

#[test]
fn import_of_garbage_is_none() {
    let tmp = tempdir().unwrap();
    let mut store = ProfileStore::from_settings(&Settings::rooted_at(tmp.path()));
    let path = tmp.path().join("bad.json");
    std::fs::write(&path, r#"{"name": "no id"}"#).unwrap();
    assert!(store.import(&path, false).is_none());
    assert!(store.import(tmp.path().join("missing.json"), false).is_none());
    assert!(store.is_empty());
}

#[test]
fn saved_profiles_survive_a_fresh_store() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    {
        let mut store = ProfileStore::from_settings(&settings);
        store.save(rtx_3080(), false);
        store.save(
            GpuProfile::new("rx_7900", "AMD Radeon RX 7900 XTX", "Advanced Micro Devices, Inc."),
            false,
        );
        assert!(store.set_active("rx_7900"));
    }

    let mut store = ProfileStore::from_settings(&settings);
    assert_eq!(store.reload(), 2);
    assert_eq!(store.get("rtx_3080"), Some(&rtx_3080()));
    assert_eq!(store.active().unwrap().id, "rx_7900");
    assert_eq!(store.amd_profiles().len(), 1);
}

#[test]
fn non_finite_float_is_refused_and_keeps_the_saved_copy() {
    let tmp = tempdir().unwrap();
    let settings = Settings::rooted_at(tmp.path());
    let mut store = ProfileStore::from_settings(&settings);
    assert!(store.save(rtx_3080(), false));

    let mut broken = rtx_3080();
    broken
        .features
        .insert("opengl".into(), FieldValue::Float(f64::NAN));
    assert!(!store.save(broken.clone(), true));
    assert!(store.get("rtx_3080").unwrap().features.get("opengl").is_none());
    assert!(store.export("rtx_3080", tmp.path().join("out.json")).is_ok());

    let mut fresh = rtx_3080();
    fresh.id = "rtx_3080_inf".into();
    fresh.nvapi_data = Some(FieldMap::from([(
        "boost_ratio".to_string(),
        FieldValue::Float(f64::INFINITY),
    )]));
    assert!(!store.save(fresh, false));
    assert!(!settings.profiles_dir.join("rtx_3080_inf.json").exists());

    let mut reopened = ProfileStore::from_settings(&settings);
    assert_eq!(reopened.reload(), 1);
    assert_eq!(reopened.get("rtx_3080").unwrap(), &rtx_3080());
}
