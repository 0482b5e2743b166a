use std::sync::Mutex;

use tempfile::NamedTempFile;

use sortcam::config::{BackendKind, SortcamConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SORTCAM_CONFIG",
        "SORTCAM_ADDR",
        "SORTCAM_CAMERA",
        "SORTCAM_MODEL",
        "SORTCAM_BACKEND",
        "SORTCAM_ARENA_BYTES",
        "SORTCAM_PSRAM_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        labels = ["cardboard", "metal", "paper", "plastic", "glass"]

        [server]
        addr = "127.0.0.1:8080"
        write_timeout_ms = 1500
        stats_every = 10

        [memory]
        arena_bytes = 524288
        psram_bytes = 0

        [camera]
        source = "dir:/var/lib/sortcam/frames"
        target_fps = 5

        [model]
        path = "/opt/sortcam/model.tflite"
        backend = "stub"
        operator_capacity = 12

        [store]
        path = "/var/lib/sortcam/nvs"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("SORTCAM_CONFIG", file.path());
    std::env::set_var("SORTCAM_CAMERA", "static");
    std::env::set_var("SORTCAM_ARENA_BYTES", "716800");

    let cfg = SortcamConfig::load().expect("load config");

    assert_eq!(cfg.server.addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.write_timeout.as_millis(), 1500);
    assert_eq!(cfg.server.stats_every, 10);
    assert_eq!(cfg.memory.arena_bytes, 716800);
    assert_eq!(cfg.memory.psram_bytes, 0);
    assert_eq!(cfg.memory.internal_heap_bytes, 512 * 1024);
    assert_eq!(cfg.camera.source, "static");
    assert_eq!(cfg.camera.width, 320);
    assert_eq!(cfg.camera.target_fps, 5);
    assert_eq!(
        cfg.model.path.as_deref(),
        Some(std::path::Path::new("/opt/sortcam/model.tflite"))
    );
    assert_eq!(cfg.model.backend, BackendKind::Stub);
    assert_eq!(cfg.model.operator_capacity, 12);
    assert_eq!(cfg.labels.len(), 5);
    assert_eq!(cfg.store_path, std::path::PathBuf::from("/var/lib/sortcam/nvs"));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SortcamConfig::load().expect("load defaults");
    assert_eq!(cfg.server.addr, "0.0.0.0:80");
    assert_eq!(cfg.memory.arena_bytes, 700 * 1024);
    assert_eq!(cfg.camera.source, "static");
    assert!(cfg.model.path.is_none());
    assert_eq!(cfg.labels, vec!["carton", "metal", "papel", "plastico"]);
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SORTCAM_ARENA_BYTES", "lots");
    assert!(SortcamConfig::load().is_err());
    clear_env();

    std::env::set_var("SORTCAM_ARENA_BYTES", "0");
    assert!(SortcamConfig::load().is_err());
    clear_env();

    std::env::set_var("SORTCAM_BACKEND", "onnx");
    assert!(SortcamConfig::load().is_err());
    clear_env();
}

#[test]
fn unknown_backend_in_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[model]\nbackend = \"gpu\"\n").expect("write config");
    std::env::set_var("SORTCAM_CONFIG", file.path());
    assert!(SortcamConfig::load().is_err());

    clear_env();
}
