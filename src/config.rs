use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::DEFAULT_LABELS;
use crate::arena::DEFAULT_ARENA_BYTES;
use crate::engine::DEFAULT_OPERATOR_CAPACITY;

const DEFAULT_ADDR: &str = "0.0.0.0:80";
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_STATS_EVERY: u64 = 100;
const DEFAULT_PSRAM_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_INTERNAL_HEAP_BYTES: usize = 512 * 1024;
const DEFAULT_CAMERA_SOURCE: &str = "static";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_STORE_PATH: &str = "sortcam-store";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SortcamConfigFile {
    server: Option<ServerConfigFile>,
    memory: Option<MemoryConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    labels: Option<Vec<String>>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    write_timeout_ms: Option<u64>,
    stats_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MemoryConfigFile {
    arena_bytes: Option<usize>,
    psram_bytes: Option<usize>,
    internal_heap_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    backend: Option<String>,
    operator_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SortcamConfig {
    pub server: ServerSettings,
    pub memory: MemorySettings,
    pub camera: CameraConfig,
    pub model: ModelSettings,
    pub labels: Vec<String>,
    pub store_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub write_timeout: Duration,
    /// Log stream statistics every N frames; 0 disables.
    pub stats_every: u64,
}

#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub arena_bytes: usize,
    /// External (PSRAM-like) region size; 0 means the board has none.
    pub psram_bytes: usize,
    pub internal_heap_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// `static`, `dir:<path>` or an `http(s)://` URL.
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Capture rate for the static and directory sources; 0 is unpaced.
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// `None` uses the model embedded in the binary.
    pub path: Option<PathBuf>,
    pub backend: BackendKind,
    pub operator_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!(
                "unknown model backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

impl Default for SortcamConfig {
    fn default() -> Self {
        Self::from_file(SortcamConfigFile::default())
    }
}

impl SortcamConfig {
    /// Defaults, then the TOML file named by `SORTCAM_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTCAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `SORTCAM_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SortcamConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SortcamConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let memory = file.memory.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        Self {
            server: ServerSettings {
                addr: server.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
                write_timeout: Duration::from_millis(
                    server.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
                ),
                stats_every: server.stats_every.unwrap_or(DEFAULT_STATS_EVERY),
            },
            memory: MemorySettings {
                arena_bytes: memory.arena_bytes.unwrap_or(DEFAULT_ARENA_BYTES),
                psram_bytes: memory.psram_bytes.unwrap_or(DEFAULT_PSRAM_BYTES),
                internal_heap_bytes: memory
                    .internal_heap_bytes
                    .unwrap_or(DEFAULT_INTERNAL_HEAP_BYTES),
            },
            camera: CameraConfig {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            model: ModelSettings {
                path: model.path,
                backend: model
                    .backend
                    .as_deref()
                    .and_then(|b| BackendKind::parse(b).ok())
                    .unwrap_or(BackendKind::Stub),
                operator_capacity: model
                    .operator_capacity
                    .unwrap_or(DEFAULT_OPERATOR_CAPACITY),
            },
            labels: file
                .labels
                .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()),
            store_path: file
                .store
                .and_then(|store| store.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SORTCAM_ADDR") {
            if !addr.trim().is_empty() {
                self.server.addr = addr;
            }
        }
        if let Ok(source) = std::env::var("SORTCAM_CAMERA") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(path) = std::env::var("SORTCAM_MODEL") {
            if !path.trim().is_empty() {
                self.model.path = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = std::env::var("SORTCAM_BACKEND") {
            self.model.backend = BackendKind::parse(&backend)?;
        }
        if let Ok(bytes) = std::env::var("SORTCAM_ARENA_BYTES") {
            self.memory.arena_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("SORTCAM_ARENA_BYTES must be an integer byte count"))?;
        }
        if let Ok(bytes) = std::env::var("SORTCAM_PSRAM_BYTES") {
            self.memory.psram_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("SORTCAM_PSRAM_BYTES must be an integer byte count"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid server address '{}': {}", self.server.addr, e))?;
        if self.memory.arena_bytes == 0 {
            return Err(anyhow!("arena size must be greater than zero"));
        }
        if self.model.operator_capacity == 0 {
            return Err(anyhow!("operator capacity must be greater than zero"));
        }
        if self.labels.is_empty() {
            return Err(anyhow!("at least one class label is required"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SortcamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let mut cfg: SortcamConfigFile = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    if let Some(backend) = cfg.model.as_ref().and_then(|m| m.backend.as_deref()) {
        BackendKind::parse(backend)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    }
    if let Some(labels) = cfg.labels.as_mut() {
        for label in labels.iter_mut() {
            *label = label.trim().to_string();
        }
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_device() {
        let cfg = SortcamConfig::default();
        assert_eq!(cfg.server.addr, "0.0.0.0:80");
        assert_eq!(cfg.memory.arena_bytes, 700 * 1024);
        assert_eq!(cfg.model.operator_capacity, 15);
        assert_eq!(cfg.camera.target_fps, 10);
        assert_eq!(cfg.model.backend, BackendKind::Stub);
        assert_eq!(cfg.labels, vec!["carton", "metal", "papel", "plastico"]);
        cfg.validate().unwrap();
    }

    #[test]
    fn validation_rejects_zero_arena() {
        let mut cfg = SortcamConfig::default();
        cfg.memory.arena_bytes = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_address() {
        let mut cfg = SortcamConfig::default();
        cfg.server.addr = "not-an-address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!(BackendKind::parse("Tract").unwrap(), BackendKind::Tract);
        assert!(BackendKind::parse("onnx").is_err());
    }
}
