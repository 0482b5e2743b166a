//! Platform collaborators brought up before the pipeline: the persistent
//! key-value store and the network link.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, TcpListener};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Store layout version written by this build.
pub const STORE_FORMAT_VERSION: u32 = 1;
const FORMAT_MARKER: &str = "FORMAT";

pub trait PersistentStore {
    fn init(&mut self) -> Result<(), StoreError>;
    fn erase(&mut self) -> Result<(), StoreError>;
}

/// Initialize the store, erasing and retrying once on a recoverable code.
pub fn init_store(store: &mut dyn PersistentStore) -> Result<(), StoreError> {
    match store.init() {
        Ok(()) => Ok(()),
        Err(err) if err.is_recoverable() => {
            log::warn!("persistent store init failed ({}); erasing", err);
            store.erase()?;
            store.init()
        }
        Err(err) => Err(err),
    }
}

/// Directory-backed store with a format-version marker.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker(&self) -> PathBuf {
        self.root.join(FORMAT_MARKER)
    }
}

impl PersistentStore for FileStore {
    fn init(&mut self) -> Result<(), StoreError> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(StoreError::NoFreePages);
        }
        fs::create_dir_all(&self.root)?;
        match fs::read_to_string(self.marker()) {
            Ok(raw) => match raw.trim().parse::<u32>() {
                Ok(version) if version <= STORE_FORMAT_VERSION => Ok(()),
                _ => Err(StoreError::NewVersionFound(raw.trim().to_string())),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::write(self.marker(), STORE_FORMAT_VERSION.to_string())?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn erase(&mut self) -> Result<(), StoreError> {
        let result = if self.root.is_dir() {
            fs::remove_dir_all(&self.root)
        } else {
            fs::remove_file(&self.root)
        };
        match result {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Connected => f.write_str("connected"),
            LinkStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

pub trait Network {
    /// Block until the link is up or has failed.
    fn connect(&mut self) -> anyhow::Result<()>;
    fn status(&self) -> LinkStatus;
}

/// Host network link: usable when a socket can be bound on `interface`.
#[derive(Debug)]
pub struct HostNetwork {
    interface: IpAddr,
    status: LinkStatus,
}

impl HostNetwork {
    pub fn new(interface: IpAddr) -> Self {
        Self {
            interface,
            status: LinkStatus::Disconnected,
        }
    }
}

impl Network for HostNetwork {
    fn connect(&mut self) -> anyhow::Result<()> {
        match TcpListener::bind((self.interface, 0)) {
            Ok(probe) => {
                let local = probe.local_addr()?;
                log::info!("network up on {}", local.ip());
                self.status = LinkStatus::Connected;
                Ok(())
            }
            Err(err) => {
                self.status = LinkStatus::Disconnected;
                Err(anyhow::anyhow!(
                    "interface {} unavailable: {}",
                    self.interface,
                    err
                ))
            }
        }
    }

    fn status(&self) -> LinkStatus {
        self.status
    }
}
