//! sortcamd - camera classifier daemon
//!
//! This daemon:
//! 1. Initializes the persistent store and network link
//! 2. Allocates the tensor arena and brings up camera and model
//! 3. Serves the live MJPEG stream, logging a classification per frame

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;

use sortcam::config::SortcamConfig;
use sortcam::platform::{FileStore, HostNetwork};
use sortcam::{HostMemory, StreamServer, Startup};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify camera frames on-device and serve them as an MJPEG stream"
)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "SORTCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address for the stream server.
    #[arg(long)]
    addr: Option<String>,

    /// Camera source: static, dir:<path> or an http(s) URL.
    #[arg(long)]
    camera: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config =
        SortcamConfig::load_from(args.config.as_deref()).context("load configuration")?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(camera) = args.camera {
        config.camera.source = camera;
    }
    config.validate()?;

    let bind: SocketAddr = config.server.addr.parse()?;
    let mut store = FileStore::new(&config.store_path);
    let mut network = HostNetwork::new(bind.ip());
    let mut memory = HostMemory::new(config.memory.psram_bytes, config.memory.internal_heap_bytes);

    let ctx = Startup::new(&config)
        .run(&mut store, &mut network, &mut memory)
        .context("startup failed")?;

    let handle = StreamServer::new(ctx, config.server.clone()).spawn()?;
    log::info!("sortcamd streaming on http://{}/", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping stream server...");
    handle.stop()?;
    Ok(())
}
