//! MJPEG stream server.
//!
//! One listener thread accepts connections and serves them one at a time, so
//! the pipeline context is never shared between requests. `GET /` streams
//! `multipart/x-mixed-replace` parts until acquisition fails, a write fails,
//! or the server is stopped.

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ServerSettings;
use crate::pipeline::{FrameOutcome, PipelineContext};
use crate::preprocess::{frame_to_jpeg, STREAM_JPEG_QUALITY};

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Multipart boundary token.
pub const BOUNDARY: &str = "123456789000000000000987654321";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The camera failed to deliver a frame.
    AcquireFailed,
    /// The client went away.
    WriteFailed,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames_sent: u64,
    pub classified: u64,
    pub skipped: u64,
    pub end: StreamEnd,
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, end any active stream, and wait for the thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    ctx: PipelineContext,
    settings: ServerSettings,
}

impl StreamServer {
    pub fn new(ctx: PipelineContext, settings: ServerSettings) -> Self {
        Self { ctx, settings }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self.settings.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let mut ctx = self.ctx;
        let settings = self.settings;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_server(listener, &mut ctx, &settings, &shutdown_thread) {
                log::error!("stream server stopped: {}", err);
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    ctx: &mut PipelineContext,
    settings: &ServerSettings,
    shutdown: &AtomicBool,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, ctx, settings, shutdown) {
                    log::warn!("request from {} failed: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    ctx: &mut PipelineContext,
    settings: &ServerSettings,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(settings.write_timeout))?;

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => {}
        "/health" => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
            return Ok(());
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    }

    let peer = stream.peer_addr()?;
    log::info!("stream started for {}", peer);
    write_stream_header(&mut stream)?;
    let summary = stream_frames(&mut stream, ctx, shutdown, settings.stats_every);
    log::info!(
        "stream to {} ended ({:?}): sent={} classified={} skipped={}",
        peer,
        summary.end,
        summary.frames_sent,
        summary.classified,
        summary.skipped
    );
    Ok(())
}

/// Status line and multipart content type, written once per stream.
pub fn write_stream_header<W: Write>(out: &mut W) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\n\r\n",
        BOUNDARY
    );
    out.write_all(header.as_bytes())
}

/// One multipart part: boundary line, part headers, then `body` verbatim.
pub fn write_part<W: Write>(out: &mut W, body: &[u8]) -> std::io::Result<()> {
    let head = format!(
        "\r\n--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        body.len()
    );
    out.write_all(head.as_bytes())?;
    out.write_all(body)?;
    out.flush()
}

/// Drive the pipeline into `out` until a stream-ending condition.
///
/// Each iteration acquires a frame, classifies it (result is logged only),
/// writes it as one part and releases it. Preprocess or inference failures
/// skip classification but the frame is still sent.
pub fn stream_frames<W: Write>(
    out: &mut W,
    ctx: &mut PipelineContext,
    shutdown: &AtomicBool,
    stats_every: u64,
) -> StreamSummary {
    let mut summary = StreamSummary {
        frames_sent: 0,
        classified: 0,
        skipped: 0,
        end: StreamEnd::Shutdown,
    };
    loop {
        if shutdown.load(Ordering::SeqCst) {
            summary.end = StreamEnd::Shutdown;
            return summary;
        }

        let frame = match ctx.source.acquire() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("camera capture failed: {}", err);
                summary.end = StreamEnd::AcquireFailed;
                return summary;
            }
        };

        match ctx.stages.classify(frame.frame()) {
            FrameOutcome::Classified(_) => summary.classified += 1,
            FrameOutcome::Unclassified => {}
            FrameOutcome::Skipped => summary.skipped += 1,
        }

        let body = match frame_to_jpeg(frame.frame(), STREAM_JPEG_QUALITY) {
            Ok(body) => body,
            Err(err) => {
                log::warn!("frame cannot be streamed: {}", err);
                continue;
            }
        };
        if let Err(err) = write_part(out, &body) {
            log::info!("client write failed: {}", err);
            summary.end = StreamEnd::WriteFailed;
            return summary;
        }
        drop(body);
        frame.release();
        summary.frames_sent += 1;

        if stats_every > 0 && summary.frames_sent % stats_every == 0 {
            log::info!(
                "stream stats: sent={} classified={} skipped={}",
                summary.frames_sent,
                summary.classified,
                summary.skipped
            );
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    parse_request(&data)
}

fn parse_request(data: &[u8]) -> Result<HttpRequest> {
    let text = String::from_utf8_lossy(data);
    let request_line = text
        .split("\r\n")
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body.as_bytes())?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}
