//! Control API.
//!
//! A small HTTP/1.1 server on its own thread that exposes the registry:
//! - `GET  /health`
//! - `GET  /stream/status`
//! - `POST /stream/start`  `{camera_id, rtsp_url, company_id, location_id, callback_url, frame_interval?}`
//! - `POST /stream/stop`   `{camera_id}`
//! - `POST /camera/probe`  `{rtsp_url}`
//!
//! When a shared secret is configured every route except `/health` requires a
//! matching `x-api-secret` header. Requests are handled one at a time.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ingest::{probe_source, CaptureSource};
use crate::stream::{StreamConfig, StreamRegistry, StreamStatus, API_SECRET_HEADER};

const MAX_REQUEST_BYTES: usize = 16 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub secret: Option<String>,
    /// Applied when a start request omits `frame_interval`.
    pub default_frame_interval: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8800".to_string(),
            secret: None,
            default_frame_interval: crate::stream::DEFAULT_FRAME_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("control api thread panicked"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StreamStartRequest {
    camera_id: String,
    rtsp_url: String,
    company_id: String,
    location_id: String,
    callback_url: String,
    frame_interval: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamStopRequest {
    camera_id: String,
}

#[derive(Debug, Deserialize)]
struct ProbeRequest {
    rtsp_url: String,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    success: bool,
    message: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    active_streams: Vec<StreamStatus>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub struct ApiServer {
    cfg: ApiConfig,
    registry: Arc<StreamRegistry>,
    capture: Arc<dyn CaptureSource>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        registry: Arc<StreamRegistry>,
        capture: Arc<dyn CaptureSource>,
    ) -> Self {
        Self {
            cfg,
            registry,
            capture,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("control-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &self, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, server: &ApiServer, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, server) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: &ApiServer) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_error(&mut stream, 403, "forbidden")?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_error(&mut stream, 400, "bad_request")?;
            return Err(err);
        }
    };

    if request.path == "/health" {
        return write_json(&mut stream, 200, &serde_json::json!({"status": "ok"}));
    }

    if let Some(expected) = &server.cfg.secret {
        if request.headers.get(API_SECRET_HEADER) != Some(expected) {
            write_error(&mut stream, 401, "invalid_secret")?;
            return Err(anyhow!("missing or invalid {} header", API_SECRET_HEADER));
        }
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/stream/status") => write_json(
            &mut stream,
            200,
            &StatusResponse {
                active_streams: server.registry.status(),
            },
        ),
        ("POST", "/stream/start") => {
            let body: StreamStartRequest = match parse_body(&request) {
                Ok(body) => body,
                Err(err) => return write_error(&mut stream, 400, &err.to_string()),
            };
            let camera_id = body.camera_id.clone();
            let config = StreamConfig {
                camera_id: body.camera_id,
                source_url: body.rtsp_url,
                company_id: body.company_id,
                location_id: body.location_id,
                callback_url: body.callback_url,
                frame_interval: body
                    .frame_interval
                    .unwrap_or(server.cfg.default_frame_interval),
            };
            match server.registry.start_stream(config) {
                Ok(true) => write_action(
                    &mut stream,
                    true,
                    format!("Stream started for camera {camera_id}"),
                ),
                Ok(false) => write_action(
                    &mut stream,
                    false,
                    format!("Stream already running for camera {camera_id}"),
                ),
                Err(err) => write_error(&mut stream, 400, &format!("{err:#}")),
            }
        }
        ("POST", "/stream/stop") => {
            let body: StreamStopRequest = match parse_body(&request) {
                Ok(body) => body,
                Err(err) => return write_error(&mut stream, 400, &err.to_string()),
            };
            if server.registry.stop_stream(&body.camera_id) {
                write_action(
                    &mut stream,
                    true,
                    format!("Stream stopped for camera {}", body.camera_id),
                )
            } else {
                write_action(
                    &mut stream,
                    false,
                    format!("No active stream found for camera {}", body.camera_id),
                )
            }
        }
        ("POST", "/camera/probe") => {
            let body: ProbeRequest = match parse_body(&request) {
                Ok(body) => body,
                Err(err) => return write_error(&mut stream, 400, &err.to_string()),
            };
            let report = probe_source(server.capture.as_ref(), &body.rtsp_url);
            write_json(&mut stream, 200, &report)
        }
        (_, "/stream/status" | "/stream/start" | "/stream/stop" | "/camera/probe") => {
            write_error(&mut stream, 405, "method_not_allowed")
        }
        _ => write_error(&mut stream, 404, "not_found"),
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(request: &HttpRequest) -> Result<T> {
    serde_json::from_slice(&request.body).map_err(|e| anyhow!("invalid request body: {}", e))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_REQUEST_BYTES.saturating_sub(header_end) {
        return Err(anyhow!("request too large"));
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body,
    })
}

fn write_action(stream: &mut TcpStream, success: bool, message: String) -> Result<()> {
    write_json(stream, 200, &ActionResponse { success, message })
}

fn write_error(stream: &mut TcpStream, status: u16, error: &str) -> Result<()> {
    write_json(
        stream,
        status,
        &ErrorResponse {
            error: error.to_string(),
        },
    )
}

fn write_json<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}
