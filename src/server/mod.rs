//! Web control surface: status, vibration toggle, uploads and file serving.
//!
//! Routing is a pure function of the request so it can be exercised without
//! a socket; [`serve`] adapts it onto tiny_http with one thread per request.

pub mod multipart;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::io::Read;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::metadata::MetadataCache;
use crate::playlist::Library;
use crate::status::StatusBoard;

const INDEX_HTML: &str = include_str!("assets/index.html");

pub struct AppState {
    pub status: Arc<StatusBoard>,
    pub cache: Arc<MetadataCache>,
    pub library: Library,
    pub max_upload_bytes: u64,
}

impl AppState {
    pub fn new(status: Arc<StatusBoard>, cache: Arc<MetadataCache>, library: Library, config: &ServerConfig) -> Self {
        Self {
            status,
            cache,
            library,
            max_upload_bytes: config.max_upload_mb.saturating_mul(1024 * 1024),
        }
    }
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "error": message }).to_string().into_bytes(),
        }
    }
}

pub fn route(state: &AppState, method: &str, url: &str, content_type: Option<&str>, body: &[u8]) -> ApiResponse {
    let path = url.split(['?', '#']).next().unwrap_or(url);

    match (method, path) {
        ("GET", "/") => ApiResponse {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: INDEX_HTML.as_bytes().to_vec(),
        },
        ("GET", "/now") => ApiResponse::json(200, &state.status.report()),
        ("POST", "/vibration") => set_vibration(state, body),
        ("POST", "/upload") => upload(state, content_type, body),
        ("GET", p) if p.starts_with("/audio/") => serve_audio(state, &p["/audio/".len()..]),
        _ => ApiResponse::error(404, "Not found"),
    }
}

fn set_vibration(state: &AppState, body: &[u8]) -> ApiResponse {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return ApiResponse::error(400, &format!("Invalid JSON: {}", e)),
    };
    if !value.is_object() {
        return ApiResponse::error(400, "Expected a JSON object");
    }
    let on = value.get("on").and_then(|v| v.as_bool()).unwrap_or(false);
    state.status.set_vibration(on);
    log::info!("Vibration {}", if on { "enabled" } else { "disabled" });
    ApiResponse::json(200, &json!({ "status": "ok", "vibration": on }))
}

fn upload(state: &AppState, content_type: Option<&str>, body: &[u8]) -> ApiResponse {
    if body.len() as u64 > state.max_upload_bytes {
        return ApiResponse::error(413, "File too large");
    }
    let Some(boundary) = content_type.and_then(|ct| multipart::boundary(ct).ok()) else {
        return ApiResponse::error(400, "No file provided");
    };
    let parts = match multipart::parse(body, &boundary) {
        Ok(parts) => parts,
        Err(e) => return ApiResponse::error(400, &e.to_string()),
    };
    let Some(file) = parts.iter().find(|p| p.name.as_deref() == Some("file")) else {
        return ApiResponse::error(400, "No file provided");
    };

    let filename = match file.filename.as_deref().and_then(sanitize_filename) {
        Some(name) if state.library.is_allowed(&name) => name,
        _ => return ApiResponse::error(400, "Unsupported file type"),
    };

    let path = state.library.path(&filename);
    let stored = state
        .library
        .ensure_exists()
        .and_then(|_| std::fs::write(&path, file.data).map_err(anyhow::Error::from));
    if let Err(e) = stored {
        log::error!("Failed to store upload {}: {:#}", filename, e);
        return ApiResponse::error(500, &e.to_string());
    }
    log::info!("Uploaded {} ({} bytes)", filename, file.data.len());

    if let Err(e) = state.cache.get_or_compute(&path) {
        log::warn!("Uploaded {} could not be analysed: {}", filename, e);
    }
    ApiResponse::json(200, &json!({ "success": true, "filename": filename }))
}

fn serve_audio(state: &AppState, raw: &str) -> ApiResponse {
    let Some(name) = percent_decode(raw) else {
        return ApiResponse::error(404, "Not found");
    };
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return ApiResponse::error(404, "Not found");
    }
    match std::fs::read(state.library.path(&name)) {
        Ok(bytes) => ApiResponse {
            status: 200,
            content_type: audio_content_type(&name),
            body: bytes,
        },
        Err(e) => {
            log::debug!("Audio file {} not served: {}", name, e);
            ApiResponse::error(404, "Not found")
        }
    }
}

/// Reduce a client-supplied name to a safe basename of `[A-Za-z0-9_.-]`.
///
/// Path separators and whitespace become underscores, anything else outside
/// the set is dropped, and leading or trailing dots and underscores are
/// trimmed. Returns `None` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let spaced: String = name.chars().map(|c| if c == '/' || c == '\\' { ' ' } else { c }).collect();
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn audio_content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" | "aac" => "audio/aac",
        _ => "application/octet-stream",
    }
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = input.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

/// Serve until the listener fails.
pub fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let server = tiny_http::Server::http(bind).map_err(|e| anyhow!("Failed to bind {}: {}", bind, e))?;
    log::info!("Web interface listening on http://{}", bind);

    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        let spawned = std::thread::Builder::new()
            .name("http".into())
            .spawn(move || handle(&state, request));
        if let Err(e) = spawned {
            log::error!("Failed to spawn request thread: {}", e);
        }
    }
    Ok(())
}

fn handle(state: &AppState, mut request: tiny_http::Request) {
    let method = request.method().to_string();
    let url = request.url().to_string();
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());

    let limit = state.max_upload_bytes;
    let response = if request.body_length().is_some_and(|n| n as u64 > limit) {
        ApiResponse::error(413, "File too large")
    } else {
        let mut body = Vec::new();
        match request.as_reader().take(limit.saturating_add(1)).read_to_end(&mut body) {
            Ok(_) => route(state, &method, &url, content_type.as_deref(), &body),
            Err(e) => ApiResponse::error(400, &format!("Failed to read request body: {}", e)),
        }
    };
    log::debug!("{} {} -> {}", method, url, response.status);

    let mut reply = tiny_http::Response::from_data(response.body).with_status_code(response.status);
    if let Ok(header) = tiny_http::Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes()) {
        reply = reply.with_header(header);
    }
    if let Err(e) = request.respond(reply) {
        log::warn!("Failed to send response for {}: {}", url, e);
    }
}
