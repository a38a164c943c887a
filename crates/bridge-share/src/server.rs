//! Share server (spec.md §4.C): file/directory download, preview, and
//! upload over a local axum server, fronted by the tunnel. Grounded on
//! `share_server.py`'s `ShareServer`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::html;
use crate::paths::safe_resolve;
use crate::sink::UploadSink;
use crate::token::{self, MAX_UPLOAD_FILES, MAX_UPLOAD_FILE_BYTES};

const INLINE_TYPES: &[&str] = &["image/", "application/pdf"];

/// Shared state for the share server's handlers.
pub struct ShareState {
    secret: String,
    workspace_roots: RwLock<Vec<PathBuf>>,
    sink: Option<Arc<dyn UploadSink>>,
}

impl ShareState {
    pub fn new(secret: String, workspace_roots: Vec<PathBuf>, sink: Option<Arc<dyn UploadSink>>) -> Arc<Self> {
        Arc::new(Self {
            secret,
            workspace_roots: RwLock::new(workspace_roots),
            sink,
        })
    }

    /// Snapshot of every registered workspace root, for callers that need to
    /// resolve an absolute path back to `(workspace, rel)` themselves (e.g.
    /// the delivery pipeline's marker rewriter).
    pub async fn workspace_roots(&self) -> Vec<PathBuf> {
        self.workspace_roots.read().await.clone()
    }

    /// Register a workspace root dynamically (e.g. when a new topic is created).
    pub async fn add_workspace(&self, workspace: PathBuf) {
        let resolved = workspace.canonicalize().unwrap_or(workspace);
        let mut roots = self.workspace_roots.write().await;
        if !roots.iter().any(|r| r == &resolved) {
            info!(path = %resolved.display(), "registered share workspace root");
            roots.push(resolved);
        }
    }

    /// Generate a signed `/f/...` token scoped to `workspace`.
    pub async fn file_token(&self, workspace: &Path, rel: &str, ttl: std::time::Duration) -> crate::Result<String> {
        let payload = format!("f:{}:{}", workspace.display(), rel);
        token::generate_token(&payload, ttl, &self.secret)
    }

    /// Generate a signed `/p/...` token scoped to `workspace`.
    pub async fn preview_token(&self, workspace: &Path, rel: &str, ttl: std::time::Duration) -> crate::Result<String> {
        let payload = format!("p:{}:{}", workspace.display(), rel);
        token::generate_token(&payload, ttl, &self.secret)
    }

    /// Generate a signed `/u/...` upload token scoped to `workspace`.
    pub async fn upload_token(&self, workspace: &Path, ttl: std::time::Duration) -> crate::Result<String> {
        let payload = format!("upload:{}", workspace.display());
        token::generate_token(&payload, ttl, &self.secret)
    }

    async fn verify_with_workspace(&self, tok: &str, prefix: &str, rel_path: &str) -> Option<PathBuf> {
        let roots = self.workspace_roots.read().await;
        roots
            .iter()
            .find(|root| {
                let payload = format!("{prefix}:{}:{rel_path}", root.display());
                token::verify_token(tok, &payload, &self.secret)
            })
            .cloned()
    }

    async fn verify_upload_workspace(&self, tok: &str) -> Option<PathBuf> {
        let roots = self.workspace_roots.read().await;
        roots
            .iter()
            .find(|root| token::verify_token(tok, &format!("upload:{}", root.display()), &self.secret))
            .cloned()
    }

    async fn find_file(&self, rel_path: &str, workspace: Option<&Path>) -> Option<PathBuf> {
        match workspace {
            Some(ws) => safe_resolve(ws, rel_path).filter(|p| p.is_file()),
            None => {
                let roots = self.workspace_roots.read().await;
                for root in roots.iter() {
                    if let Some(p) = safe_resolve(root, rel_path) {
                        if p.is_file() {
                            return Some(p);
                        }
                    }
                }
                None
            }
        }
    }

    async fn find_dir(&self, rel_path: &str, workspace: Option<&Path>) -> Option<PathBuf> {
        match workspace {
            Some(ws) => safe_resolve(ws, rel_path).filter(|p| p.is_dir()),
            None => {
                let roots = self.workspace_roots.read().await;
                for root in roots.iter() {
                    if let Some(p) = safe_resolve(root, rel_path) {
                        if p.is_dir() {
                            return Some(p);
                        }
                    }
                }
                None
            }
        }
    }

    async fn first_workspace(&self) -> Option<PathBuf> {
        self.workspace_roots.read().await.first().cloned()
    }
}

/// Build the axum router for the share server.
pub fn router(state: Arc<ShareState>) -> Router {
    Router::new()
        .route("/f/{token}/{*path}", get(handle_file))
        .route("/p/{token}/{*path}", get(handle_preview))
        .route("/p/{token}/", get(handle_preview_root))
        .route("/u/{token}", get(handle_upload_page))
        .route("/u/{token}/upload", post(handle_upload))
        .with_state(state)
}

fn expired() -> Response {
    (
        StatusCode::GONE,
        [(header::CONTENT_TYPE, "text/html")],
        html::EXPIRED_HTML,
    )
        .into_response()
}

fn file_response(path: &Path) -> Response {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    serve_bytes(path, bytes)
}

fn serve_bytes(path: &Path, body: Vec<u8>) -> Response {
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    let disposition_kind = if INLINE_TYPES.iter().any(|t| content_type.starts_with(t)) {
        "inline"
    } else {
        "attachment"
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let safe_name = utf8_percent_encode(&name, NON_ALPHANUMERIC).to_string();

    let mut resp = (
        [
            (header::CONTENT_TYPE, content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("{disposition_kind}; filename*=UTF-8''{safe_name}"),
            ),
            (header::HeaderName::from_static("x-content-type-options"), "nosniff".to_string()),
        ],
        body,
    )
        .into_response();

    if content_type.starts_with("text/html") {
        resp.headers_mut().insert(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'none'; style-src 'unsafe-inline'; img-src data: https:;"
                .parse()
                .unwrap(),
        );
    }
    resp
}

async fn handle_file(
    State(state): State<Arc<ShareState>>,
    AxumPath((tok, path)): AxumPath<(String, String)>,
) -> Response {
    let workspace = state.verify_with_workspace(&tok, "f", &path).await;
    let verified = match &workspace {
        Some(_) => true,
        None => token::verify_token(&tok, &format!("f:{path}"), &state.secret),
    };
    if !verified {
        return expired();
    }

    match state.find_file(&path, workspace.as_deref()).await {
        Some(file_path) => file_response(&file_path),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_preview_root(
    state: State<Arc<ShareState>>,
    AxumPath(tok): AxumPath<String>,
) -> Response {
    handle_preview(state, AxumPath((tok, String::new()))).await
}

async fn handle_preview(
    State(state): State<Arc<ShareState>>,
    AxumPath((tok, path)): AxumPath<(String, String)>,
) -> Response {
    let mut workspace = state.verify_with_workspace(&tok, "p", &path).await;

    if workspace.is_none() {
        let mut parent = path.as_str();
        while let Some((head, _)) = parent.rsplit_once('/') {
            parent = head;
            workspace = state.verify_with_workspace(&tok, "p", parent).await;
            if workspace.is_some() {
                break;
            }
        }
    }

    if workspace.is_none() {
        let mut verified = token::verify_token(&tok, &format!("p:{path}"), &state.secret);
        if !verified {
            let mut parent = path.as_str();
            while let Some((head, _)) = parent.rsplit_once('/') {
                parent = head;
                if token::verify_token(&tok, &format!("p:{parent}"), &state.secret) {
                    verified = true;
                    break;
                }
            }
        }
        if !verified {
            return expired();
        }
    }

    let Some(dir_path) = state.find_dir(&path, workspace.as_deref()).await else {
        if let Some(file_path) = state.find_file(&path, workspace.as_deref()).await {
            return file_response(&file_path);
        }
        return StatusCode::NOT_FOUND.into_response();
    };

    let index = dir_path.join("index.html");
    if index.is_file() {
        let mut resp = file_response(&index);
        resp.headers_mut().insert(
            header::CONTENT_SECURITY_POLICY,
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; script-src 'self';"
                .parse()
                .unwrap(),
        );
        return resp;
    }

    let mut entries: Vec<(String, bool)> = std::fs::read_dir(&dir_path)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| {
            let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (e.file_name().to_string_lossy().to_string(), is_dir)
        })
        .collect();
    entries.sort();

    let title = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "Files".to_string());
    let page = html::directory_listing(&title, &tok, &path, &entries);

    let mut resp = ([(header::CONTENT_TYPE, "text/html")], page).into_response();
    resp.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        "default-src 'none'; style-src 'unsafe-inline';".parse().unwrap(),
    );
    resp
}

async fn handle_upload_page(State(state): State<Arc<ShareState>>, AxumPath(tok): AxumPath<String>) -> Response {
    let workspace = state.verify_upload_workspace(&tok).await;
    if workspace.is_none() && !token::verify_token(&tok, "upload", &state.secret) {
        return expired();
    }
    ([(header::CONTENT_TYPE, "text/html")], html::upload_page()).into_response()
}

async fn handle_upload(
    State(state): State<Arc<ShareState>>,
    AxumPath(tok): AxumPath<String>,
    mut multipart: Multipart,
) -> Response {
    let workspace = match state.verify_upload_workspace(&tok).await {
        Some(ws) => Some(ws),
        None => {
            if !token::verify_token(&tok, "upload", &state.secret) {
                return expired();
            }
            state.first_workspace().await
        }
    };
    let Some(workspace) = workspace else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no workspace configured").into_response();
    };

    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_string();
    let upload_dir = workspace.join("tmp").join("uploads").join(format!("{timestamp}-{suffix}"));
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        warn!(error = %e, "failed to create upload dir");
        return (StatusCode::INTERNAL_SERVER_ERROR, "could not create upload dir").into_response();
    }

    let mut filenames: Vec<String> = Vec::new();
    let mut description = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&upload_dir);
                return (StatusCode::BAD_REQUEST, format!("multipart error: {e}")).into_response();
            }
        };

        let name = field.name().unwrap_or("").to_string();
        if name == "description" {
            description = field.text().await.unwrap_or_default();
            continue;
        }
        if name != "files" && name != "file" {
            continue;
        }
        let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        if filenames.len() >= MAX_UPLOAD_FILES {
            let _ = std::fs::remove_dir_all(&upload_dir);
            return (StatusCode::BAD_REQUEST, format!("too many files (max {MAX_UPLOAD_FILES})")).into_response();
        }

        let safe_name = sanitize_filename(&file_name, filenames.len());
        let safe_name = dedupe_filename(safe_name, &filenames, filenames.len());

        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&upload_dir);
                return (StatusCode::BAD_REQUEST, format!("upload read error: {e}")).into_response();
            }
        };
        if bytes.len() as u64 > MAX_UPLOAD_FILE_BYTES {
            let _ = std::fs::remove_dir_all(&upload_dir);
            return (StatusCode::PAYLOAD_TOO_LARGE, "file too large").into_response();
        }

        let file_path = upload_dir.join(&safe_name);
        if let Err(e) = std::fs::write(&file_path, &bytes) {
            warn!(error = %e, "failed to write uploaded file");
            let _ = std::fs::remove_dir_all(&upload_dir);
            return (StatusCode::INTERNAL_SERVER_ERROR, "could not write file").into_response();
        }
        info!(file = %safe_name, bytes = bytes.len(), "uploaded file");
        filenames.push(safe_name);
    }

    if filenames.is_empty() {
        let _ = std::fs::remove_dir(&upload_dir);
        return (StatusCode::BAD_REQUEST, "no files uploaded").into_response();
    }

    if let Some(sink) = &state.sink {
        sink.on_upload(&upload_dir, &filenames, &description).await;
    }

    axum::Json(json!({"status": "ok", "files": filenames})).into_response()
}

fn sanitize_filename(raw: &str, index: usize) -> String {
    let name = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.is_empty() || name.starts_with('.') {
        format!("file_{index}")
    } else {
        name
    }
}

fn dedupe_filename(name: String, existing: &[String], index: usize) -> String {
    if !existing.contains(&name) {
        return name;
    }
    let path = Path::new(&name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    format!("{stem}_{index}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd", 0), "passwd");
        assert_eq!(sanitize_filename(".hidden", 0), "file_0");
        assert_eq!(sanitize_filename("", 2), "file_2");
    }

    #[test]
    fn dedupe_renames_collision() {
        let existing = vec!["report.pdf".to_string()];
        assert_eq!(dedupe_filename("report.pdf".to_string(), &existing, 1), "report_1.pdf");
        assert_eq!(dedupe_filename("unique.pdf".to_string(), &existing, 1), "unique.pdf");
    }
}
