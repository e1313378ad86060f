//! HTTP front door.
//!
//! - `PUT /files/upload`: multipart form with a `file` field; the field's
//!   file name is the file's identity.
//! - `GET /files/{file}`: streams the reassembled file back.
//!
//! Dropping a request (client disconnect) cancels its upload or download.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use reef_engine::{EngineError, FileEngine, FileSource};
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

/// Buffer between a download task and the response body.
const DOWNLOAD_PIPE: usize = 64 * 1024;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The form has no `file` field.
    #[error("missing multipart field \"file\"")]
    MissingFile,

    /// The upload exceeds the configured limit.
    #[error("file exceeds the {max} byte limit")]
    TooLarge {
        /// Configured maximum.
        max: u64,
    },

    /// The multipart body could not be read.
    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),

    /// Spooling the upload failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An error from the orchestrators.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFile => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart(e) => e.status(),
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => match e {
                EngineError::PlanNotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::InvalidIdentity(_) | EngineError::InvalidSize { .. } => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), format!("{self}\n")).into_response()
    }
}

#[derive(Clone)]
struct AppState {
    engine: Arc<dyn FileEngine>,
}

/// HTTP server over a [`FileEngine`].
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Build the router; the request body limit follows the engine's
    /// maximum file size.
    pub fn new(engine: Arc<dyn FileEngine>) -> Self {
        let body_limit = engine.max_file_size().saturating_add(MULTIPART_OVERHEAD);
        let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);
        let router = Router::new()
            .route("/files/upload", put(upload_file))
            .route("/files/{file}", get(download_file))
            .layer(DefaultBodyLimit::max(body_limit))
            .with_state(AppState { engine });
        Self { router }
    }

    /// Return the inner [`Router`] (useful for testing with `tower::ServiceExt`).
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `addr` until `shutdown` completes, then drain in-flight
    /// requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr, "HTTP server listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

// -----------------------------------------------------------------------
// Upload
// -----------------------------------------------------------------------

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let source = spool(field, state.engine.max_file_size()).await?;

        let cancel = CancellationToken::new();
        let _abort_on_disconnect = cancel.clone().drop_guard();
        let plan = state
            .engine
            .upload(&name, Arc::new(source), &cancel)
            .await?;

        info!(file = %name, size = plan.original_size, "file uploaded");
        let body = format!(
            "uploaded {name}: {} bytes in {} chunks\n",
            plan.original_size,
            plan.chunk_count()
        );
        return Ok((StatusCode::OK, body).into_response());
    }
    Err(ApiError::MissingFile)
}

/// Copy a multipart field into an anonymous temp file.
async fn spool(mut field: Field<'_>, max: u64) -> Result<FileSource, ApiError> {
    let file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(io::Error::other)??;
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await? {
        written += chunk.len() as u64;
        if written > max {
            return Err(ApiError::TooLarge { max });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let file = file.into_std().await;
    Ok(FileSource::from_file(file)?)
}

// -----------------------------------------------------------------------
// Download
// -----------------------------------------------------------------------

async fn download_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    // Resolve the plan first so a missing file is a clean 404.
    let plan = state.engine.plan(&file)?;

    let (mut writer, reader) = tokio::io::duplex(DOWNLOAD_PIPE);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let engine = Arc::clone(&state.engine);
    let name = file.clone();
    tokio::spawn(async move {
        match engine.download(&name, &mut writer, &cancel).await {
            Ok(bytes) => info!(file = %name, bytes, "file downloaded"),
            Err(e) => warn!(
                file = %name,
                bytes_written = e.bytes_written,
                error = %e.source,
                "download aborted"
            ),
        }
    });

    let body = Body::from_stream(ReaderStream::new(GuardedReader {
        inner: reader,
        _guard: guard,
    }));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, plan.original_size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file}\""),
        )
        .body(body)
        .map_err(io::Error::other)?;
    Ok(response)
}

/// Response body reader that cancels the download when the body is dropped.
struct GuardedReader {
    inner: DuplexStream,
    _guard: DropGuard,
}

impl AsyncRead for GuardedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}
