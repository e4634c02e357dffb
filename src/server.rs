//! HTTP surface: one POST endpoint that answers with a PDF attachment or a
//! JSON error.

use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::render::Renderer;
use crate::validate::RenderRequest;
use crate::{Error, Launcher};

/// Route accepting `{"url": "..."}`
pub const GENERATE_PDF_PATH: &str = "/api/generate-pdf";

/// Liveness probe route
pub const HEALTH_PATH: &str = "/health";

/// Filename offered in `Content-Disposition`
pub const PDF_FILENAME: &str = "page.pdf";

const BROWSER_UNAVAILABLE: &str = "Failed to initialize browser. Please try again later.";
const GENERATION_FAILED: &str = "PDF Generation Failed";

/// Shared handler state
pub struct AppState<L> {
    renderer: Arc<Renderer<L>>,
}

impl<L> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            renderer: self.renderer.clone(),
        }
    }
}

/// Build the service router
pub fn router<L: Launcher>(renderer: Arc<Renderer<L>>) -> Router {
    Router::new()
        .route(GENERATE_PDF_PATH, post(generate_pdf::<L>))
        .route(HEALTH_PATH, get(health))
        .with_state(AppState { renderer })
}

/// Serve until `shutdown` resolves
pub async fn serve<L, F>(
    listener: TcpListener,
    renderer: Arc<Renderer<L>>,
    shutdown: F,
) -> std::io::Result<()>
where
    L: Launcher,
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}{}", addr, GENERATE_PDF_PATH);
    }
    axum::serve(listener, router(renderer))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn generate_pdf<L: Launcher>(
    State(state): State<AppState<L>>,
    body: Bytes,
) -> Result<PdfAttachment, Error> {
    // Raw bytes rather than `Json` so malformed bodies get our error shape
    let request = RenderRequest::from_slice(&body)?;
    let pdf = state.renderer.render(&request.url).await?;
    Ok(PdfAttachment(pdf))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// A rendered PDF offered as a download
pub struct PdfAttachment(pub Vec<u8>);

impl IntoResponse for PdfAttachment {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", PDF_FILENAME);
        let disposition = HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
                (header::CONTENT_DISPOSITION, disposition),
                (header::CONTENT_LENGTH, HeaderValue::from(self.0.len())),
            ],
            self.0,
        )
            .into_response()
    }
}

/// JSON error payload
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        match err {
            Error::Validation(_) | Error::Navigation(_) => ErrorBody {
                error: err.to_string(),
                message: None,
            },
            Error::BrowserUnavailable(detail) => ErrorBody {
                error: BROWSER_UNAVAILABLE.to_string(),
                message: Some(detail.clone()),
            },
            other => ErrorBody {
                error: GENERATION_FAILED.to_string(),
                message: Some(other.to_string()),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Error generating PDF: {}", self);
        } else {
            info!("Rejected render request: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
