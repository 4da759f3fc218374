//! HTTP media server: one MJPEG stream and one JSON status endpoint per
//! camera.
//!
//! Streams are pull-based. Each request gets its own waiter on the camera's
//! frame slot, so a slow viewer only ever skips frames.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::{BufMut, Bytes, BytesMut};
use labrig_devices::{CameraController, CameraKind, Frame};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How long a stream waits for a fresh frame before emitting a placeholder.
pub const FRAME_WAIT: Duration = Duration::from_secs(5);

const BOUNDARY: &str = "frame";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("stream path `{0}` must start with `/`")]
    BadPath(String),
    #[error("route `{0}` is claimed twice")]
    PathConflict(String),
    #[error("media server: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct MediaState {
    pub thermal: Arc<CameraController>,
    pub webcam: Arc<CameraController>,
}

impl MediaState {
    fn camera(&self, kind: CameraKind) -> Arc<CameraController> {
        match kind {
            CameraKind::Thermal => self.thermal.clone(),
            CameraKind::Webcam => self.webcam.clone(),
        }
    }
}

/// Routes: each camera's configured stream path plus `/thermal.json` and
/// `/webcam.json`.
pub fn router(state: MediaState) -> Result<Router, MediaError> {
    let routes = [
        state.thermal.stream_path().to_string(),
        state.webcam.stream_path().to_string(),
        "/thermal.json".to_string(),
        "/webcam.json".to_string(),
    ];
    for (i, path) in routes.iter().enumerate() {
        if !path.starts_with('/') {
            return Err(MediaError::BadPath(path.clone()));
        }
        if routes[..i].contains(path) {
            return Err(MediaError::PathConflict(path.clone()));
        }
    }

    Ok(Router::new()
        .route(
            &routes[0],
            get(|State(state): State<MediaState>| async move {
                mjpeg(state.camera(CameraKind::Thermal)).await
            }),
        )
        .route(
            &routes[1],
            get(|State(state): State<MediaState>| async move {
                mjpeg(state.camera(CameraKind::Webcam)).await
            }),
        )
        .route(
            "/thermal.json",
            get(|State(state): State<MediaState>| async move {
                Json(state.thermal.status())
            }),
        )
        .route(
            "/webcam.json",
            get(|State(state): State<MediaState>| async move {
                Json(state.webcam.status())
            }),
        )
        .with_state(state))
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve_media(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), MediaError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "media server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("media server stopped");
    Ok(())
}

async fn mjpeg(camera: Arc<CameraController>) -> Response {
    let availability = camera.availability();
    if !availability.available && camera.latest().is_none() {
        let reason = availability.error.unwrap_or_else(|| "unknown".into());
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{}_unavailable:{reason}", camera.kind().as_str()),
        )
            .into_response();
    }

    debug!(camera = camera.kind().as_str(), "stream opened");
    let body = Body::from_stream(frame_stream(camera, FRAME_WAIT));
    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .header(
            header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate, max-age=0",
        )
        .header(header::PRAGMA, "no-cache")
        .header(header::CONNECTION, "close")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(body)
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Endless multipart parts: a frame part per new frame, a placeholder part
/// whenever `wait` elapses without one.
fn frame_stream(
    camera: Arc<CameraController>,
    wait: Duration,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold((camera, 0u64), move |(camera, last_id)| async move {
        let kind = camera.kind();
        let (part, last_id) = match camera.wait_for_frame(last_id, wait).await {
            Some(frame) => (frame_part(kind, &frame), frame.id),
            None => (placeholder_part(kind), last_id),
        };
        Some((Ok(part), (camera, last_id)))
    })
}

pub fn frame_part(kind: CameraKind, frame: &Frame) -> Bytes {
    let mut headers = format!(
        "--{BOUNDARY}\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {}\r\n\
         X-Frame-Id: {}\r\n\
         X-Updated-At-Ms: {}\r\n\
         X-FPS: {:.2}\r\n",
        frame.jpeg.len(),
        frame.id,
        frame.updated_at_ms,
        frame.fps.unwrap_or(0.0),
    );
    if kind == CameraKind::Thermal
        && let Some(temps) = frame.temps
    {
        headers.push_str(&format!(
            "X-Max-Temp-C: {:.2}\r\nX-Min-Temp-C: {:.2}\r\n",
            temps.max_c, temps.min_c
        ));
    }
    headers.push_str("\r\n");

    let mut part = BytesMut::with_capacity(headers.len() + frame.jpeg.len() + 2);
    part.put_slice(headers.as_bytes());
    part.put_slice(&frame.jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

pub fn placeholder_part(kind: CameraKind) -> Bytes {
    Bytes::from(format!(
        "--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nwaiting_for_{}_frame\r\n",
        kind.as_str()
    ))
}
