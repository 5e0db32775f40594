use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Json, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use serde_json::value::RawValue;
use serde_json::Deserializer;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::build_id::BuildId;
use crate::fanout::FanoutError;
use crate::registry::FanoutRegistry;
use crate::sink::WebSocketSink;

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info).
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true))
            .with(filter)
            .init();
    }
}

pub fn build_router(registry: Arc<FanoutRegistry>) -> Router {
    Router::new()
        .route(
            "/api/v1/builds/:build_id/events",
            get(handle_attach)
                .post(handle_write)
                .delete(handle_close),
        )
        .route("/api/v1/builds/:build_id/status", get(handle_status))
        .route("/health", get(|| async { "ok" }))
        .with_state(registry)
}

/// Body of a write response. Batches are not atomic: on a persistence
/// failure `written` counts the messages already stored before it.
#[derive(Debug, serde::Serialize)]
pub struct WriteResponse {
    pub status: &'static str,
    pub written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusResponse {
    pub build_id: BuildId,
    pub finished: bool,
    pub clients: usize,
}

/// Split a request body into log messages. Accepts one JSON value or several
/// concatenated/newline-delimited ones; rejects the whole body if any fails.
fn parse_messages(body: &[u8]) -> Result<Vec<Box<RawValue>>, String> {
    let messages = Deserializer::from_slice(body)
        .into_iter::<Box<RawValue>>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid log message: {}", e))?;
    if messages.is_empty() {
        return Err("no log messages in body".to_string());
    }
    Ok(messages)
}

async fn handle_write(
    Path(build): Path<BuildId>,
    State(registry): State<Arc<FanoutRegistry>>,
    body: Bytes,
) -> Result<Json<WriteResponse>, (StatusCode, Json<WriteResponse>)> {
    let messages = parse_messages(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(WriteResponse {
                status: "error",
                written: 0,
                error: Some(e),
            }),
        )
    })?;

    let fanout = registry.get_or_create(build);
    for (written, msg) in messages.iter().enumerate() {
        if let Err(e) = fanout.write_message(msg).await {
            warn!(build_id = %build, written, error = %e, "failed to persist log message");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WriteResponse {
                    status: "error",
                    written,
                    error: Some(e.to_string()),
                }),
            ));
        }
    }

    Ok(Json(WriteResponse {
        status: "ok",
        written: messages.len(),
        error: None,
    }))
}

async fn handle_close(
    Path(build): Path<BuildId>,
    State(registry): State<Arc<FanoutRegistry>>,
) -> Result<StatusCode, (StatusCode, String)> {
    match registry.close(build).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err((
            StatusCode::NOT_FOUND,
            format!("build {} has no log stream", build),
        )),
        Err(FanoutError::ClosedTwice) => Err((
            StatusCode::CONFLICT,
            format!("build {} already finished", build),
        )),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn handle_status(
    Path(build): Path<BuildId>,
    State(registry): State<Arc<FanoutRegistry>>,
) -> Json<StatusResponse> {
    let clients = match registry.get(build) {
        Some(fanout) => fanout.live_sinks().await,
        None => 0,
    };
    Json(StatusResponse {
        build_id: build,
        finished: registry.is_finished(build),
        clients,
    })
}

async fn handle_attach(
    Path(build): Path<BuildId>,
    State(registry): State<Arc<FanoutRegistry>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_viewer(socket, build, registry))
}

/// Hand the socket's write half to the fan-out, then drain the read half
/// until the viewer goes away. Viewers have nothing to say; anything they
/// send besides a close is ignored.
async fn serve_viewer(socket: WebSocket, build: BuildId, registry: Arc<FanoutRegistry>) {
    let (tx, mut rx) = socket.split();

    let fanout = registry.get_or_create(build);
    if let Err(e) = fanout.attach(Box::new(WebSocketSink::new(tx))).await {
        debug!(build_id = %build, error = %e, "viewer attach failed");
        return;
    }
    drop(fanout);

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(build_id = %build, error = %e, "viewer connection error");
                break;
            }
        }
    }
    debug!(build_id = %build, "viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::FanoutConfig;
    use crate::store::{LogStore, MemoryLogStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts a fixed number of appends, then reports the disk as gone.
    struct FillingStore {
        inner: MemoryLogStore,
        room: AtomicUsize,
    }

    #[async_trait]
    impl LogStore for FillingStore {
        async fn read(&self, build: BuildId) -> Result<Bytes, StoreError> {
            self.inner.read(build).await
        }

        async fn append(&self, build: BuildId, chunk: &[u8]) -> Result<(), StoreError> {
            let left = self
                .room
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_err() {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.append(build, chunk).await
        }
    }

    fn registry_with_room(room: usize) -> Arc<FanoutRegistry> {
        let store = FillingStore {
            inner: MemoryLogStore::new(),
            room: AtomicUsize::new(room),
        };
        Arc::new(FanoutRegistry::new(Arc::new(store), FanoutConfig::default()))
    }

    #[test]
    fn parses_single_and_batched_messages() {
        let one = parse_messages(br#"{"line":"a"}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = parse_messages(b"{\"line\":\"a\"}\n{\"line\":\"b\"}\n").unwrap();
        let raw: Vec<&str> = many.iter().map(|m| m.get()).collect();
        assert_eq!(raw, vec![r#"{"line":"a"}"#, r#"{"line":"b"}"#]);
    }

    #[test]
    fn rejects_empty_and_malformed_bodies() {
        assert!(parse_messages(b"").is_err());
        assert!(parse_messages(b"   ").is_err());
        assert!(parse_messages(br#"{"line":"a"} nope"#).is_err());
    }

    #[tokio::test]
    async fn failed_batch_reports_messages_already_persisted() {
        let registry = registry_with_room(2);
        let body = Bytes::from_static(b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n{\"n\":4}\n");

        let (status, Json(resp)) = handle_write(
            Path(BuildId::new(5)),
            State(registry.clone()),
            body,
        )
        .await
        .unwrap_err();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.status, "error");
        assert_eq!(resp.written, 2);
        assert!(resp.error.unwrap().contains("disk full"));

        let log = registry.store().read(BuildId::new(5)).await.unwrap();
        assert_eq!(log.as_ref(), b"{\"n\":1}\n{\"n\":2}\n");
    }

    #[tokio::test]
    async fn whole_batch_written_on_success() {
        let registry = registry_with_room(usize::MAX);
        let Json(resp) = handle_write(
            Path(BuildId::new(5)),
            State(registry),
            Bytes::from_static(b"1 2 3"),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, "ok");
        assert_eq!(resp.written, 3);
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn closing_unknown_build_is_not_found() {
        let registry = registry_with_room(usize::MAX);
        let (status, _) = handle_close(Path(BuildId::new(6)), State(registry.clone()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!registry.is_finished(BuildId::new(6)));

        registry.get_or_create(BuildId::new(6));
        let status = handle_close(Path(BuildId::new(6)), State(registry.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = handle_close(Path(BuildId::new(6)), State(registry))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
