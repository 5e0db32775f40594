#![allow(dead_code)] // Test helpers appear unused when compiled independently

use futures::StreamExt;
use logfanout::{build_router, BuildId, FanoutConfig, FanoutRegistry, LogStore};
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub base_url: String,
    pub registry: Arc<FanoutRegistry>,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn events_url(&self, build: u64) -> String {
        format!("{}/api/v1/builds/{}/events", self.base_url, build)
    }

    pub fn viewer_url(&self, build: u64) -> String {
        logfanout::cli::commands::viewer_url(&self.base_url, BuildId::new(build)).unwrap()
    }

    /// Finish every build, then shut down. Viewers still holding their
    /// sockets open can keep connections alive, so the wait is bounded.
    pub async fn stop(mut self) {
        self.registry.close_all().await;
        let _ = self.shutdown_tx.send(());
        if tokio::time::timeout(STOP_TIMEOUT, &mut self.handle)
            .await
            .is_err()
        {
            self.handle.abort();
        }
    }
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Serve the fan-out router over `store` on an ephemeral loopback port.
pub async fn spawn_server(store: Arc<dyn LogStore>) -> TestServer {
    let registry = Arc::new(FanoutRegistry::new(store, FanoutConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server listener");
    let port = listener.local_addr().unwrap().port();

    let app = build_router(registry.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("test server error: {}", err);
        }
    });

    let base_url = format!("http://127.0.0.1:{}", port);
    wait_for_health(&Client::new(), &base_url).await;

    TestServer {
        base_url,
        registry,
        shutdown_tx,
        handle,
    }
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

/// POST one or more log messages to a build.
pub async fn post_messages(client: &Client, server: &TestServer, build: u64, body: &str) {
    let resp = client
        .post(server.events_url(build))
        .body(body.to_string())
        .send()
        .await
        .expect("failed to post log messages");
    assert!(
        resp.status().is_success(),
        "posting log messages failed: {:?}",
        resp.status()
    );
}

pub async fn connect_viewer(server: &TestServer, build: u64) -> Viewer {
    let (ws, _) = connect_async(server.viewer_url(build))
        .await
        .expect("failed to connect viewer");
    ws
}

/// Next data frame as bytes, or None once the server closes the stream.
pub async fn next_frame(viewer: &mut Viewer) -> Option<Vec<u8>> {
    loop {
        let msg = tokio::time::timeout(FRAME_TIMEOUT, viewer.next())
            .await
            .expect("timed out waiting for a frame");
        match msg {
            Some(Ok(Message::Text(text))) => return Some(text.into_bytes()),
            Some(Ok(Message::Binary(data))) => return Some(data),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

pub async fn next_text(viewer: &mut Viewer) -> String {
    let frame = next_frame(viewer).await.expect("stream closed early");
    String::from_utf8(frame).expect("frame was not utf-8")
}

/// Every remaining frame up to the server's close.
pub async fn frames_until_close(viewer: &mut Viewer) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(viewer).await {
        frames.push(frame);
    }
    frames
}

async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}
