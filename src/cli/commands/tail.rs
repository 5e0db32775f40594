use anyhow::{bail, Result};
use futures::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::build_id::BuildId;
use crate::cli::TailArgs;

/// WebSocket URL of a build's event stream on the server at `base_url`.
pub fn viewer_url(base_url: &str, build: BuildId) -> Result<String> {
    let base_url = base_url.trim_end_matches('/');

    // Convert https:// to wss:// or http:// to ws://
    let ws_url = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if base_url.starts_with("ws://") || base_url.starts_with("wss://") {
        base_url.to_string()
    } else if base_url.contains("://") {
        bail!("Unsupported URL scheme: {}", base_url);
    } else {
        format!("ws://{}", base_url)
    };

    Ok(format!("{}/api/v1/builds/{}/events", ws_url, build))
}

pub async fn execute_tail(args: TailArgs) -> Result<()> {
    let url = viewer_url(&args.url, args.build)?;

    eprintln!("Connecting to {}...", url);

    let (ws_stream, _) = connect_async(&url).await?;
    let (_, mut read) = ws_stream.split();

    eprintln!("Connected. Streaming build {}...", args.build);

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                println!("{}", text);
            }
            Ok(Message::Binary(data)) => {
                println!("{}", String::from_utf8_lossy(&data));
            }
            Ok(Message::Close(_)) => {
                eprintln!("Build log closed by server");
                break;
            }
            Err(e) => {
                eprintln!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
