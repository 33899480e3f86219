//! stdio transport
//!
//! Newline-delimited JSON-RPC on stdin/stdout, one implicit session. A single
//! writer task owns stdout so responses and pushed notifications never
//! interleave mid-line.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{push_to_notification, JsonRpcRequest};
use super::service::McpService;
use crate::error::Result;
use crate::session::SessionHandle;

pub async fn run(service: McpService, shutdown: CancellationToken) -> Result<()> {
    let (session, mut pushes) = SessionHandle::channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    // Drain pushes into the shared writer.
    let push_tx = out_tx.clone();
    let pusher = tokio::spawn(async move {
        while let Some(push) = pushes.recv().await {
            if push_tx.send(push_to_notification(&push).to_string()).is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed, shutting down");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => {
                if let Some(response) = service.handle(&session, request) {
                    let encoded = serde_json::to_string(&response)
                        .unwrap_or_else(|_| String::from("{}"));
                    if out_tx.send(encoded).is_err() {
                        break;
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "unparseable request line");
                let reply = McpService::invalid_payload(format!("invalid request: {err}"));
                let encoded =
                    serde_json::to_string(&reply).unwrap_or_else(|_| String::from("{}"));
                if out_tx.send(encoded).is_err() {
                    break;
                }
            }
        }
    }

    service.release_session(session.id);
    drop(out_tx);
    pusher.abort();
    let _ = writer.await;
    Ok(())
}
