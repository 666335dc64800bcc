//! TCP transport for consensus messages
//!
//! Request/response over short-lived connections: the caller writes one
//! line-delimited JSON message and reads one line back. At the ≈1 s timer
//! scale of this group, connection reuse buys nothing worth the
//! bookkeeping.

use super::Message;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Per-call network budget; peers slower than this are treated as down
pub const CALL_TIMEOUT: Duration = Duration::from_millis(800);

/// An inbound request handed to the node task together with its reply slot
pub struct InboundRequest {
    pub message: Message,
    pub reply: oneshot::Sender<Message>,
}

/// Send one message and await the peer's reply.
pub async fn call(address: &str, message: &Message) -> Result<Message> {
    tokio::time::timeout(CALL_TIMEOUT, call_inner(address, message))
        .await
        .with_context(|| format!("raft call to {address} timed out"))?
}

async fn call_inner(address: &str, message: &Message) -> Result<Message> {
    let mut stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("failed to connect to peer {address}"))?;

    let mut frame = serde_json::to_vec(message).context("failed to encode raft message")?;
    frame.push(b'\n');
    stream
        .write_all(&frame)
        .await
        .with_context(|| format!("failed to send to peer {address}"))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .with_context(|| format!("failed to read reply from peer {address}"))?;
    serde_json::from_str(line.trim_end()).context("failed to decode raft reply")
}

/// Accept loop: forwards each inbound message to the node task and writes
/// the node's reply back. Runs until shutdown.
pub async fn serve(
    listener: TcpListener,
    requests: mpsc::Sender<InboundRequest>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let requests = requests.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, requests).await {
                                debug!(peer = %addr, error = %err, "raft connection failed");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "raft accept failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("raft transport shutting down");
                return;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    requests: mpsc::Sender<InboundRequest>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await.context("read failed")?;
    let message: Message =
        serde_json::from_str(line.trim_end()).context("malformed raft message")?;

    let (reply_tx, reply_rx) = oneshot::channel();
    requests
        .send(InboundRequest {
            message,
            reply: reply_tx,
        })
        .await
        .context("node task is gone")?;
    let reply = reply_rx.await.context("node task dropped the reply")?;

    let mut frame = serde_json::to_vec(&reply).context("failed to encode reply")?;
    frame.push(b'\n');
    let stream = reader.get_mut();
    stream.write_all(&frame).await.context("write failed")?;
    stream.flush().await.context("flush failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_roundtrips_through_serve() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (req_tx, mut req_rx) = mpsc::channel::<InboundRequest>(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(serve(listener, req_tx, shutdown_rx));

        // Echo-style responder standing in for the node task.
        tokio::spawn(async move {
            while let Some(req) = req_rx.recv().await {
                let reply = match req.message {
                    Message::RequestVote { term, .. } => Message::RequestVoteReply {
                        term,
                        granted: true,
                    },
                    Message::AppendEntries { term, .. } => Message::AppendEntriesReply {
                        term,
                        success: true,
                    },
                    other => other,
                };
                let _ = req.reply.send(reply);
            }
        });

        let reply = call(
            &address,
            &Message::RequestVote {
                term: 3,
                candidate_id: "a".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            reply,
            Message::RequestVoteReply {
                term: 3,
                granted: true
            }
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn call_to_dead_peer_fails_fast() {
        // A port nothing listens on; the connect must error, not hang.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = call(
            &address,
            &Message::AppendEntries {
                term: 1,
                leader_id: "a".to_string(),
            },
        )
        .await;
        assert!(result.is_err());
    }
}
