//! Unix-domain-socket listener and per-connection plumbing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chadbot_core::connection::{ConnectionId, FrameHandler, PluginStream};
use chadbot_core::error::{ProtocolError, TransportError, TransportResult};
use chadbot_core::protocol::OutboundFrame;

use crate::codec::{MAX_FRAME_BYTES, decode_inbound, encode_outbound};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct UnixServerConfig {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Tried when binding `path` fails with a permission error (the default
    /// `/var/run` location is root-only).
    pub fallback_path: Option<PathBuf>,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}

impl Default for UnixServerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/run/chadbot.sock"),
            fallback_path: Some(PathBuf::from("/tmp/chadbot.sock")),
            queue_capacity: 256,
        }
    }
}

/// Handle to a running listener.
///
/// Dropping it (or calling [`stop`](Self::stop)) shuts the listener down and
/// removes the socket file.
pub struct ServerHandle {
    path: PathBuf,
    shutdown: CancellationToken,
}

impl ServerHandle {
    /// The path the listener actually bound (may be the fallback).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token cancelled when the server stops.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stops the listener and removes the socket file.
    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

/// Unix-domain-socket frame server.
pub struct UnixServer;

impl UnixServer {
    /// Binds the socket and starts accepting plugin connections, handing
    /// every frame to `handler`.
    pub async fn bind(
        config: UnixServerConfig,
        handler: Arc<dyn FrameHandler>,
    ) -> TransportResult<ServerHandle> {
        let (listener, path) = bind_with_fallback(&config)?;
        info!(path = %path.display(), "Plugin socket listening");

        let shutdown = CancellationToken::new();
        let accept_token = shutdown.clone();
        let queue_capacity = config.queue_capacity;

        tokio::spawn(async move {
            let next_id = AtomicU64::new(1);
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _addr)) => {
                            let id = ConnectionId(next_id.fetch_add(1, Ordering::Relaxed));
                            let handler = Arc::clone(&handler);
                            let conn_token = accept_token.child_token();
                            tokio::spawn(async move {
                                run_connection(id, stream, handler, conn_token, queue_capacity)
                                    .await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept failed");
                        }
                    },
                    () = accept_token.cancelled() => {
                        info!("Plugin socket shutting down");
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle { path, shutdown })
    }
}

/// Binds the configured path, clearing stale socket files and falling back
/// to the secondary path on permission errors.
fn bind_with_fallback(config: &UnixServerConfig) -> TransportResult<(UnixListener, PathBuf)> {
    match bind_path(&config.path) {
        Ok(listener) => Ok((listener, config.path.clone())),
        Err(primary_err) => {
            let Some(fallback) = &config.fallback_path else {
                return Err(primary_err);
            };
            warn!(
                path = %config.path.display(),
                fallback = %fallback.display(),
                error = %primary_err,
                "Primary socket path unavailable, trying fallback"
            );
            bind_path(fallback).map(|l| (l, fallback.clone()))
        }
    }
}

fn bind_path(path: &Path) -> TransportResult<UnixListener> {
    if path.exists() {
        // A leftover socket from an unclean shutdown binds as AddrInUse even
        // though nothing is listening; probe it before giving up.
        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_) => {
                return Err(TransportError::Bind {
                    path: path.display().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "another broker is listening on this socket",
                    ),
                });
            }
            Err(_) => {
                debug!(path = %path.display(), "Removing stale socket file");
                let _ = std::fs::remove_file(path);
            }
        }
    }
    UnixListener::bind(path).map_err(|e| TransportError::Bind {
        path: path.display().to_string(),
        source: e,
    })
}

/// Drives one plugin connection to completion.
async fn run_connection(
    id: ConnectionId,
    stream: UnixStream,
    handler: Arc<dyn FrameHandler>,
    token: CancellationToken,
    queue_capacity: usize,
) {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    let framed = Framed::new(stream, codec);
    let (mut sink, mut inbound) = framed.split();

    let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(queue_capacity);
    let plugin_stream = PluginStream::new(id, frame_tx, token.clone());

    handler.on_connect(plugin_stream.clone()).await;
    debug!(conn = %id, "Plugin connection started");

    // Writer: the only task touching the write half, so frames from any
    // producer are serialized.
    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let body = match encode_outbound(&frame) {
                        Ok(body) => body,
                        Err(e) => {
                            error!(conn = %id, error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(body).await {
                        debug!(conn = %id, error = %e, "Write failed, closing");
                        writer_token.cancel();
                        break;
                    }
                }
                () = writer_token.cancelled() => break,
            }
        }
    });

    // Reader: frames are handed to the handler one at a time, preserving
    // per-plugin order.
    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(body)) => match decode_inbound(&body) {
                    Ok(frame) => handler.on_frame(id, frame).await,
                    Err(e @ ProtocolError::VersionMismatch { .. }) => {
                        warn!(conn = %id, error = %e, "Protocol version mismatch, closing");
                        let _ = plugin_stream
                            .send(OutboundFrame::Error {
                                code: 0,
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                    Err(e) => {
                        warn!(conn = %id, error = %e, "Malformed frame");
                        let _ = plugin_stream
                            .send(OutboundFrame::Error {
                                code: 0,
                                message: e.to_string(),
                            })
                            .await;
                    }
                },
                Some(Err(e)) => {
                    debug!(conn = %id, error = %e, "Read failed");
                    break;
                }
                None => {
                    debug!(conn = %id, "Peer closed the stream");
                    break;
                }
            },
            () = token.cancelled() => break,
        }
    }

    token.cancel();
    handler.on_disconnect(id).await;
    writer.abort();
    debug!(conn = %id, "Plugin connection closed");
}
