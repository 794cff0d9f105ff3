//! Inbound demultiplexer
//!
//! Drains frames from the remote peer and writes their payloads to the
//! local stdout and stderr sinks. The remote peer decides when the streams
//! end; a failed local write is logged and the session carries on.
//!
//! End of stream arrives in one of two forms and both are honored:
//! a frame with `more: false`, or a `StdOut` frame whose payload is exactly
//! [`tk_protocol::LEGACY_END_SENTINEL`] (peers older than schema 1.1).
//!
//! This flow owns the local control handle and closes the local connection
//! on every exit path.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use tk_core::traits::{LocalControl, LocalWriter};
use tk_core::{ExecError, ExecStatus};
use tk_protocol::{InboundFrame, StreamKind};

use super::session::SessionState;

/// Local sinks the demultiplexer writes to
pub(crate) struct LocalSinks {
    pub stdout: LocalWriter,
    pub stderr: LocalWriter,
    pub control: Arc<dyn LocalControl>,
}

pub(crate) async fn run(
    state: Arc<SessionState>,
    mut frames: mpsc::Receiver<InboundFrame>,
    mut sinks: LocalSinks,
) -> Result<(), ExecError> {
    let result = demux(&state, &mut frames, &mut sinks).await;
    sinks.control.close().await;
    result
}

async fn demux(
    state: &SessionState,
    frames: &mut mpsc::Receiver<InboundFrame>,
    sinks: &mut LocalSinks,
) -> Result<(), ExecError> {
    loop {
        let frame = tokio::select! {
            _ = state.cancelled() => {
                tracing::debug!(request_id = %state.request_id, "Inbound demultiplexer cancelled");
                return Ok(());
            }
            _ = sinks.control.closed() => {
                tracing::info!(request_id = %state.request_id, "Local connection closed");
                state.request_stop().await;
                return Ok(());
            }
            frame = frames.recv() => frame,
        };

        let Some(frame) = frame else {
            tracing::info!(request_id = %state.request_id, "Remote frame channel closed");
            state.request_stop().await;
            return Ok(());
        };

        if frame.is_legacy_end_marker() {
            tracing::debug!(request_id = %state.request_id, "Received legacy end-of-stream marker");
            state.request_stop().await;
            return Ok(());
        }

        match frame.kind {
            StreamKind::StdOut | StreamKind::StdErr => {
                let (sink, name) = match frame.kind {
                    StreamKind::StdOut => (&mut sinks.stdout, "stdout"),
                    _ => (&mut sinks.stderr, "stderr"),
                };
                tokio::select! {
                    _ = state.cancelled() => return Ok(()),
                    _ = sinks.control.closed() => {
                        tracing::info!(
                            request_id = %state.request_id,
                            "Local connection closed during {} write",
                            name
                        );
                        state.request_stop().await;
                        return Ok(());
                    }
                    _ = write_sink(state, sink, name, &frame.content) => {}
                }
            }
            StreamKind::Error => {
                let message = frame.error_message();
                tracing::warn!(request_id = %state.request_id, "Remote exec failed: {}", message);
                if sinks.control.supports_status() {
                    if let Err(e) = sinks
                        .control
                        .write_status(&ExecStatus::failure(message.clone()))
                        .await
                    {
                        tracing::error!(
                            request_id = %state.request_id,
                            "Failed to write failure status: {}",
                            e
                        );
                    }
                }
                return Err(ExecError::Remote(message));
            }
            StreamKind::Unknown => {
                tracing::warn!(request_id = %state.request_id, "Skipping inbound frame of unknown type");
            }
        }

        if !frame.more {
            tracing::debug!(request_id = %state.request_id, "Remote streams ended");
            state.request_stop().await;
            return Ok(());
        }
    }
}

async fn write_sink(state: &SessionState, sink: &mut LocalWriter, name: &str, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    if let Err(e) = sink.write_all(data).await {
        tracing::error!(
            request_id = %state.request_id,
            "Failed to write {} bytes to local {}: {}",
            data.len(),
            name,
            e
        );
        return;
    }
    if let Err(e) = sink.flush().await {
        tracing::warn!(request_id = %state.request_id, "Failed to flush local {}: {}", name, e);
    }
}
