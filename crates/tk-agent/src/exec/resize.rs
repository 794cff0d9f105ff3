//! Resize forwarder
//!
//! Relays every decoded terminal size as its own resize frame, unbatched.
//! The resize stream ending does not end the session, so this flow never
//! requests a stop.

use std::sync::Arc;

use futures::StreamExt;

use tk_core::traits::ResizeStream;
use tk_core::ExecError;
use tk_protocol::OutboundPayload;

use super::session::SessionState;

pub(crate) async fn run(state: Arc<SessionState>, mut sizes: ResizeStream) -> Result<(), ExecError> {
    loop {
        let next = tokio::select! {
            _ = state.cancelled() => return Ok(()),
            next = sizes.next() => next,
        };

        match next {
            Some(Ok(size)) => {
                tracing::debug!(
                    request_id = %state.request_id,
                    "Resizing terminal to {}x{}",
                    size.width,
                    size.height
                );
                let payload = OutboundPayload::Resize {
                    width: size.width,
                    height: size.height,
                };
                if !state.send_unless_stopped(payload).await {
                    return Ok(());
                }
            }
            Some(Err(e)) => {
                tracing::warn!(
                    request_id = %state.request_id,
                    "Malformed resize record, no further resizes will be forwarded: {}",
                    e
                );
                return Ok(());
            }
            None => {
                tracing::debug!(request_id = %state.request_id, "Resize stream ended");
                return Ok(());
            }
        }
    }
}
