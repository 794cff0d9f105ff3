//! Exec session lifecycle
//!
//! [`ExecBridge`] owns one exec session. `start` sends the start frame and
//! spawns up to three flows:
//!
//! - the inbound demultiplexer (always)
//! - the stdin forwarder (when the request attached stdin)
//! - the resize forwarder (when the request asked for a terminal)
//!
//! A supervisor task joins the flows. When the last one exits it makes sure
//! exactly one stop frame went out and then fires the completion signal.
//! Individual flows never signal completion.
//!
//! # Termination
//!
//! Any flow reaching a terminal state calls `request_stop`, which sends the
//! stop frame (once, guarded) and cancels the shared token. `kill` cancels
//! the token directly. A flow returning an error also cancels the token.
//! Whatever the mix of triggers, the outbound channel sees one stop frame
//! and observers of [`ExecBridge::done`] see one completion.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use tk_core::config::ExecConfig;
use tk_core::traits::{LocalReader, LocalStreams, ResizeStream};
use tk_core::{ExecError, ExecRequest};
use tk_protocol::{InboundFrame, OutboundFrame, OutboundPayload, EXEC_SCHEMA_VERSION};

use super::inbound::{self, LocalSinks};
use super::resize;
use super::session::{SessionPhase, SessionState};
use super::stdin;

/// Parts handed to the flows on `start`
struct Pending {
    inbound: mpsc::Receiver<InboundFrame>,
    local: LocalStreams,
}

/// Bridges one local exec connection to the remote peer
pub struct ExecBridge {
    state: Arc<SessionState>,
    config: ExecConfig,
    command: Vec<String>,
    endpoint: String,
    pending: Option<Pending>,
}

impl ExecBridge {
    /// Create a bridge for `request`.
    ///
    /// `outbound` and `inbound` must already be bound to the remote session
    /// for this request.
    pub fn new(
        request: ExecRequest,
        config: ExecConfig,
        outbound: mpsc::Sender<OutboundFrame>,
        inbound: mpsc::Receiver<InboundFrame>,
        local: LocalStreams,
    ) -> Self {
        let state = Arc::new(SessionState::new(&request, outbound));
        Self {
            state,
            config,
            command: request.command,
            endpoint: request.endpoint,
            pending: Some(Pending { inbound, local }),
        }
    }

    /// Request id of this session
    pub fn request_id(&self) -> &str {
        &self.state.request_id
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Send the start frame and launch the flows.
    ///
    /// An invalid [`ExecConfig`] or a start frame that cannot be sent
    /// completes the session immediately with that error; nothing is sent in
    /// the first case.
    pub async fn start(&mut self) -> Result<(), ExecError> {
        let Pending { inbound, local } = self.pending.take().ok_or(ExecError::AlreadyStarted)?;
        let state = Arc::clone(&self.state);

        if let Err(e) = self.config.validate() {
            let err = ExecError::InvalidConfig(e.to_string());
            tracing::error!(request_id = %state.request_id, "Refusing to start exec session: {}", err);
            state.finish(Some(err.clone()));
            return Err(err);
        }

        tracing::info!(
            request_id = %state.request_id,
            log_id = %state.log_id,
            "Starting exec session: {} (stdin: {}, tty: {})",
            state.command_description,
            state.stdin_enabled,
            state.tty_enabled
        );

        let start = OutboundPayload::Start {
            schema_version: EXEC_SCHEMA_VERSION.to_string(),
            is_stdin: state.stdin_enabled,
            is_tty: state.tty_enabled,
            command: self.command.clone(),
            endpoint: self.endpoint.clone(),
            command_being_run: state.command_description.clone(),
        };
        if let Err(e) = state.send(start).await {
            tracing::error!(request_id = %state.request_id, "Failed to send start frame: {}", e);
            state.finish(Some(e.clone()));
            return Err(e);
        }

        let LocalStreams {
            stdin,
            stdout,
            stderr,
            resize,
            control,
        } = local;

        let mut flows = JoinSet::new();
        flows.spawn(inbound::run(
            Arc::clone(&state),
            inbound,
            LocalSinks {
                stdout,
                stderr,
                control,
            },
        ));

        if let Some(stdin) = self.stdin_source(stdin) {
            flows.spawn(stdin::run(
                Arc::clone(&state),
                stdin,
                self.config.chunk_size,
                self.config.max_buffer_size,
            ));
        }

        if let Some(sizes) = self.resize_source(resize) {
            flows.spawn(resize::run(Arc::clone(&state), sizes));
        }

        tokio::spawn(supervise(state, flows));
        Ok(())
    }

    fn stdin_source(&self, stdin: Option<LocalReader>) -> Option<LocalReader> {
        match (self.state.stdin_enabled, stdin) {
            (true, Some(stdin)) => Some(stdin),
            (true, None) => {
                tracing::warn!(
                    request_id = %self.state.request_id,
                    "Stdin requested but the local connection has no stdin stream"
                );
                None
            }
            (false, _) => None,
        }
    }

    fn resize_source(&self, resize: Option<ResizeStream>) -> Option<ResizeStream> {
        match (self.state.tty_enabled, resize) {
            (true, Some(sizes)) => Some(sizes),
            (true, None) => {
                tracing::debug!(
                    request_id = %self.state.request_id,
                    "Terminal requested but the local connection has no resize stream"
                );
                None
            }
            (false, _) => None,
        }
    }

    /// Cancel every flow.
    ///
    /// Idempotent and a no-op once the session has stopped. `reason` becomes
    /// the terminal error unless a flow already failed.
    pub fn kill(&self, reason: Option<ExecError>) {
        if self.state.phase() != SessionPhase::Running {
            return;
        }
        tracing::info!(request_id = %self.state.request_id, "Killing exec session");
        if let Some(reason) = reason {
            self.state.set_kill_reason(reason);
        }
        self.state.cancel();
    }

    /// Wait for the completion signal and return the terminal error, if any.
    ///
    /// Can be awaited repeatedly and from several places. Never resolves for
    /// a bridge that was not started.
    pub async fn done(&self) -> Result<(), ExecError> {
        let mut phase = self.state.subscribe();
        if phase.wait_for(|p| *p == SessionPhase::Done).await.is_err() {
            return Err(ExecError::Invariant(
                "completion signal dropped".to_string(),
            ));
        }
        match self.state.outcome() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Join all flows, then send the stop frame if still needed and complete.
async fn supervise(state: Arc<SessionState>, mut flows: JoinSet<Result<(), ExecError>>) {
    let mut first_error = None;

    while let Some(joined) = flows.join_next().await {
        let result = joined.unwrap_or_else(|e| {
            Err(ExecError::Invariant(format!("exec flow aborted: {}", e)))
        });
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
            state.cancel();
        }
    }

    state.request_stop().await;

    let outcome = first_error.or_else(|| state.kill_reason());
    match &outcome {
        Some(e) => tracing::info!(request_id = %state.request_id, "Exec session ended: {}", e),
        None => tracing::info!(request_id = %state.request_id, "Exec session ended"),
    }
    state.finish(outcome);
}
