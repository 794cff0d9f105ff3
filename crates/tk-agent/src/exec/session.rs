//! Per-request exec session state
//!
//! Everything the flows share lives here. The only lock is the stop guard:
//! it serializes "send a frame unless Stop already went out" against
//! "mark the session stopped", so no frame ever follows Stop on the
//! outbound channel. Every wait on outbound capacity is raced against
//! cancellation or bounded, so a stalled consumer cannot keep the session
//! alive.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use tk_core::{ExecError, ExecRequest};
use tk_protocol::{OutboundFrame, OutboundPayload};

/// Longest wait for outbound capacity when sending the Stop frame
pub(crate) const STOP_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle phase of an exec session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Flows are running, Stop not sent
    Running,
    /// Stop has been sent; flows are unwinding
    Stopped,
    /// Completion signal fired; nothing more will be sent
    Done,
}

/// Shared state of one exec session
pub(crate) struct SessionState {
    pub request_id: String,
    pub log_id: String,
    pub command_description: String,
    pub stdin_enabled: bool,
    pub tty_enabled: bool,
    outbound: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
    /// `true` once the Stop frame has been sent
    stop_guard: Mutex<bool>,
    phase: watch::Sender<SessionPhase>,
    kill_reason: OnceLock<ExecError>,
    outcome: OnceLock<Option<ExecError>>,
}

impl SessionState {
    pub fn new(request: &ExecRequest, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Running);
        Self {
            request_id: request.request_id.clone(),
            log_id: request.log_id.clone(),
            command_description: request.command_being_run(),
            stdin_enabled: request.stdin,
            tty_enabled: request.tty,
            outbound,
            cancel: CancellationToken::new(),
            stop_guard: Mutex::new(false),
            phase,
            kill_reason: OnceLock::new(),
            outcome: OnceLock::new(),
        }
    }

    fn frame(&self, payload: OutboundPayload) -> OutboundFrame {
        OutboundFrame::new(self.request_id.clone(), self.log_id.clone(), payload)
    }

    /// Send a frame without consulting the stop guard. Only for Start.
    pub async fn send(&self, payload: OutboundPayload) -> Result<(), ExecError> {
        self.outbound
            .send(self.frame(payload))
            .await
            .map_err(|_| ExecError::Transport("outbound frame channel closed".to_string()))
    }

    /// Send a frame unless Stop has already been sent.
    ///
    /// Returns `false` when the frame was not delivered: the session is
    /// stopped, it was cancelled while waiting for channel capacity, or the
    /// outbound channel is gone. The guard is held until the frame is in the
    /// channel, so nothing can slip in behind Stop.
    pub async fn send_unless_stopped(&self, payload: OutboundPayload) -> bool {
        let stopped = self.stop_guard.lock().await;
        if *stopped {
            tracing::debug!(
                request_id = %self.request_id,
                "Dropping {} frame sent after stop",
                payload.action().as_str()
            );
            return false;
        }

        let permit = tokio::select! {
            biased;
            permit = self.outbound.reserve() => permit,
            _ = self.cancel.cancelled() => {
                tracing::debug!(
                    request_id = %self.request_id,
                    "Dropping {} frame: session cancelled while outbound channel was full",
                    payload.action().as_str()
                );
                return false;
            }
        };

        match permit {
            Ok(permit) => {
                permit.send(self.frame(payload));
                true
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "Failed to send {} frame: outbound channel closed",
                    payload.action().as_str()
                );
                false
            }
        }
    }

    /// Cancel every flow, then send the Stop frame if nobody has yet.
    ///
    /// Safe to call any number of times from any flow. Cancelling first
    /// releases a sender parked on a full outbound channel, so the guard is
    /// always obtainable. The Stop frame itself waits at most
    /// [`STOP_SEND_TIMEOUT`] for channel capacity.
    pub async fn request_stop(&self) {
        self.cancel.cancel();

        {
            let mut stopped = self.stop_guard.lock().await;
            if *stopped {
                return;
            }
            *stopped = true;
        }

        self.phase.send_if_modified(|phase| {
            if *phase == SessionPhase::Running {
                *phase = SessionPhase::Stopped;
                true
            } else {
                false
            }
        });

        let stop = self.frame(OutboundPayload::Stop);
        match tokio::time::timeout(STOP_SEND_TIMEOUT, self.outbound.send(stop)).await {
            Ok(Ok(())) => {
                tracing::info!(request_id = %self.request_id, "Exec session stopped");
            }
            Ok(Err(_)) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "Outbound channel closed before stop could be sent"
                );
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    "Outbound channel stalled for {:?}; stop frame dropped",
                    STOP_SEND_TIMEOUT
                );
            }
        }
    }

    /// Cancel all flows without sending anything
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the session has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record why the owner killed the session; the first reason wins
    pub fn set_kill_reason(&self, reason: ExecError) {
        let _ = self.kill_reason.set(reason);
    }

    pub fn kill_reason(&self) -> Option<ExecError> {
        self.kill_reason.get().cloned()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    /// Fire the completion signal. Only the supervisor calls this.
    pub fn finish(&self, outcome: Option<ExecError>) {
        if self.outcome.set(outcome).is_err() {
            tracing::error!(request_id = %self.request_id, "Exec session finished twice");
            return;
        }
        self.phase.send_replace(SessionPhase::Done);
    }

    /// Terminal error, once finished
    pub fn outcome(&self) -> Option<ExecError> {
        self.outcome.get().cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tk_protocol::OutboundAction;

    fn state(capacity: usize) -> (Arc<SessionState>, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let request = ExecRequest::new("req-1", vec!["ls".into()]).with_log_id("log-1");
        (Arc::new(SessionState::new(&request, tx)), rx)
    }

    #[tokio::test]
    async fn test_concurrent_stop_requests_send_one_stop() {
        let (state, mut rx) = state(64);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move { state.request_stop().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(state);

        let mut stops = 0;
        while let Some(frame) = rx.recv().await {
            assert_eq!(frame.request_id, "req-1");
            assert_eq!(frame.log_id, "log-1");
            if frame.action() == OutboundAction::Stop {
                stops += 1;
            }
        }
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_stop_moves_phase_and_cancels() {
        let (state, _rx) = state(4);
        assert_eq!(state.phase(), SessionPhase::Running);

        state.request_stop().await;

        assert_eq!(state.phase(), SessionPhase::Stopped);
        assert!(state.is_cancelled());
    }

    #[tokio::test]
    async fn test_frames_after_stop_are_dropped() {
        let (state, mut rx) = state(4);
        state.request_stop().await;

        let sent = state
            .send_unless_stopped(OutboundPayload::Resize {
                width: 80,
                height: 24,
            })
            .await;
        assert!(!sent);

        assert_eq!(rx.recv().await.unwrap().action(), OutboundAction::Stop);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_releases_sender_parked_on_full_channel() {
        let (state, mut rx) = state(1);
        state.send(OutboundPayload::Stop).await.unwrap();

        let parked = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state
                    .send_unless_stopped(OutboundPayload::Input {
                        stdin: bytes::Bytes::from_static(b"ls\n"),
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        state.cancel();
        let sent = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(!sent);

        rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_not_blocked_by_parked_sender() {
        let (state, mut rx) = state(1);
        state.send(OutboundPayload::Resize { width: 1, height: 1 }).await.unwrap();

        let parked = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state
                    .send_unless_stopped(OutboundPayload::Resize {
                        width: 80,
                        height: 24,
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The consumer comes back shortly after the stop request
        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut actions = Vec::new();
            while let Some(frame) = rx.recv().await {
                actions.push(frame.action());
            }
            actions
        });

        tokio::time::timeout(Duration::from_secs(2), state.request_stop())
            .await
            .unwrap();
        assert!(!parked.await.unwrap());
        assert_eq!(state.phase(), SessionPhase::Stopped);

        drop(state);
        assert_eq!(
            consumer.await.unwrap(),
            vec![OutboundAction::Resize, OutboundAction::Stop]
        );
    }

    #[tokio::test]
    async fn test_stop_gives_up_on_stalled_channel() {
        let (state, mut rx) = state(1);
        state.send(OutboundPayload::Resize { width: 1, height: 1 }).await.unwrap();

        tokio::time::timeout(STOP_SEND_TIMEOUT * 2, state.request_stop())
            .await
            .unwrap();
        assert!(state.is_cancelled());

        assert_eq!(rx.recv().await.unwrap().action(), OutboundAction::Resize);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_only_once() {
        let (state, _rx) = state(4);
        state.finish(Some(ExecError::Remote("first".into())));
        state.finish(None);

        assert_eq!(state.phase(), SessionPhase::Done);
        assert_eq!(state.outcome(), Some(ExecError::Remote("first".into())));
    }

    #[test]
    fn test_first_kill_reason_wins() {
        let (tx, _rx) = mpsc::channel(1);
        let state = SessionState::new(&ExecRequest::new("r", vec![]), tx);
        state.set_kill_reason(ExecError::Killed("a".into()));
        state.set_kill_reason(ExecError::Killed("b".into()));
        assert_eq!(state.kill_reason(), Some(ExecError::Killed("a".into())));
    }
}
