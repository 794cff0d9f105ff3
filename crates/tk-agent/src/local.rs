//! Local transport over the agent's own stdio
//!
//! Lets the `tk-agent` binary act as its own client: remote stdout and
//! stderr go to the process's stdout and stderr, stdin is forwarded when
//! requested, and a failure status is printed to stderr.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use tk_core::traits::{LocalControl, LocalStreams};
use tk_core::{ExecStatus, StatusKind};

/// Control handle for a stdio-backed local connection
#[derive(Debug, Default)]
pub struct StdioControl {
    closed: CancellationToken,
}

impl StdioControl {
    /// Create an open control handle
    pub fn new() -> Self {
        Self {
            closed: CancellationToken::new(),
        }
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl LocalControl for StdioControl {
    fn supports_status(&self) -> bool {
        true
    }

    async fn write_status(&self, status: &ExecStatus) -> io::Result<()> {
        if status.status == StatusKind::Success {
            return Ok(());
        }
        let message = status.message.as_deref().unwrap_or("remote command failed");
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("error: {}\n", message).as_bytes())
            .await?;
        stderr.flush().await
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Build local streams on top of the process's stdio
pub fn stdio_streams(stdin: bool, control: Arc<StdioControl>) -> LocalStreams {
    let streams = LocalStreams::new(tokio::io::stdout(), tokio::io::stderr(), control);
    if stdin {
        streams.with_stdin(tokio::io::stdin())
    } else {
        streams
    }
}
