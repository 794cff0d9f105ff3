//! Local transport traits
//!
//! The local transport is the multiplexed connection on the client side of
//! an exec session (for example a `kubectl exec` stream). It exposes stdin,
//! stdout, stderr and resize as separate sub-streams plus a small control
//! surface. Its own negotiation happens before the bridge sees it.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;

use tk_protocol::{ProtocolError, ResizeDecoder, TerminalSize};

use crate::types::ExecStatus;

/// Readable local sub-stream
pub type LocalReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable local sub-stream
pub type LocalWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Sequence of decoded terminal sizes
pub type ResizeStream = BoxStream<'static, Result<TerminalSize, ProtocolError>>;

/// Control surface of the local connection
#[async_trait]
pub trait LocalControl: Send + Sync {
    /// Whether the transport has a channel for status objects
    fn supports_status(&self) -> bool {
        false
    }

    /// Write a terminal status object.
    ///
    /// Transports without a status channel accept and drop it.
    async fn write_status(&self, status: &ExecStatus) -> io::Result<()> {
        let _ = status;
        Ok(())
    }

    /// Close the whole local connection
    async fn close(&self);

    /// Resolves once the local connection is closed, whoever closed it
    async fn closed(&self);
}

/// The sub-streams of one local connection, as handed to an exec bridge
pub struct LocalStreams {
    /// Client input; `None` when the client attached no stdin
    pub stdin: Option<LocalReader>,
    /// Remote stdout goes here
    pub stdout: LocalWriter,
    /// Remote stderr goes here
    pub stderr: LocalWriter,
    /// Terminal size updates; `None` without a terminal
    pub resize: Option<ResizeStream>,
    /// Status, close and close-detection
    pub control: Arc<dyn LocalControl>,
}

impl LocalStreams {
    /// Bundle output sinks and a control handle; stdin and resize start absent
    pub fn new(
        stdout: impl AsyncWrite + Send + Unpin + 'static,
        stderr: impl AsyncWrite + Send + Unpin + 'static,
        control: Arc<dyn LocalControl>,
    ) -> Self {
        Self {
            stdin: None,
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            resize: None,
            control,
        }
    }

    /// Attach a stdin source
    pub fn with_stdin(mut self, stdin: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(stdin));
        self
    }

    /// Attach an already-decoded resize stream
    pub fn with_resize(mut self, resize: ResizeStream) -> Self {
        self.resize = Some(resize);
        self
    }

    /// Attach a raw resize sub-stream carrying JSON size records
    pub fn with_resize_reader(self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.with_resize(FramedRead::new(reader, ResizeDecoder::new()).boxed())
    }
}

impl std::fmt::Debug for LocalStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStreams")
            .field("stdin", &self.stdin.is_some())
            .field("resize", &self.resize.is_some())
            .field("status", &self.control.supports_status())
            .finish()
    }
}
