//! Outbound stdin forwarder
//!
//! Reads local stdin in fixed-size chunks. While reads keep coming back
//! full, they are batched into one buffer so a fast producer (a pasted file,
//! `cat big.sql | exec`) costs few frames; the first short read, or reaching
//! the batch cap, flushes the batch as a single input frame.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;

use tk_core::traits::LocalReader;
use tk_core::ExecError;
use tk_protocol::OutboundPayload;

use super::session::SessionState;

/// State of the stdin batcher after the last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Reads are arriving at full speed; keep collecting
    Accumulating,
    /// A short read or the size cap ended the batch
    Flushing,
}

/// Batches consecutive full-size stdin reads into one payload
#[derive(Debug)]
pub struct StdinBatcher {
    chunk_size: usize,
    max_buffer_size: usize,
    buffer: BytesMut,
    state: BatchState,
}

impl StdinBatcher {
    /// Create a batcher for reads of `chunk_size` bytes, capped at
    /// `max_buffer_size` bytes per batch
    pub fn new(chunk_size: usize, max_buffer_size: usize) -> Self {
        Self {
            chunk_size,
            max_buffer_size,
            buffer: BytesMut::with_capacity(chunk_size),
            state: BatchState::Accumulating,
        }
    }

    /// State after the last `push`
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Bytes collected but not yet flushed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed the result of one read.
    ///
    /// Returns the batch to send when this read ended it. A read longer
    /// than the chunk size means the reader and buffer disagree about
    /// offsets and is reported as an invariant violation.
    pub fn push(&mut self, read: &[u8]) -> Result<Option<Bytes>, ExecError> {
        if read.len() > self.chunk_size {
            return Err(ExecError::Invariant(format!(
                "stdin read of {} bytes exceeds chunk size {}",
                read.len(),
                self.chunk_size
            )));
        }

        self.buffer.extend_from_slice(read);

        self.state = if read.len() < self.chunk_size || self.buffer.len() >= self.max_buffer_size {
            BatchState::Flushing
        } else {
            BatchState::Accumulating
        };

        match self.state {
            BatchState::Flushing => Ok(self.take()),
            BatchState::Accumulating => Ok(None),
        }
    }

    /// Take whatever is pending and start a new batch
    pub fn take(&mut self) -> Option<Bytes> {
        self.state = BatchState::Accumulating;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }
}

/// Forward local stdin until EOF, error or cancellation
pub(crate) async fn run(
    state: Arc<SessionState>,
    mut stdin: LocalReader,
    chunk_size: usize,
    max_buffer_size: usize,
) -> Result<(), ExecError> {
    let mut batcher = StdinBatcher::new(chunk_size, max_buffer_size);
    let mut chunk = vec![0u8; chunk_size];

    loop {
        let read = tokio::select! {
            _ = state.cancelled() => {
                tracing::debug!(request_id = %state.request_id, "Stdin forwarder cancelled");
                flush(&state, &mut batcher).await;
                return Ok(());
            }
            read = stdin.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!(request_id = %state.request_id, "Stdin reached EOF");
                break;
            }
            Ok(n) => {
                if let Some(batch) = batcher.push(&chunk[..n])? {
                    if !send_input(&state, batch).await {
                        break;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(request_id = %state.request_id, "Stdin closed");
                break;
            }
            Err(e) => {
                tracing::error!(request_id = %state.request_id, "Stdin read error: {}", e);
                break;
            }
        }
    }

    flush(&state, &mut batcher).await;
    state.request_stop().await;
    Ok(())
}

async fn flush(state: &SessionState, batcher: &mut StdinBatcher) {
    if let Some(batch) = batcher.take() {
        send_input(state, batch).await;
    }
}

async fn send_input(state: &SessionState, stdin: Bytes) -> bool {
    tracing::trace!(request_id = %state.request_id, "Forwarding {} stdin bytes", stdin.len());
    state
        .send_unless_stopped(OutboundPayload::Input { stdin })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_chunks_accumulate() {
        let mut batcher = StdinBatcher::new(4, 64);

        assert_eq!(batcher.push(b"aaaa").unwrap(), None);
        assert_eq!(batcher.state(), BatchState::Accumulating);
        assert_eq!(batcher.push(b"bbbb").unwrap(), None);
        assert_eq!(batcher.pending(), 8);
    }

    #[test]
    fn test_short_read_flushes_everything() {
        let mut batcher = StdinBatcher::new(4, 64);
        batcher.push(b"aaaa").unwrap();
        batcher.push(b"bbbb").unwrap();

        let batch = batcher.push(b"cc").unwrap().unwrap();
        assert_eq!(batch.as_ref(), b"aaaabbbbcc");
        assert_eq!(batcher.pending(), 0);
        assert_eq!(batcher.state(), BatchState::Accumulating);
    }

    #[test]
    fn test_cap_flushes_full_chunks() {
        let mut batcher = StdinBatcher::new(4, 8);
        assert_eq!(batcher.push(b"aaaa").unwrap(), None);

        let batch = batcher.push(b"bbbb").unwrap().unwrap();
        assert_eq!(batch.as_ref(), b"aaaabbbb");
        assert_eq!(batcher.push(b"cccc").unwrap(), None);
        assert_eq!(batcher.pending(), 4);
    }

    #[test]
    fn test_take_on_empty_is_none() {
        let mut batcher = StdinBatcher::new(4, 8);
        assert_eq!(batcher.take(), None);
    }

    #[test]
    fn test_oversized_read_is_invariant_violation() {
        let mut batcher = StdinBatcher::new(4, 8);
        assert!(matches!(
            batcher.push(b"too long"),
            Err(ExecError::Invariant(_))
        ));
    }
}
