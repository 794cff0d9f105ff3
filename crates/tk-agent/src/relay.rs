//! Relay link
//!
//! Carries the frames of a single exec session over a byte stream to the
//! relay. Outbound frames from the bridge are written through
//! [`FrameCodec`]; inbound frames read back are handed to the bridge.
//! One connection serves one session, so no request routing happens here.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use tk_core::config::{AgentConfig, ExecConfig};
use tk_protocol::{FrameCodec, InboundFrame, OutboundAction, OutboundFrame, WireFrame};

/// Channel ends the exec bridge talks to
pub struct SessionChannels {
    /// Frames for the remote peer
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Frames from the remote peer
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// A framed connection to the relay
pub struct RelayLink<S> {
    framed: Framed<S, FrameCodec>,
}

impl RelayLink<TcpStream> {
    /// Connect to the configured relay address
    pub async fn connect(config: &AgentConfig) -> Result<Self> {
        tracing::debug!("Connecting to relay at {}", config.relay_address);
        let stream = tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect(&config.relay_address),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Connection to {} timed out", config.relay_address))?
        .with_context(|| format!("Failed to connect to relay at {}", config.relay_address))?;

        stream.set_nodelay(true).ok();
        tracing::info!("Connected to relay at {}", config.relay_address);
        Ok(Self::new(stream))
    }
}

impl<S> RelayLink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap an established byte stream
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    /// Start pumping frames in the background.
    ///
    /// The pump ends once the bridge drops its outbound sender or the relay
    /// closes the connection. Dropping the inbound sender tells the bridge
    /// that the remote side is gone.
    pub fn spawn(self, config: &ExecConfig) -> (SessionChannels, JoinHandle<Result<()>>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);

        let handle = tokio::spawn(pump(self.framed, outbound_rx, inbound_tx));

        (
            SessionChannels {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            handle,
        )
    }
}

async fn pump<S>(
    framed: Framed<S, FrameCodec>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    inbound: mpsc::Sender<InboundFrame>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let (mut sink, mut stream) = framed.split();
    // Inbound frame read from the relay but not yet accepted by the bridge.
    // While one is held no further frames are read, but outbound keeps
    // draining.
    let mut pending: Option<InboundFrame> = None;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!("Exec session released the relay link");
                    sink.close().await.context("Failed to close relay connection")?;
                    return Ok(());
                };
                let stop = frame.action() == OutboundAction::Stop;
                sink.send(WireFrame::Outbound(frame))
                    .await
                    .context("Failed to send frame to relay")?;
                if stop {
                    tracing::debug!("Stop frame delivered to relay");
                }
            }

            permit = inbound.reserve(), if pending.is_some() => {
                match (permit, pending.take()) {
                    (Ok(permit), Some(frame)) => permit.send(frame),
                    (Err(_), _) => {
                        tracing::trace!("Inbound frame arrived after the session stopped reading");
                    }
                    (Ok(_), None) => {}
                }
            }

            wire = stream.next(), if pending.is_none() => {
                match wire {
                    Some(Ok(WireFrame::Inbound(frame))) => pending = Some(frame),
                    Some(Ok(WireFrame::Outbound(frame))) => {
                        tracing::warn!(
                            "Ignoring {} frame echoed by relay",
                            frame.action().as_str()
                        );
                    }
                    Some(Err(e)) => {
                        return Err(e).context("Relay protocol error");
                    }
                    None => {
                        tracing::info!("Relay closed the connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}
