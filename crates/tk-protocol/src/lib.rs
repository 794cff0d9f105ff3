//! tk-protocol: Wire protocol for tunnelkey exec sessions
//!
//! This crate defines the frames exchanged between the agent and a remote
//! target over the relay, their JSON encoding, and the length-prefixed
//! framing used to carry them over a byte stream.

pub mod codec;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod message;
pub mod resize;

pub use codec::{FrameCodec, WireFrame};
pub use error::ProtocolError;
pub use frame::{FrameHeader, FrameKind, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{
    InboundFrame, OutboundAction, OutboundFrame, OutboundPayload, StreamKind, TerminalSize,
    EXEC_SCHEMA_VERSION, LEGACY_END_SENTINEL,
};
pub use resize::ResizeDecoder;
