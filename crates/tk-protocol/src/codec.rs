//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, FrameKind, MAX_PAYLOAD_SIZE};
use crate::message::{InboundFrame, OutboundFrame};

/// A frame as it travels over a relay byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Agent to target
    Outbound(OutboundFrame),
    /// Target to agent
    Inbound(InboundFrame),
}

impl WireFrame {
    /// Get the header kind for this frame
    pub fn kind(&self) -> FrameKind {
        match self {
            WireFrame::Outbound(_) => FrameKind::Outbound,
            WireFrame::Inbound(_) => FrameKind::Inbound,
        }
    }
}

impl From<OutboundFrame> for WireFrame {
    fn from(frame: OutboundFrame) -> Self {
        WireFrame::Outbound(frame)
    }
}

impl From<InboundFrame> for WireFrame {
    fn from(frame: InboundFrame) -> Self {
        WireFrame::Inbound(frame)
    }
}

/// Codec for encoding/decoding wire frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if src.len() < payload_len {
            // Save header and wait for more data
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        tracing::trace!(kind = ?header.kind, len = payload_len, "Decoded frame");

        let frame = match header.kind {
            FrameKind::Outbound => WireFrame::Outbound(OutboundFrame::from_json(&payload)?),
            FrameKind::Inbound => WireFrame::Inbound(InboundFrame::from_json(&payload)?),
        };

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if let Some(header) = self.pending_header.take() {
                    return Err(ProtocolError::IncompleteFrame {
                        expected: header.payload_length as usize,
                        actual: buf.len(),
                    });
                }
                if buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolError::InvalidHeader)
                }
            }
        }
    }
}

impl Encoder<WireFrame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = match &frame {
            WireFrame::Outbound(f) => f.to_json()?,
            WireFrame::Inbound(f) => f.to_json()?,
        };
        let payload_len = payload.len();

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(frame.kind(), payload_len as u32).encode(dst);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::HEADER_SIZE;
    use crate::message::OutboundPayload;
    use bytes::Bytes;

    #[test]
    fn test_codec_outbound_frame() {
        let mut codec = FrameCodec::new();

        let frame = WireFrame::Outbound(OutboundFrame::new(
            "req-7",
            "log-7",
            OutboundPayload::Input {
                stdin: Bytes::from("Hello, world!"),
            },
        ));

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], FrameKind::Outbound.as_u8());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();

        let frame = WireFrame::Inbound(InboundFrame::stdout(Bytes::from("partial"), true));

        let mut full_buf = BytesMut::new();
        codec.encode(frame, &mut full_buf).unwrap();

        // Header only, then the rest
        let mut partial = full_buf.split_to(HEADER_SIZE + 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full_buf);

        match codec.decode(&mut partial).unwrap().unwrap() {
            WireFrame::Inbound(inbound) => {
                assert_eq!(inbound.content.as_ref(), b"partial");
                assert!(inbound.more);
            }
            other => panic!("Expected inbound frame, got {:?}", other),
        }
    }

    #[test]
    fn test_codec_two_frames_in_one_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(InboundFrame::stderr(Bytes::from("a"), true).into(), &mut buf)
            .unwrap();
        codec.encode(InboundFrame::end().into(), &mut buf).unwrap();

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(WireFrame::Inbound(InboundFrame { more: true, .. }))
        ));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(WireFrame::Inbound(InboundFrame { more: false, .. }))
        ));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_truncated_stream() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(InboundFrame::end().into(), &mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let result = codec.decode_eof(&mut buf);
        assert!(matches!(result, Err(ProtocolError::IncompleteFrame { .. })));
    }
}
