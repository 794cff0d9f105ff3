//! Decoder for the local terminal-size record stream
//!
//! The local resize sub-stream carries back-to-back JSON records such as
//! `{"Width":80,"Height":24}{"Width":100,"Height":30}`, optionally separated
//! by whitespace. [`ResizeDecoder`] yields one [`TerminalSize`] per record.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::ProtocolError;
use crate::message::TerminalSize;

/// Records larger than this are rejected rather than buffered indefinitely.
const MAX_RECORD_SIZE: usize = 4096;

/// Codec turning a byte stream into terminal-size records
#[derive(Debug, Default)]
pub struct ResizeDecoder;

impl ResizeDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ResizeDecoder {
    type Item = TerminalSize;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let leading = src
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        src.advance(leading);

        if src.is_empty() {
            return Ok(None);
        }

        let (next, consumed) = {
            let mut records =
                serde_json::Deserializer::from_slice(&src[..]).into_iter::<TerminalSize>();
            let next = records.next();
            (next, records.byte_offset())
        };

        match next {
            Some(Ok(size)) => {
                src.advance(consumed);
                Ok(Some(size))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() > MAX_RECORD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: src.len(),
                        max: MAX_RECORD_SIZE,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(size) => Ok(Some(size)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::IncompleteFrame {
                expected: buf.len() + 1,
                actual: buf.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    #[test]
    fn test_decodes_back_to_back_records() {
        let mut decoder = ResizeDecoder::new();
        let mut buf = BytesMut::from(&br#"{"Width":80,"Height":24}{"Width":100,"Height":30}"#[..]);

        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(TerminalSize::new(80, 24))
        );
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(TerminalSize::new(100, 30))
        );
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_waits_for_complete_record() {
        let mut decoder = ResizeDecoder::new();
        let mut buf = BytesMut::from(&br#"{"Width":120,"#[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(br#""Height":40}"#);
        assert_eq!(
            decoder.decode(&mut buf).unwrap(),
            Some(TerminalSize::new(120, 40))
        );
    }

    #[test]
    fn test_rejects_malformed_record() {
        let mut decoder = ResizeDecoder::new();
        let mut buf = BytesMut::from(&b"[not a size]"[..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_truncated_record_at_eof() {
        let mut decoder = ResizeDecoder::new();
        let mut buf = BytesMut::from(&br#"{"Width":1"#[..]);
        assert!(decoder.decode_eof(&mut buf).is_err());
    }

    #[tokio::test]
    async fn test_framed_read_preserves_order() {
        let input: &[u8] = b"{\"Width\":80,\"Height\":24}\n{\"Width\":100,\"Height\":30}\n{\"Width\":120,\"Height\":40}\n";
        let sizes: Vec<TerminalSize> = FramedRead::new(input, ResizeDecoder::new())
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            sizes,
            vec![
                TerminalSize::new(80, 24),
                TerminalSize::new(100, 30),
                TerminalSize::new(120, 40),
            ]
        );
    }
}
