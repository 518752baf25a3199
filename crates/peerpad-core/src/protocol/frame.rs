//! Newline-delimited framing
//!
//! TCP does not preserve write boundaries, so every payload is terminated
//! with `\n`. Payload bytes that would collide with the delimiter are
//! escaped:
//!
//! | payload | on the wire |
//! |---------|-------------|
//! | `\`     | `\\`        |
//! | LF      | `\n`        |
//! | CR      | `\r`        |
//!
//! The decoder yields `Result<Message, DecodeError>` items: a malformed frame
//! is reported and skipped while the stream keeps going. Only io failures
//! end the stream.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, WireCodec};
use crate::error::DecodeError;

/// Default upper bound for a single frame, delimiter excluded
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Stream codec for newline-delimited protocol frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    wire: WireCodec,
    max_length: usize,
    /// Bytes already scanned for a delimiter
    next_index: usize,
    /// Dropping the rest of an oversized frame
    discarding: bool,
}

impl FrameCodec {
    pub fn new(wire: WireCodec) -> Self {
        Self::with_max_length(wire, DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(wire: WireCodec, max_length: usize) -> Self {
        Self {
            wire,
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<Message, DecodeError> {
        let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
        let text = std::str::from_utf8(frame).map_err(|_| DecodeError::InvalidUtf8)?;
        let payload = unescape(text)?;
        self.wire.decode(&payload)
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Message, DecodeError>;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(Err(DecodeError::FrameTooLong {
                        max_length: self.max_length,
                    })));
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let frame = buf.split_to(end + 1);
                    return Ok(Some(self.decode_frame(&frame[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if self.discarding {
            // stream ended inside an oversized frame
            self.discarding = false;
            buf.clear();
            return Ok(Some(Err(DecodeError::FrameTooLong {
                max_length: self.max_length,
            })));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // Last frame of a peer that closed without a trailing delimiter
        let frame = buf.split_to(buf.len());
        Ok(Some(self.decode_frame(&frame)))
    }
}

/// Encodes an already rendered payload as one frame
impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let escaped = escape(&payload);
        dst.reserve(escaped.len() + 1);
        dst.put_slice(escaped.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Length of `payload` once escaped into a frame, delimiter excluded
///
/// A payload is only sendable if this is within the peer's maximum frame
/// length; anything longer is discarded on arrival.
pub fn frame_len(payload: &str) -> usize {
    let escapes = payload
        .bytes()
        .filter(|b| matches!(b, b'\\' | b'\n' | b'\r'))
        .count();
    payload.len() + escapes
}

fn escape(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    for ch in payload.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape(frame: &str) -> Result<String, DecodeError> {
    if !frame.contains('\\') {
        return Ok(frame.to_string());
    }

    let mut out = String::with_capacity(frame.len());
    let mut chars = frame.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(DecodeError::InvalidEscape),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::location::InvalidLocationError;
    use crate::protocol::Scheme;

    fn codec() -> FrameCodec {
        FrameCodec::new(WireCodec::new(Scheme::Tagged))
    }

    fn encode(codec: &mut FrameCodec, payload: &str, buf: &mut BytesMut) {
        codec.encode(payload.to_string(), buf).unwrap();
    }

    #[test]
    fn test_frames_are_newline_terminated() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        encode(&mut codec, "ADD:a", &mut buf);
        encode(&mut codec, "DEL", &mut buf);
        assert_eq!(&buf[..], b"ADD:a\nDEL\n");
    }

    #[test]
    fn test_frame_len_counts_escapes() {
        assert_eq!(frame_len("MSG:abc"), 7);
        assert_eq!(frame_len("MSG:a\nb\\"), 10);

        let mut codec = codec();
        let mut buf = BytesMut::new();
        let payload = "MSG:\r\n\\x".to_string();
        let expected = frame_len(&payload);
        encode(&mut codec, &payload, &mut buf);
        assert_eq!(buf.len(), expected + 1);
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"ADD:a\nADD:b\nDEL\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextAppend('a')))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextAppend('b')))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextDeleteLast))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_partial_frame_waits() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"MSG:hel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextReplace("hello".into())))
        );
    }

    #[test]
    fn test_multiline_text_survives_framing() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        encode(&mut codec, "MSG:line one\nline two\\end\r", &mut buf);
        assert_eq!(&buf[..], b"MSG:line one\\nline two\\\\end\\r\n");

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextReplace("line one\nline two\\end\r".into())))
        );
    }

    #[test]
    fn test_escaped_newline_append() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        encode(&mut codec, "ADD:\n", &mut buf);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextAppend('\n')))
        );
    }

    #[test]
    fn test_malformed_frames_do_not_stop_decoding() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"LOC:1,2,3\nADD:\n\\q\n\xff\xfe\nMSG:ok\n"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::Location(InvalidLocationError::FieldCount(3))))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::AppendLength(0)))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::InvalidEscape))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::InvalidUtf8))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextReplace("ok".into())))
        );
    }

    #[test]
    fn test_oversized_frame_is_discarded() {
        let mut codec = FrameCodec::with_max_length(WireCodec::new(Scheme::Tagged), 8);
        let mut buf = BytesMut::from(&b"MSG:0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"abcdef\nDEL\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::FrameTooLong { max_length: 8 }))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Ok(Message::TextDeleteLast))
        );
    }

    #[test]
    fn test_oversized_frame_cut_off_by_eof_is_reported() {
        let mut codec = FrameCodec::with_max_length(WireCodec::new(Scheme::Tagged), 8);
        let mut buf = BytesMut::from(&b"DEL
MSG:0123456789"[..]);

        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Ok(Message::TextDeleteLast))
        );
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Err(DecodeError::FrameTooLong { max_length: 8 }))
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_unterminated_frame_at_eof() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&b"DEL\nMSG:bye"[..]);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Ok(Message::TextDeleteLast))
        );
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Ok(Message::TextReplace("bye".into())))
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_framed_read_stream() {
        let bytes: &[u8] = b"MSG:hi\nLOC:1.5,2\nplain\n";
        let mut framed = FramedRead::new(bytes, codec());

        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Ok(Message::TextReplace("hi".into()))
        );
        assert!(matches!(
            framed.next().await.unwrap().unwrap(),
            Ok(Message::Location(_))
        ));
        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Ok(Message::Raw("plain".into()))
        );
        assert!(framed.next().await.is_none());
    }
}
