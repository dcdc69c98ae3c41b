//! Length-prefixed framing over a byte stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Frame header size: 2-byte type + 2-byte length, both big-endian.
pub const HEADER_LEN: usize = 4;

/// Largest payload a frame can carry (the u16 length ceiling).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Default cap on a connection's buffered bytes in either direction.
pub const DEFAULT_BUFFER_CAP: usize = 1024 * 1024;

/// Codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("read buffer full ({cap} bytes)")]
    BufferOverflow { cap: usize },
}

/// A complete protocol unit pulled off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Payload interpreted as UTF-8, lossily.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Encode a frame for the wire.
pub fn encode_frame(msg_type: u16, payload: &[u8]) -> Result<Bytes, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u16(msg_type);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Reassembles frames from arbitrarily chunked stream reads.
///
/// Bytes accumulate until a full header + payload is present; `extract`
/// drains every complete frame in arrival order and leaves the partial
/// tail for the next read. Total buffered bytes are capped; a push that
/// would exceed the cap fails and the connection should be torn down.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    cap: usize,
}

impl FrameBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            cap,
        }
    }

    /// Buffered byte count (complete and partial frames).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append freshly read bytes, refusing to grow past the cap.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), CodecError> {
        if self.buf.len() + chunk.len() > self.cap {
            return Err(CodecError::BufferOverflow { cap: self.cap });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Drain all complete frames from the head of the buffer.
    pub fn extract(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }
            let msg_type = u16::from_be_bytes([self.buf[0], self.buf[1]]);
            let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if self.buf.len() < HEADER_LEN + len {
                break;
            }
            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(len).freeze();
            frames.push(Frame { msg_type, payload });
        }
        frames
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_frame() {
        let encoded = encode_frame(15, b"{\"message\":\"hello\"}").unwrap();
        let mut fb = FrameBuffer::default();
        fb.push(&encoded).unwrap();
        let frames = fb.extract();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, 15);
        assert_eq!(&frames[0].payload[..], b"{\"message\":\"hello\"}");
        assert!(fb.is_empty());
    }

    #[test]
    fn zero_length_frame_round_trips() {
        let encoded = encode_frame(2999, b"").unwrap();
        assert_eq!(encoded.len(), HEADER_LEN);
        let mut fb = FrameBuffer::default();
        fb.push(&encoded).unwrap();
        let frames = fb.extract();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, 2999);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            encode_frame(1, &payload),
            Err(CodecError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
        assert!(encode_frame(1, &vec![0u8; MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn partial_header_waits_for_more_bytes() {
        let mut fb = FrameBuffer::default();
        fb.push(&[0x00]).unwrap();
        assert!(fb.extract().is_empty());
        fb.push(&[0x04, 0x00]).unwrap();
        assert!(fb.extract().is_empty());
        assert_eq!(fb.len(), 3);
    }

    #[test]
    fn arbitrary_chunking_preserves_frame_order() {
        let a = encode_frame(4, b"{\"email\":\"a@x\"}").unwrap();
        let b = encode_frame(15, b"{\"message\":\"hi\"}").unwrap();
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        // Feed every prefix split in 1..len-1 byte chunks.
        for split in 1..stream.len() {
            let mut fb = FrameBuffer::default();
            fb.push(&stream[..split]).unwrap();
            let mut frames = fb.extract();
            fb.push(&stream[split..]).unwrap();
            frames.extend(fb.extract());

            assert_eq!(frames.len(), 2, "split at {split}");
            assert_eq!(frames[0].msg_type, 4);
            assert_eq!(frames[1].msg_type, 15);
            assert_eq!(&frames[1].payload[..], b"{\"message\":\"hi\"}");
            assert!(fb.is_empty());
        }
    }

    #[test]
    fn push_past_cap_overflows() {
        let mut fb = FrameBuffer::new(8);
        fb.push(&[0u8; 8]).unwrap();
        assert_eq!(
            fb.push(&[0u8; 1]),
            Err(CodecError::BufferOverflow { cap: 8 })
        );
    }

    #[test]
    fn extraction_frees_cap_space() {
        let mut fb = FrameBuffer::new(HEADER_LEN + 4);
        fb.push(&encode_frame(1, b"abcd").unwrap()).unwrap();
        assert_eq!(fb.extract().len(), 1);
        // Cap applies to buffered bytes, not lifetime total.
        fb.push(&encode_frame(2, b"efgh").unwrap()).unwrap();
        assert_eq!(fb.extract().len(), 1);
    }
}
