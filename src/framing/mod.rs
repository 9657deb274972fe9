//! Length-prefixed stdio framing (native messaging).
//!
//! Each frame is a little-endian unsigned 32-bit length followed by
//! exactly that many bytes of UTF-8 JSON. The frame cap is 1 MiB in both
//! directions. Oversize inbound frames are drained so the stream stays in
//! sync and the dispatch loop can keep going; truncation mid-frame is
//! unrecoverable.

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Maximum frame payload size in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errors from frame I/O.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Clean end of stream between frames.
    #[error("input stream closed")]
    Eof,

    /// Stream ended inside the 4-byte length prefix.
    #[error("stream ended inside a length prefix")]
    TruncatedLength,

    /// Stream ended inside a frame payload.
    #[error("stream ended inside a frame payload")]
    TruncatedPayload,

    #[error("frame payload is not valid UTF-8")]
    NotUtf8,

    #[error("frame payload is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(usize),

    /// Outbound object serialized past the frame cap.
    #[error("serialized frame of {0} bytes exceeds the 1 MiB limit")]
    OversizeWrite(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the dispatch loop can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::FrameTooLarge(_) | FrameError::NotUtf8 | FrameError::MalformedJson(_)
        )
    }

    /// Wire error code for the generic error frame.
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::Eof => "eof",
            FrameError::TruncatedLength => "truncated_length",
            FrameError::TruncatedPayload => "truncated_payload",
            FrameError::NotUtf8 => "not_utf8",
            FrameError::MalformedJson(_) => "malformed_json",
            FrameError::FrameTooLarge(_) => "frame_too_large",
            FrameError::OversizeWrite(_) => "frame_too_large",
            FrameError::Io(_) => "io_error",
        }
    }
}

/// Reads frames from the input byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            inner: BufReader::new(input),
        }
    }

    /// Read one frame and parse it as JSON.
    ///
    /// `Eof` is returned only on a clean boundary (no bytes of the next
    /// length prefix read). A partial prefix or payload means the peer
    /// died mid-frame and the stream cannot be resynchronized.
    pub async fn read_frame(&mut self) -> Result<serde_json::Value, FrameError> {
        let mut len_buf = [0u8; 4];

        // First byte separates clean EOF from a torn length prefix.
        let first = self.inner.read(&mut len_buf[..1]).await?;
        if first == 0 {
            return Err(FrameError::Eof);
        }
        self.inner.read_exact(&mut len_buf[1..]).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::TruncatedLength
            } else {
                FrameError::Io(e)
            }
        })?;

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            self.drain(len).await?;
            return Err(FrameError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::TruncatedPayload
            } else {
                FrameError::Io(e)
            }
        })?;

        let text = String::from_utf8(payload).map_err(|_| FrameError::NotUtf8)?;
        serde_json::from_str(&text).map_err(|e| FrameError::MalformedJson(e.to_string()))
    }

    /// Discard an oversize payload so the next frame starts cleanly.
    async fn drain(&mut self, mut remaining: usize) -> Result<(), FrameError> {
        let mut sink = [0u8; 8192];
        while remaining > 0 {
            let take = remaining.min(sink.len());
            let read = self.inner.read(&mut sink[..take]).await?;
            if read == 0 {
                return Err(FrameError::TruncatedPayload);
            }
            remaining -= read;
        }
        Ok(())
    }
}

/// Writes frames to the output byte stream.
///
/// Anything on this stream that is not a valid frame corrupts the
/// transport, so the writer is the only component allowed to touch it.
pub struct FrameWriter<W> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W) -> Self {
        Self {
            inner: BufWriter::new(output),
        }
    }

    /// Serialize compactly and write length + payload in one flush.
    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), FrameError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| FrameError::MalformedJson(e.to_string()))?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(FrameError::OversizeWrite(payload.len()));
        }

        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Encode a frame by hand for read-side tests.
    fn encode(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_write);
        let mut reader = FrameReader::new(server_read);

        let value = json!({"type": "ping", "request_id": "r1"});
        writer.write_frame(&value).await.unwrap();

        let read = reader.read_frame().await.unwrap();
        assert_eq!(read, value);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, _sw) = tokio::io::split(server);
        let (_cr, client_write) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_write);
        let mut reader = FrameReader::new(server_read);

        for i in 0..5 {
            writer.write_frame(&json!({"n": i})).await.unwrap();
        }
        for i in 0..5 {
            let read = reader.read_frame().await.unwrap();
            assert_eq!(read["n"], i);
        }
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let mut reader = FrameReader::new(&[][..]);
        assert!(matches!(reader.read_frame().await, Err(FrameError::Eof)));
    }

    #[tokio::test]
    async fn test_truncated_length() {
        let mut reader = FrameReader::new(&[0x05, 0x00][..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TruncatedLength)
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut bytes = (10u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut reader = FrameReader::new(&bytes[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TruncatedPayload)
        ));
    }

    #[tokio::test]
    async fn test_not_utf8() {
        let bytes = encode(&[0xff, 0xfe, 0xfd]);
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, FrameError::NotUtf8));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let bytes = encode(b"{not json");
        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, FrameError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn test_frame_at_exact_limit_accepted() {
        // A JSON string payload of exactly MAX_FRAME_BYTES.
        let filler = "a".repeat(MAX_FRAME_BYTES - 2);
        let payload = format!("\"{}\"", filler);
        assert_eq!(payload.len(), MAX_FRAME_BYTES);

        let bytes = encode(payload.as_bytes());
        let mut reader = FrameReader::new(&bytes[..]);
        let value = reader.read_frame().await.unwrap();
        assert_eq!(value.as_str().unwrap().len(), MAX_FRAME_BYTES - 2);
    }

    #[tokio::test]
    async fn test_frame_over_limit_rejected_and_stream_continues() {
        let oversize = vec![b'x'; MAX_FRAME_BYTES + 1];
        let mut bytes = encode(&oversize);
        bytes.extend_from_slice(&encode(b"{\"ok\":true}"));

        let mut reader = FrameReader::new(&bytes[..]);
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(err, FrameError::FrameTooLarge(n) if n == MAX_FRAME_BYTES + 1));

        // The oversize payload was drained; the next frame parses.
        let value = reader.read_frame().await.unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_oversize_write_rejected() {
        let (_client, server) = tokio::io::duplex(1024);
        let (_sr, server_write) = tokio::io::split(server);
        let mut writer = FrameWriter::new(server_write);

        let huge = json!({"body": "b".repeat(MAX_FRAME_BYTES)});
        let err = writer.write_frame(&huge).await.unwrap_err();
        assert_eq!(err.code(), "frame_too_large");
        assert!(matches!(err, FrameError::OversizeWrite(_)));
    }

    #[tokio::test]
    async fn test_error_codes() {
        assert_eq!(FrameError::Eof.code(), "eof");
        assert_eq!(FrameError::TruncatedLength.code(), "truncated_length");
        assert_eq!(FrameError::NotUtf8.code(), "not_utf8");
        assert_eq!(
            FrameError::MalformedJson("x".into()).code(),
            "malformed_json"
        );
        assert_eq!(FrameError::FrameTooLarge(0).code(), "frame_too_large");
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (client, server) = tokio::io::duplex(1024);
        let (_cr, client_write) = tokio::io::split(client);
        let (mut server_read, _sw) = tokio::io::split(server);

        let mut writer = FrameWriter::new(client_write);
        writer.write_frame(&json!(7)).await.unwrap();

        let mut raw = [0u8; 5];
        server_read.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw[..4], 1u32.to_le_bytes());
        assert_eq!(raw[4], b'7');
    }
}
