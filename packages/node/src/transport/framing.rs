//! Length-prefixed binary framing.
//!
//! ```text
//! [length: u32 LE]   // byte length of payload
//! [type:   u8]
//! [flags:  u8]        // bit 0 = payload is Brotli-compressed
//! [payload: length bytes]
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NodeError;

/// Bit 0 of the flags byte: payload is Brotli-compressed.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Frames above this size trigger an automatic protocol violation rather
/// than an attempted allocation, guarding against a hostile/corrupt length
/// prefix.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// A decoded frame header plus its raw (still possibly compressed) payload.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub msg_type: u8,
    pub flags: u8,
    pub payload: Vec<u8>,
}

/// Writes one frame: `payload` is written as-is: pre-compress and set
/// [`FLAG_COMPRESSED`] in `flags` before calling if compression was
/// negotiated and the payload exceeds the size threshold.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg_type: u8,
    flags: u8,
    payload: &[u8],
) -> Result<(), NodeError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| NodeError::ProtocolViolation("payload too large for frame".into()))?;
    writer.write_u32_le(len).await.map_err(NodeError::TransientNetwork)?;
    writer.write_u8(msg_type).await.map_err(NodeError::TransientNetwork)?;
    writer.write_u8(flags).await.map_err(NodeError::TransientNetwork)?;
    writer.write_all(payload).await.map_err(NodeError::TransientNetwork)?;
    writer.flush().await.map_err(NodeError::TransientNetwork)?;
    Ok(())
}

/// Reads one frame. Rejects lengths beyond [`MAX_FRAME_BYTES`] as a
/// protocol violation without attempting to allocate or read them.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<RawFrame, NodeError> {
    let len = reader.read_u32_le().await.map_err(NodeError::TransientNetwork)?;
    if len > MAX_FRAME_BYTES {
        return Err(NodeError::ProtocolViolation(format!("frame length {len} exceeds maximum")));
    }
    let msg_type = reader.read_u8().await.map_err(NodeError::TransientNetwork)?;
    let flags = reader.read_u8().await.map_err(NodeError::TransientNetwork)?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(NodeError::TransientNetwork)?;
    Ok(RawFrame { msg_type, flags, payload })
}

/// Compresses `payload` with Brotli if compression was negotiated and the
/// payload is at least `threshold` bytes. Returns the (possibly unchanged)
/// payload and the flags byte to send.
#[must_use]
pub fn maybe_compress(payload: Vec<u8>, compression_negotiated: bool, threshold: usize) -> (Vec<u8>, u8) {
    if !compression_negotiated || payload.len() < threshold {
        return (payload, 0);
    }
    let mut out = Vec::new();
    let params = brotli::enc::BrotliEncoderParams::default();
    let mut input = std::io::Cursor::new(&payload);
    if brotli::BrotliCompress(&mut input, &mut out, &params).is_ok() {
        (out, FLAG_COMPRESSED)
    } else {
        (payload, 0)
    }
}

/// Decompresses `payload` if `flags` has [`FLAG_COMPRESSED`] set.
pub fn maybe_decompress(payload: Vec<u8>, flags: u8) -> Result<Vec<u8>, NodeError> {
    if flags & FLAG_COMPRESSED == 0 {
        return Ok(payload);
    }
    let mut out = Vec::new();
    let mut input = std::io::Cursor::new(&payload);
    brotli::BrotliDecompress(&mut input, &mut out)
        .map_err(|e| NodeError::ProtocolViolation(format!("brotli decompress failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_frame_roundtrips() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 3, 0, b"hello").await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap();
        assert_eq!(frame.msg_type, 3);
        assert_eq!(frame.flags, 0);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn read_frame_rejects_oversized_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_le_bytes());
        buf.push(0);
        buf.push(0);
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, NodeError::ProtocolViolation(_)));
    }

    #[test]
    fn small_payload_is_not_compressed() {
        let (out, flags) = maybe_compress(vec![1, 2, 3], true, 1024);
        assert_eq!(flags, 0);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn large_payload_compresses_and_roundtrips() {
        let payload = vec![b'x'; 4096];
        let (compressed, flags) = maybe_compress(payload.clone(), true, 1024);
        assert_eq!(flags, FLAG_COMPRESSED);
        assert!(compressed.len() < payload.len());

        let decompressed = maybe_decompress(compressed, flags).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn compression_skipped_when_not_negotiated() {
        let payload = vec![b'x'; 4096];
        let (out, flags) = maybe_compress(payload.clone(), false, 1024);
        assert_eq!(flags, 0);
        assert_eq!(out, payload);
    }
}
