//! Chunked message framing (§4.2): 2-byte big-endian length-prefixed chunks terminated by
//! an empty chunk.

use zerocopy::byteorder::big_endian::U16;
use zerocopy::FromBytes;

use crate::error::{Error, Result};

pub const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// Split a complete message payload into `<=65535`-byte chunks and append them to `out`,
/// followed by the empty terminator chunk. An empty payload still produces a bare
/// terminator (a message with no fields, e.g. `GOODBYE`, is legal).
pub fn encode_chunks(payload: &[u8], out: &mut Vec<u8>) {
    let mut remaining = payload;
    while !remaining.is_empty() {
        let chunk_size = remaining.len().min(MAX_CHUNK_SIZE);
        let (chunk, rest) = remaining.split_at(chunk_size);
        out.extend_from_slice(&(chunk_size as u16).to_be_bytes());
        out.extend_from_slice(chunk);
        remaining = rest;
    }
    out.extend_from_slice(&[0, 0]);
}

/// Number of chunks (payload chunks plus the terminator) a payload of length `len` will
/// be split into, per the framing law in §8.
pub fn chunk_count(len: usize) -> usize {
    len.div_ceil(MAX_CHUNK_SIZE) + 1
}

/// Parse one complete message out of the front of `buf`, returning the reassembled
/// payload and the number of bytes consumed. Used by unit tests and by any caller that
/// already has a full buffered read available; the live connection instead streams
/// chunks directly off the socket (see `connection::conn`) since messages usually arrive
/// incrementally.
pub fn decode_message(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut payload = Vec::new();
    let mut pos = 0;
    loop {
        if buf.len() < pos + 2 {
            return Err(Error::ProtocolError("truncated chunk header".into()));
        }
        let len = U16::ref_from_bytes(&buf[pos..pos + 2])
            .map_err(Error::from_debug)?
            .get() as usize;
        pos += 2;
        if len == 0 {
            return Ok((payload, pos));
        }
        if buf.len() < pos + len {
            return Err(Error::ProtocolError("truncated chunk payload".into()));
        }
        payload.extend_from_slice(&buf[pos..pos + len]);
        pos += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_matches_law_for_small_and_boundary_payloads() {
        assert_eq!(chunk_count(0), 1);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(MAX_CHUNK_SIZE), 1);
        assert_eq!(chunk_count(MAX_CHUNK_SIZE + 1), 2);
        assert_eq!(chunk_count(MAX_CHUNK_SIZE * 2), 2);
    }

    #[test]
    fn roundtrip_small_message() {
        let payload = b"hello bolt".to_vec();
        let mut encoded = Vec::new();
        encode_chunks(&payload, &mut encoded);
        let (decoded, consumed) = decode_message(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn roundtrip_oversized_message_splits_into_multiple_chunks() {
        let payload = vec![0xABu8; MAX_CHUNK_SIZE + 10];
        let mut encoded = Vec::new();
        encode_chunks(&payload, &mut encoded);
        assert_eq!(chunk_count(payload.len()), 2);
        let (decoded, _) = decode_message(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn truncated_chunk_is_protocol_error_not_panic() {
        let mut encoded = Vec::new();
        encode_chunks(b"abc", &mut encoded);
        let truncated = &encoded[..encoded.len() - 2];
        assert!(decode_message(truncated).is_err());
    }

    #[test]
    fn empty_payload_encodes_to_bare_terminator() {
        let mut encoded = Vec::new();
        encode_chunks(b"", &mut encoded);
        assert_eq!(encoded, vec![0, 0]);
    }
}
