// src/io/codec.rs
//
// Frame codec for the 0x55 serial framing protocol.
//
// Wire format:
//   byte 0        PREAMBLE (0x55)
//   byte 1        LENGTH (0-255)
//   bytes 2..2+L  PAYLOAD
//   byte 2+L      CHECKSUM = sum(PAYLOAD) mod 256
//
// The checksum is a plain 8-bit non-carrying sum, not a CRC.

use super::error::CodecError;

/// Start-of-frame marker.
pub const PREAMBLE: u8 = 0x55;

/// Largest payload the one-byte LENGTH field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Outcome of decoding one candidate frame.
///
/// A checksum mismatch is an ordinary decode outcome, not an error: the
/// bytes are handed back so the caller can pass them through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameResult {
    Valid(Vec<u8>),
    ChecksumMismatch {
        length: u8,
        payload: Vec<u8>,
        checksum: u8,
    },
}

impl FrameResult {
    /// Bytes consumed after the preamble, exactly as they appeared on the
    /// wire (length byte, payload, checksum byte).
    pub fn raw_bytes(&self) -> Vec<u8> {
        let (length, payload, checksum) = match self {
            FrameResult::Valid(payload) => (payload.len() as u8, payload, checksum(payload)),
            FrameResult::ChecksumMismatch {
                length,
                payload,
                checksum,
            } => (*length, payload, *checksum),
        };
        let mut raw = Vec::with_capacity(payload.len() + 2);
        raw.push(length);
        raw.extend_from_slice(payload);
        raw.push(checksum);
        raw
    }
}

/// 8-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Encode a payload as a complete frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(PREAMBLE);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    Ok(frame)
}

/// Decode one frame whose preamble the caller has already consumed.
///
/// `read_exact` must fill the buffer it is given or fail; each call may
/// block on the underlying transport. Transport errors are passed through
/// unchanged.
pub fn decode_step<E, F>(mut read_exact: F) -> Result<FrameResult, E>
where
    F: FnMut(&mut [u8]) -> Result<(), E>,
{
    let mut length = [0u8; 1];
    read_exact(&mut length)?;
    let length = length[0];

    let mut payload = vec![0u8; length as usize];
    read_exact(&mut payload)?;

    let mut received = [0u8; 1];
    read_exact(&mut received)?;
    let received = received[0];

    if received == checksum(&payload) {
        Ok(FrameResult::Valid(payload))
    } else {
        Ok(FrameResult::ChecksumMismatch {
            length,
            payload,
            checksum: received,
        })
    }
}

/// Decode a complete frame held in memory, preamble included.
///
/// Returns `None` if the buffer does not start with the preamble or ends
/// before the frame does. Trailing bytes after the frame are ignored.
pub fn decode(bytes: &[u8]) -> Option<FrameResult> {
    let (&first, mut rest) = bytes.split_first()?;
    if first != PREAMBLE {
        return None;
    }

    decode_step(|buf: &mut [u8]| {
        if rest.len() < buf.len() {
            return Err(());
        }
        let (head, tail) = rest.split_at(buf.len());
        buf.copy_from_slice(head);
        rest = tail;
        Ok(())
    })
    .ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_reference_payload() {
        let payload = [0x81, 0x01, 0xAB, 0xF1, 0x00, 0x0B, 0x00];
        let expected = ((0x81u32 + 0x01 + 0xAB + 0xF1 + 0x00 + 0x0B + 0x00) % 256) as u8;
        assert_eq!(checksum(&payload), expected);
        assert_eq!(checksum(&payload), 0x29);
    }

    #[test]
    fn test_checksum_wrapping() {
        // 0xFF + 0x02 = 0x101, low byte only
        assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(checksum(&[0x80, 0x80]), 0x00);
        assert_eq!(checksum(&[]), 0x00);
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(&[0x01, 0x02]).unwrap();
        assert_eq!(frame, vec![0x55, 0x02, 0x01, 0x02, 0x03]);
        assert_eq!(encode(&[]).unwrap(), vec![0x55, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let payload = vec![0u8; 256];
        assert_eq!(encode(&payload), Err(CodecError::PayloadTooLong(256)));
    }

    #[test]
    fn test_round_trip_all_lengths() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let frame = encode(&payload).unwrap();
            assert_eq!(decode(&frame), Some(FrameResult::Valid(payload)));
        }
    }

    #[test]
    fn test_round_trip_max_payload_of_0xff() {
        // Largest possible sum: 255 * 255
        let payload = vec![0xFF; MAX_PAYLOAD_LEN];
        let frame = encode(&payload).unwrap();
        assert_eq!(frame[1], 0xFF);
        assert_eq!(decode(&frame), Some(FrameResult::Valid(payload)));
    }

    #[test]
    fn test_checksum_mismatch_carries_raw_bytes() {
        let wire = [0x55, 0x02, 0x01, 0x02, 0x7F];
        let result = decode(&wire).unwrap();
        assert_eq!(
            result,
            FrameResult::ChecksumMismatch {
                length: 0x02,
                payload: vec![0x01, 0x02],
                checksum: 0x7F,
            }
        );
        assert_eq!(result.raw_bytes(), vec![0x02, 0x01, 0x02, 0x7F]);
    }

    #[test]
    fn test_decode_rejects_missing_preamble_and_truncation() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0x54, 0x00, 0x00]), None);
        assert_eq!(decode(&[0x55, 0x03, 0x01]), None);
        assert_eq!(decode(&[0x55, 0x01, 0x01]), None);
    }

    #[test]
    fn test_decode_step_reads_in_wire_order() {
        let wire = [0x03, 0x0A, 0x0B, 0x0C, 0x21];
        let mut calls = Vec::new();
        let mut pos = 0;
        let result = decode_step(|buf: &mut [u8]| -> Result<(), ()> {
            calls.push(buf.len());
            buf.copy_from_slice(&wire[pos..pos + buf.len()]);
            pos += buf.len();
            Ok(())
        })
        .unwrap();
        assert_eq!(result, FrameResult::Valid(vec![0x0A, 0x0B, 0x0C]));
        assert_eq!(calls, vec![1, 3, 1]);
    }

    #[test]
    fn test_decode_step_propagates_read_errors() {
        let result: Result<FrameResult, &str> = decode_step(|_buf: &mut [u8]| Err("unplugged"));
        assert_eq!(result, Err("unplugged"));
    }

    #[test]
    fn test_valid_raw_bytes_match_encoding() {
        let payload = vec![0x10, 0x20];
        let frame = encode(&payload).unwrap();
        assert_eq!(FrameResult::Valid(payload).raw_bytes(), frame[1..].to_vec());
    }
}
