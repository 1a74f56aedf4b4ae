//! Binary payload for one filtered motion sample.
//!
//! # Frame Format (84 bytes)
//!
//! ```text
//! ┌────────┬─────────┬─────────────┬──────────────────────────────┐
//! │ Magic  │ Version │ Field count │ Fields (f64 little-endian)   │
//! │ 2 bytes│ 1 byte  │ 1 byte      │ count × 8 bytes              │
//! └────────┴─────────┴─────────────┴──────────────────────────────┘
//! ```
//!
//! Field order: pitch, roll, yaw, rotation rate x/y/z, user acceleration
//! x/y/z, timestamp. Every field must be finite.

use crate::error::PayloadError;
use crate::types::{MotionSample, MOTION_CHANNELS};

/// Magic bytes for frame validation: "MB" (0x4D42)
pub const WIRE_MAGIC: u16 = 0x4D42;

pub const WIRE_VERSION: u8 = 1;

pub const HEADER_SIZE: usize = 4;

/// Nine channels plus the timestamp.
pub const FIELD_COUNT: usize = MOTION_CHANNELS + 1;

pub const FRAME_SIZE: usize = HEADER_SIZE + FIELD_COUNT * 8;

/// Declared field counts above this are treated as garbage.
const MAX_FIELDS: usize = 32;

fn fields(sample: &MotionSample) -> [f64; FIELD_COUNT] {
    let mut out = [0.0; FIELD_COUNT];
    out[..MOTION_CHANNELS].copy_from_slice(&sample.channels());
    out[MOTION_CHANNELS] = sample.timestamp;
    out
}

/// Encode a sample. Non-finite samples are never put on the wire.
pub fn encode(sample: &MotionSample) -> Result<Vec<u8>, PayloadError> {
    let values = fields(sample);
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(PayloadError::NonFinite(i));
    }

    let mut buf = Vec::with_capacity(FRAME_SIZE);
    buf.extend_from_slice(&WIRE_MAGIC.to_le_bytes());
    buf.push(WIRE_VERSION);
    buf.push(FIELD_COUNT as u8);
    for v in values {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    Ok(buf)
}

/// Decode exactly one frame.
pub fn decode(buf: &[u8]) -> Result<MotionSample, PayloadError> {
    let declared = frame_len(buf)?;
    if buf.len() < declared {
        return Err(PayloadError::Truncated {
            needed: declared,
            available: buf.len(),
        });
    }

    let count = buf[3] as usize;
    if count != FIELD_COUNT {
        return Err(PayloadError::FieldCount {
            expected: FIELD_COUNT,
            got: count,
        });
    }

    let mut values = [0.0; FIELD_COUNT];
    for (i, chunk) in buf[HEADER_SIZE..FRAME_SIZE].chunks_exact(8).enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        let v = f64::from_le_bytes(raw);
        if !v.is_finite() {
            return Err(PayloadError::NonFinite(i));
        }
        values[i] = v;
    }

    let mut channels = [0.0; MOTION_CHANNELS];
    channels.copy_from_slice(&values[..MOTION_CHANNELS]);
    Ok(MotionSample::from_channels(channels, values[MOTION_CHANNELS]))
}

/// Validate the header and return the full frame length it declares.
fn frame_len(buf: &[u8]) -> Result<usize, PayloadError> {
    if buf.len() < HEADER_SIZE {
        return Err(PayloadError::Truncated {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }
    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != WIRE_MAGIC {
        return Err(PayloadError::BadMagic(magic));
    }
    if buf[2] != WIRE_VERSION {
        return Err(PayloadError::UnsupportedVersion(buf[2]));
    }
    let count = buf[3] as usize;
    if count > MAX_FIELDS {
        return Err(PayloadError::Oversized(count));
    }
    Ok(HEADER_SIZE + count * 8)
}

// ─── Stream reassembly ───────────────────────────────────────────────────────

/// Reassembles frames from arbitrarily chunked notifications.
///
/// Only complete frames are yielded. A bad header drops one byte and
/// resynchronizes on the next magic; a complete but malformed frame is
/// dropped whole.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    malformed: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes. Returns every sample completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<MotionSample> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < HEADER_SIZE {
                break;
            }
            let len = match frame_len(&self.buf) {
                Ok(len) => len,
                Err(e) => {
                    log::warn!("[wire] {}; resyncing", e);
                    self.malformed += 1;
                    self.buf.drain(..1);
                    continue;
                }
            };
            if self.buf.len() < len {
                break;
            }
            match decode(&self.buf[..len]) {
                Ok(sample) => out.push(sample),
                Err(e) => {
                    log::warn!("[wire] dropping frame: {}", e);
                    self.malformed += 1;
                }
            }
            self.buf.drain(..len);
        }
        out
    }

    /// Bytes of an incomplete frame still waiting for the rest.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Discard partial data, e.g. after a reconnect.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> MotionSample {
        MotionSample::from_channels(
            [0.1, -0.2, 0.3, 1.5, -2.5, 0.25, 0.01, -0.02, 9.81],
            1_700_000_000.125,
        )
    }

    #[test]
    fn test_frame_layout() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(bytes.len(), FRAME_SIZE);
        assert_eq!(&bytes[..2], b"BM");
        assert_eq!(bytes[2], WIRE_VERSION);
        assert_eq!(bytes[3], 10);
        assert_eq!(&bytes[4..12], &0.1f64.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let mut s = sample();
        s.yaw = f64::INFINITY;
        assert_eq!(encode(&s), Err(PayloadError::NonFinite(2)));
        s.yaw = 0.0;
        s.timestamp = f64::NAN;
        assert_eq!(encode(&s), Err(PayloadError::NonFinite(9)));
    }

    #[test]
    fn test_decode_errors() {
        let good = encode(&sample()).unwrap();

        assert!(matches!(decode(&good[..40]), Err(PayloadError::Truncated { .. })));

        let mut bad = good.clone();
        bad[0] = 0;
        assert!(matches!(decode(&bad), Err(PayloadError::BadMagic(_))));

        let mut bad = good.clone();
        bad[2] = 9;
        assert_eq!(decode(&bad), Err(PayloadError::UnsupportedVersion(9)));

        let mut short = good[..HEADER_SIZE + 9 * 8].to_vec();
        short[3] = 9;
        assert_eq!(
            decode(&short),
            Err(PayloadError::FieldCount { expected: 10, got: 9 })
        );

        let mut nan = good.clone();
        nan[12..20].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(decode(&nan), Err(PayloadError::NonFinite(1)));
    }

    #[test]
    fn test_assembler_split_delivery() {
        let frame = encode(&sample()).unwrap();
        let mut asm = FrameAssembler::new();
        assert!(asm.push(&frame[..3]).is_empty());
        assert!(asm.push(&frame[3..50]).is_empty());
        assert_eq!(asm.pending(), 50);
        let out = asm.push(&frame[50..]);
        assert_eq!(out, vec![sample()]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_assembler_resyncs_after_garbage() {
        let frame = encode(&sample()).unwrap();
        let mut stream = vec![0xFF, 0x00, 0x13];
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(&frame);

        let mut asm = FrameAssembler::new();
        let out = asm.push(&stream);
        assert_eq!(out.len(), 2);
        assert_eq!(asm.malformed_count(), 3);
    }

    #[test]
    fn test_assembler_drops_bad_frame_keeps_next() {
        let mut bad = encode(&sample()).unwrap();
        bad[20..28].copy_from_slice(&f64::INFINITY.to_le_bytes());
        let good = encode(&sample()).unwrap();

        let mut asm = FrameAssembler::new();
        let mut out = asm.push(&bad);
        out.extend(asm.push(&good));
        assert_eq!(out, vec![sample()]);
        assert_eq!(asm.malformed_count(), 1);
    }

    proptest! {
        #[test]
        fn prop_finite_samples_survive(
            c in prop::array::uniform9(-1.0e6f64..1.0e6),
            ts in 0.0f64..4.0e9,
            split in 0usize..FRAME_SIZE,
        ) {
            let s = MotionSample::from_channels(c, ts);
            let frame = encode(&s).unwrap();
            let mut asm = FrameAssembler::new();
            let mut out = asm.push(&frame[..split]);
            out.extend(asm.push(&frame[split..]));
            prop_assert_eq!(out, vec![s]);
        }
    }
}
