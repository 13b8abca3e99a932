// PCM codec for the realtime transport
//
// Outbound: normalized f32 capture samples -> 16-bit signed little-endian PCM.
// Inbound: 16-bit signed little-endian PCM bytes -> normalized f32 samples.

use thiserror::Error;

/// Scale between normalized floats and 16-bit PCM
const I16_SCALE: f32 = 32768.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    #[error("empty audio frame")]
    Empty,

    #[error("odd byte length {0} is not a whole number of 16-bit samples")]
    OddLength(usize),
}

/// Convert normalized float samples to 16-bit PCM.
///
/// Values outside [-1.0, 1.0] saturate at the i16 bounds instead of wrapping.
pub fn encode_block(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Serialize PCM samples as little-endian bytes
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode a received PCM frame into normalized float samples
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<f32>, PcmError> {
    if bytes.is_empty() {
        return Err(PcmError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / I16_SCALE)
        .collect())
}

/// Duration in seconds of `sample_count` mono samples
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}

/// Peak absolute amplitude of a block, used for capture level logging
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scales_and_saturates() {
        let pcm = encode_block(&[0.0, 0.5, -0.5, 1.0, -1.0, 1.7, -3.0]);

        assert_eq!(pcm[0], 0);
        assert_eq!(pcm[1], 16384);
        assert_eq!(pcm[2], -16384);
        assert_eq!(pcm[3], i16::MAX); // 32768 clamps to 32767
        assert_eq!(pcm[4], i16::MIN);
        assert_eq!(pcm[5], i16::MAX); // Never wraps
        assert_eq!(pcm[6], i16::MIN);
    }

    #[test]
    fn test_encode_nan_is_silence() {
        assert_eq!(encode_block(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn test_le_byte_layout() {
        let bytes = to_le_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_decode_normalizes() {
        let bytes = to_le_bytes(&[0, 16384, i16::MIN, i16::MAX]);
        let samples = decode_frame(&bytes).unwrap();

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -1.0);
        assert!(samples[3] < 1.0 && samples[3] > 0.999);
    }

    #[test]
    fn test_decode_rejects_empty_and_odd() {
        assert_eq!(decode_frame(&[]), Err(PcmError::Empty));
        assert_eq!(decode_frame(&[0, 1, 2]), Err(PcmError::OddLength(3)));
    }

    #[test]
    fn test_duration_of_capture_block() {
        let secs = duration_secs(4096, 16000);
        assert!((secs - 0.256).abs() < 1e-9);
        assert_eq!(duration_secs(100, 0), 0.0);
    }

    #[test]
    fn test_peak_level() {
        assert_eq!(peak_level(&[0.1, -0.7, 0.3]), 0.7);
        assert_eq!(peak_level(&[]), 0.0);
    }
}
