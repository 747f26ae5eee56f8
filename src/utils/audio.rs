//! PCM sample conversion shared by the capture and playback paths.
//!
//! The wire contract is linear PCM, 16-bit signed little-endian, mono,
//! 24 kHz. Hardware streams run in whatever format the device offers, so
//! everything here converts between the device side (`f32` in [-1, 1],
//! arbitrary channel count and rate) and the wire side.

/// Sample rate required by the remote streaming endpoint.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Convert a normalized float sample to 16-bit signed PCM.
///
/// Uses asymmetric scaling so that -1.0 maps to i16::MIN and 1.0 to
/// i16::MAX without overflow. Input is clamped to [-1, 1] first.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert a 16-bit signed PCM sample back to normalized float.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    (sample as f32 / 32767.0).clamp(-1.0, 1.0)
}

/// Downmix an interleaved multi-channel float buffer to mono by averaging.
pub fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear resample a mono buffer from `from_rate` to `to_rate`.
///
/// Quality is fine for speech; playback and capture both run through this
/// when the device rate differs from the 24 kHz wire rate.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = samples[idx];
        let b = if idx + 1 < samples.len() {
            samples[idx + 1]
        } else {
            a
        };
        out.push(a + (b - a) * frac);
    }
    out
}

/// Pack i16 samples into little-endian bytes (the wire layout).
pub fn pack_s16le(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Unpack little-endian bytes into i16 samples. A trailing odd byte is
/// ignored.
pub fn unpack_s16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_scale() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(2.5), 32767);
        assert_eq!(f32_to_i16(-3.0), -32768);
    }

    #[test]
    fn test_i16_roundtrip_is_close() {
        for s in [-32767i16, -12345, -1, 0, 1, 12345, 32767] {
            let back = f32_to_i16(i16_to_f32(s));
            assert!((back as i32 - s as i32).abs() <= 1, "{} -> {}", s, back);
        }
    }

    #[test]
    fn test_downmix_stereo() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let data = [0.1, 0.2];
        assert_eq!(downmix_to_mono(&data, 1), data.to_vec());
    }

    #[test]
    fn test_resample_identity() {
        let samples = [0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 24_000, 24_000), samples.to_vec());
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let out = resample_linear(&samples, 48_000, 24_000);
        assert_eq!(out.len(), 240);
        // Values stay monotonic under linear interpolation of a ramp
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let samples = vec![-32768i16, -1, 0, 1, 32767];
        let bytes = pack_s16le(&samples);
        assert_eq!(bytes.len(), 10);
        assert_eq!(unpack_s16le(&bytes), samples);
    }

    #[test]
    fn test_unpack_ignores_trailing_byte() {
        let samples = unpack_s16le(&[0x01, 0x00, 0xff]);
        assert_eq!(samples, vec![1]);
    }
}
