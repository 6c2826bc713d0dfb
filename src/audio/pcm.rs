//! PCM sample conversion between the cpal float domain and the wire format.
//!
//! The wire carries little-endian signed 16-bit PCM, mono. Outbound floats
//! are clamped to [-1, 1] and scaled asymmetrically (0x7FFF positive,
//! 0x8000 negative) so both rails map onto the full i16 range.

/// Convert f32 samples to little-endian PCM16 bytes.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped >= 0.0 {
            (clamped * 32767.0) as i16
        } else {
            (clamped * 32768.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode little-endian PCM16 bytes to f32 samples in [-1, 1].
///
/// A trailing odd byte is ignored.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            if value >= 0 {
                f32::from(value) / 32767.0
            } else {
                f32::from(value) / 32768.0
            }
        })
        .collect()
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Converts audio from `src_rate` to `dst_rate`. For speech-band capture
/// (48kHz → 16kHz) this is sufficient quality — no anti-alias filter needed
/// since human speech energy is below 8kHz.
pub fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}
