//! PCM helpers: byte decoding, down-mixing and linear resampling

use crate::error::{Result, SessionError};

/// Little-endian 16-bit PCM bytes to samples. A trailing odd byte is dropped.
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Interleaved samples to mono. Stereo frames are averaged.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Result<Vec<i16>> {
    match channels {
        1 => Ok(samples.to_vec()),
        2 => Ok(samples
            .chunks_exact(2)
            .map(|frame| ((frame[0] as i32 + frame[1] as i32) / 2) as i16)
            .collect()),
        other => Err(SessionError::InvalidFormat(format!(
            "{other} channels (expected 1 or 2)"
        ))),
    }
}

/// Linear interpolation from `from_rate` to `to_rate`. Equal rates return the input unchanged.
pub fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let output_len = ((input.len() as f64) * to_rate as f64 / from_rate as f64)
        .round()
        .max(1.0) as usize;

    if input.len() == 1 {
        return vec![input[0]; output_len];
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;
    let mut output = Vec::with_capacity(output_len);

    for index in 0..output_len {
        let position = index as f64 * ratio;
        let base = (position.floor() as usize).min(last);
        let next = (base + 1).min(last);
        let fraction = position - base as f64;
        let s0 = input[base] as f64;
        let s1 = input[next] as f64;
        let value = s0 + (s1 - s0) * fraction.clamp(0.0, 1.0);
        output.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    output
}
