//! Audio helpers shared by the providers: WAV decode/encode, mono downmix,
//! resampling, normalization and data URIs.

use crate::error::{ProviderError, Result};
use crate::types::CombinedVoicePrompt;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Peak level used by [`normalize`].
const NORMALIZE_PEAK: f32 = 0.95;

/// MIME type for a reference clip, derived from its extension.
pub fn mime_for_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        _ => "audio/wav",
    }
}

/// `data:<mime>;base64,<payload>`
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Splits a base64 data URI into its MIME type and decoded bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ProviderError::InvalidInput("not a data URI".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ProviderError::InvalidInput("data URI has no payload".into()))?;
    let mime = header.strip_suffix(";base64").ok_or_else(|| {
        ProviderError::InvalidInput("only base64 data URIs are supported".into())
    })?;
    let bytes = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ProviderError::InvalidInput(format!("bad base64 payload: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

/// Decodes an in-memory WAV file to mono f32 samples.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ProviderError::InvalidInput(
            "WAV header declares a sample rate of 0 Hz".into(),
        ));
    }
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok((to_mono(samples, channels), spec.sample_rate))
}

/// Reads a reference clip from disk. Only WAV containers can be decoded.
pub async fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if !is_wav {
        return Err(ProviderError::InvalidInput(format!(
            "unsupported reference audio format: {}",
            path.display()
        )));
    }
    let bytes = tokio::fs::read(path).await?;
    decode_wav(&bytes)
}

/// Collapses interleaved multi-channel audio by averaging channels.
pub fn to_mono(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Number of samples [`resample`] produces for an input of `len` samples.
/// A zero rate on either side yields no samples.
pub fn resampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == to_rate {
        return len;
    }
    if from_rate == 0 || to_rate == 0 {
        return 0;
    }
    let ratio = from_rate as f64 / to_rate as f64;
    (len as f64 / ratio) as usize
}

/// Linear interpolation resampling.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    if from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = resampled_len(input.len(), from_rate, to_rate);
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx = src_idx as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < input.len() {
            input[idx] * (1.0 - frac) + input[idx + 1] * frac
        } else if idx < input.len() {
            input[idx]
        } else {
            0.0
        };
        output.push(sample);
    }

    output
}

/// Scales the clip so its peak sits at 0.95 of full scale. Silence is left alone.
pub fn normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let gain = NORMALIZE_PEAK / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// How each clip is conditioned before concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    /// Resample to the first clip's rate and concatenate.
    Resample,
    /// Resample, normalize every clip, concatenate, normalize again.
    Normalize,
}

/// Concatenates decoded clips at the rate of the first one.
pub fn concat_clips(clips: Vec<(Vec<f32>, u32)>, mode: CombineMode) -> (Vec<f32>, u32) {
    let target_rate = clips.first().map(|(_, sr)| *sr).unwrap_or(0);
    let total: usize = clips
        .iter()
        .map(|(s, sr)| resampled_len(s.len(), *sr, target_rate))
        .sum();
    let mut combined = Vec::with_capacity(total);

    for (samples, rate) in clips {
        let mut clip = if rate == target_rate {
            samples
        } else {
            resample(&samples, rate, target_rate)
        };
        if mode == CombineMode::Normalize {
            normalize(&mut clip);
        }
        combined.extend_from_slice(&clip);
    }

    if mode == CombineMode::Normalize {
        normalize(&mut combined);
    }
    (combined, target_rate)
}

/// Loads every reference clip and merges them into one prompt.
pub async fn combine_files(
    audio_paths: &[PathBuf],
    reference_texts: &[String],
    mode: CombineMode,
) -> Result<CombinedVoicePrompt> {
    if audio_paths.len() != reference_texts.len() {
        return Err(ProviderError::InvalidInput(format!(
            "got {} audio files but {} reference texts",
            audio_paths.len(),
            reference_texts.len()
        )));
    }
    if audio_paths.is_empty() {
        return Err(ProviderError::InvalidInput(
            "at least one reference clip is required".into(),
        ));
    }

    let mut clips = Vec::with_capacity(audio_paths.len());
    for path in audio_paths {
        clips.push(load_wav(path).await?);
    }

    let (samples, sample_rate) = concat_clips(clips, mode);
    Ok(CombinedVoicePrompt {
        samples,
        sample_rate,
        reference_text: reference_texts.join(" "),
    })
}

/// Encodes mono samples as a 32-bit float WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub async fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let bytes = encode_wav(samples, sample_rate)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
