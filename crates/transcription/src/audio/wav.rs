use std::io::{Read, Seek};
use std::path::Path;

use rubato::{FftFixedInOut, Resampler};

use super::{PcmAudio, SAMPLE_RATE, samples_from_f32, samples_to_f32};

/// Input block size fed to the polyphase resampler per call.
const RESAMPLE_BLOCK: usize = 1024;

/// Reads a WAV file and returns canonical PCM (16-bit mono 16 kHz).
///
/// 16-bit input at the canonical rate stays on an integer path; other
/// widths and rates go through float conversion and resampling. A corrupt
/// sample stream is an error, not silence.
pub fn read_wav(path: impl AsRef<Path>) -> anyhow::Result<PcmAudio> {
    let reader = hound::WavReader::open(path.as_ref()).map_err(|e| {
        anyhow::anyhow!("failed to open WAV '{}': {}", path.as_ref().display(), e)
    })?;
    read_wav_inner(reader)
}

/// Reads a WAV stream from any reader (e.g. an in-memory byte buffer).
pub fn read_wav_from<R: Read + Seek>(reader: R) -> anyhow::Result<PcmAudio> {
    let reader =
        hound::WavReader::new(reader).map_err(|e| anyhow::anyhow!("failed to parse WAV: {e}"))?;
    read_wav_inner(reader)
}

fn read_wav_inner<R: Read>(reader: hound::WavReader<R>) -> anyhow::Result<PcmAudio> {
    let spec = reader.spec();
    if spec.channels == 0 {
        anyhow::bail!("WAV declares zero channels");
    }
    let channels = spec.channels as usize;

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let samples = reader
                .into_samples::<i16>()
                .collect::<Result<Vec<i16>, _>>()
                .map_err(|e| anyhow::anyhow!("corrupt WAV sample data: {e}"))?;
            let mono = mono_i16(&samples, channels);
            if spec.sample_rate == SAMPLE_RATE {
                return Ok(PcmAudio::from_samples(mono));
            }
            let resampled = resample_to_16k(&samples_to_f32(&mono), spec.sample_rate)?;
            Ok(PcmAudio::from_samples(samples_from_f32(&resampled)))
        }
        (hound::SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            let samples = reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| anyhow::anyhow!("corrupt WAV sample data: {e}"))?;
            let mono = mono_f32(&samples, channels);
            let mono = resample_to_16k(&mono, spec.sample_rate)?;
            Ok(PcmAudio::from_samples(samples_from_f32(&mono)))
        }
        (hound::SampleFormat::Float, 32) => {
            let samples = reader
                .into_samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| anyhow::anyhow!("corrupt WAV sample data: {e}"))?;
            let mono = mono_f32(&samples, channels);
            let mono = resample_to_16k(&mono, spec.sample_rate)?;
            Ok(PcmAudio::from_samples(samples_from_f32(&mono)))
        }
        (hound::SampleFormat::Float, bits) => {
            anyhow::bail!("unsupported {bits}-bit float WAV")
        }
    }
}

/// Writes canonical PCM to `path` as a 16 kHz mono 16-bit WAV.
pub fn write_wav(path: impl AsRef<Path>, samples: &[i16]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec).map_err(|e| {
        anyhow::anyhow!("failed to create WAV '{}': {}", path.as_ref().display(), e)
    })?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Averages interleaved 16-bit frames to mono without leaving integers.
fn mono_i16(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn mono_f32(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Averages interleaved float frames to mono.
pub fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    mono_f32(&samples, channels)
}

/// Brings mono audio from `src_rate` Hz to 16 kHz with an FFT polyphase
/// resampler, feeding fixed input blocks and zero-filling the final
/// partial one. Output is trimmed to the exact expected frame count.
pub fn resample_to_16k(audio: &[f32], src_rate: u32) -> anyhow::Result<Vec<f32>> {
    if src_rate == SAMPLE_RATE {
        return Ok(audio.to_vec());
    }
    if audio.is_empty() {
        return Ok(Vec::new());
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(src_rate as usize, SAMPLE_RATE as usize, RESAMPLE_BLOCK, 1)
            .map_err(|e| anyhow::anyhow!("failed to create {src_rate} Hz resampler: {e}"))?;

    let expected = (audio.len() as u64 * SAMPLE_RATE as u64 / src_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLE_BLOCK);
    let mut position = 0;

    while position < audio.len() {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(audio.len());
        let mut block = audio[position..end].to_vec();
        block.resize(needed, 0.0);

        let mut frames = resampler
            .process(&[block], None)
            .map_err(|e| anyhow::anyhow!("resample failed: {e}"))?;
        output.append(&mut frames[0]);
        position = end;
    }

    output.truncate(expected);
    Ok(output)
}
