use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use super::wav;
use super::{PcmAudio, SAMPLE_RATE, samples_from_f32};
use crate::error::{PipelineError, PipelineResult};

/// Containers the decoder facade recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Mp4,
    Mpeg,
    Mpga,
    M4a,
    Wav,
    Webm,
    Flac,
    Ogg,
    Amr,
    Pcm,
}

impl AudioFormat {
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "mp4" => Some(Self::Mp4),
            "mpeg" => Some(Self::Mpeg),
            "mpga" => Some(Self::Mpga),
            "m4a" => Some(Self::M4a),
            "wav" | "wave" => Some(Self::Wav),
            "webm" => Some(Self::Webm),
            "flac" => Some(Self::Flac),
            "ogg" | "oga" => Some(Self::Ogg),
            "amr" => Some(Self::Amr),
            "pcm" | "raw" => Some(Self::Pcm),
            _ => None,
        }
    }

    /// Extension handed to the demuxer probe.
    fn probe_extension(self) -> &'static str {
        match self {
            Self::Mp3 | Self::Mpeg | Self::Mpga => "mp3",
            Self::Mp4 => "mp4",
            Self::M4a => "m4a",
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Amr => "amr",
            Self::Pcm => "pcm",
        }
    }
}

/// Sniffs a container from leading magic bytes.
pub fn sniff_magic(bytes: &[u8]) -> Option<AudioFormat> {
    if bytes.len() < 12 {
        return None;
    }
    if &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(AudioFormat::Wav);
    }
    if &bytes[0..4] == b"fLaC" {
        return Some(AudioFormat::Flac);
    }
    if &bytes[0..4] == b"OggS" {
        return Some(AudioFormat::Ogg);
    }
    if bytes.starts_with(b"#!AMR") {
        return Some(AudioFormat::Amr);
    }
    if &bytes[4..8] == b"ftyp" {
        return Some(AudioFormat::Mp4);
    }
    if bytes[0..4] == [0x1A, 0x45, 0xDF, 0xA3] {
        return Some(AudioFormat::Webm);
    }
    if &bytes[0..3] == b"ID3" || (bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0) {
        return Some(AudioFormat::Mp3);
    }
    None
}

/// Resolves the container: explicit hint first, then filename extension,
/// then magic bytes.
pub fn detect_format(
    hint: Option<&str>,
    filename: Option<&str>,
    magic: &[u8],
) -> Option<AudioFormat> {
    if let Some(hint) = hint
        && let Some(format) = AudioFormat::from_hint(hint)
    {
        return Some(format);
    }
    if let Some(name) = filename
        && let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str())
        && let Some(format) = AudioFormat::from_hint(ext)
    {
        return Some(format);
    }
    sniff_magic(magic)
}

/// Decodes an audio file into canonical PCM (16-bit mono 16 kHz).
///
/// Stateless; rejects inputs whose decoded duration is zero.
pub fn decode_file(path: &Path, hint: Option<&str>) -> PipelineResult<PcmAudio> {
    let mut magic = [0u8; 16];
    let read = {
        let mut file = File::open(path)?;
        file.read(&mut magic)?
    };
    let filename = path.file_name().and_then(|n| n.to_str());
    let format = detect_format(hint, filename, &magic[..read]);
    debug!(path = %path.display(), ?format, "decoding audio file");

    let audio = match format {
        Some(AudioFormat::Pcm) => {
            let mut bytes = Vec::new();
            File::open(path)?.read_to_end(&mut bytes)?;
            decode_raw_pcm(&bytes)?
        }
        Some(AudioFormat::Wav) => wav::read_wav(path)
            .map_err(|e| PipelineError::InvalidMessage(format!("invalid WAV file: {e}")))?,
        other => {
            let file = File::open(path)?;
            decode_with_demuxer(Box::new(file), other)?
        }
    };

    reject_empty(audio)
}

/// Decodes an in-memory byte buffer into canonical PCM.
pub fn decode_bytes(
    bytes: Vec<u8>,
    hint: Option<&str>,
    filename: Option<&str>,
) -> PipelineResult<PcmAudio> {
    let format = detect_format(hint, filename, &bytes);
    debug!(len = bytes.len(), ?format, "decoding audio buffer");

    let audio = match format {
        Some(AudioFormat::Pcm) => decode_raw_pcm(&bytes)?,
        Some(AudioFormat::Wav) => wav::read_wav_from(Cursor::new(bytes))
            .map_err(|e| PipelineError::InvalidMessage(format!("invalid WAV data: {e}")))?,
        other => decode_with_demuxer(Box::new(Cursor::new(bytes)), other)?,
    };

    reject_empty(audio)
}

fn reject_empty(audio: PcmAudio) -> PipelineResult<PcmAudio> {
    if audio.is_empty() {
        return Err(PipelineError::InvalidMessage(
            "decoded audio is empty".to_string(),
        ));
    }
    Ok(audio)
}

/// Raw little-endian signed 16-bit mono at 16 kHz.
fn decode_raw_pcm(bytes: &[u8]) -> PipelineResult<PcmAudio> {
    if bytes.len() % 2 != 0 {
        return Err(PipelineError::InvalidMessage(
            "raw PCM payload has an odd byte count".to_string(),
        ));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(PcmAudio::from_samples(samples))
}

/// Demuxes and decodes any probe-supported container down to canonical PCM.
fn decode_with_demuxer(
    source: Box<dyn MediaSource>,
    format: Option<AudioFormat>,
) -> PipelineResult<PcmAudio> {
    let stream = MediaSourceStream::new(source, Default::default());
    let mut probe_hint = Hint::new();
    if let Some(format) = format {
        probe_hint.with_extension(format.probe_extension());
    }

    let probed = symphonia::default::get_probe()
        .format(
            &probe_hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            PipelineError::InvalidMessage(format!("unsupported or corrupt audio container: {e}"))
        })?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PipelineError::InvalidMessage("no audio track found".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PipelineError::InvalidMessage(format!("unsupported audio codec: {e}")))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(PipelineError::InvalidMessage(format!(
                    "audio demux failed: {e}"
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buffer.samples());
            }
            // Recoverable bad frame; keep going
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(PipelineError::InvalidMessage(format!(
                    "audio decode failed: {e}"
                )));
            }
        }
    }

    let mono = wav::downmix(interleaved, channels);
    let mono = if sample_rate != SAMPLE_RATE {
        wav::resample_to_16k(&mono, sample_rate)
            .map_err(|e| PipelineError::Transient(e.to_string()))?
    } else {
        mono
    };

    Ok(PcmAudio::from_samples(samples_from_f32(&mono)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_wins_over_extension_and_magic() {
        let wav_magic = b"RIFF\x00\x00\x00\x00WAVEfmt ";
        assert_eq!(
            detect_format(Some("mp3"), Some("a.wav"), wav_magic),
            Some(AudioFormat::Mp3)
        );
        assert_eq!(
            detect_format(None, Some("a.flac"), wav_magic),
            Some(AudioFormat::Flac)
        );
        assert_eq!(detect_format(None, None, wav_magic), Some(AudioFormat::Wav));
    }

    #[test]
    fn magic_sniffing_covers_common_containers() {
        assert_eq!(sniff_magic(b"fLaC\x00\x00\x00\x22aaaaaaaa"), Some(AudioFormat::Flac));
        assert_eq!(sniff_magic(b"OggS\x00\x02\x00\x00\x00\x00\x00\x00"), Some(AudioFormat::Ogg));
        assert_eq!(sniff_magic(b"ID3\x04\x00\x00\x00\x00\x00\x00\x00\x00"), Some(AudioFormat::Mp3));
        assert_eq!(sniff_magic(b"\x00\x00\x00\x20ftypisom\x00\x00"), Some(AudioFormat::Mp4));
        assert_eq!(sniff_magic(b"#!AMR\x0a\x00\x00\x00\x00\x00\x00"), Some(AudioFormat::Amr));
        assert_eq!(sniff_magic(b"\x1a\x45\xdf\xa3\x00\x00\x00\x00\x00\x00\x00\x00"), Some(AudioFormat::Webm));
        assert_eq!(sniff_magic(b"nothing here"), None);
    }

    #[test]
    fn decodes_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..8000).map(|i| ((i % 160) * 100) as i16).collect();
        wav::write_wav(&path, &samples).unwrap();

        let audio = decode_file(&path, None).unwrap();
        assert_eq!(audio.samples, samples);
    }

    #[test]
    fn decodes_raw_pcm_bytes() {
        let samples: Vec<i16> = vec![100, -100, 2000, -2000];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let audio = decode_bytes(bytes, Some("pcm"), None).unwrap();
        assert_eq!(audio.samples, samples);
    }

    #[test]
    fn rejects_empty_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        wav::write_wav(&path, &[]).unwrap();
        let err = decode_file(&path, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMessage(_)));
    }

    #[test]
    fn rejects_odd_raw_pcm() {
        let err = decode_bytes(vec![1, 2, 3], Some("pcm"), None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMessage(_)));
    }
}
