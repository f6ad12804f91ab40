use serde::{Deserialize, Serialize};

use crate::asr::{AsrResult, TranscriptionSegment};
use crate::text::{contains_cjk, split_by_punctuation};

/// Output format of the batch transcription endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Text,
    VerboseJson,
    Srt,
    Vtt,
}

impl ResponseFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(Self::Json),
            "text" => Some(Self::Text),
            "verbose_json" => Some(Self::VerboseJson),
            "srt" => Some(Self::Srt),
            "vtt" => Some(Self::Vtt),
            _ => None,
        }
    }

    /// Plain formats carry no timestamps, so coarse segmentation suffices.
    pub fn is_plain(self) -> bool {
        matches!(self, Self::Json | Self::Text)
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json | Self::VerboseJson => "application/json",
            Self::Text | Self::Srt | Self::Vtt => "text/plain; charset=utf-8",
        }
    }
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self::Json
    }
}

fn split_clock(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    (
        total_ms / 3_600_000,
        total_ms / 60_000 % 60,
        total_ms / 1000 % 60,
        total_ms % 1000,
    )
}

/// `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_clock(seconds);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// `HH:MM:SS.mmm`
pub fn format_vtt_timestamp(seconds: f64) -> String {
    let (h, m, s, ms) = split_clock(seconds);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Renders SRT: sentences re-split on punctuation, entries numbered densely
/// from 1.
pub fn render_srt(segments: &[TranscriptionSegment]) -> String {
    let mut out = String::new();
    let mut index = 1;
    for segment in segments {
        for sentence in split_by_punctuation(&segment.text, segment.start, segment.end) {
            out.push_str(&format!(
                "{index}\n{} --> {}\n{}\n\n",
                format_srt_timestamp(sentence.start),
                format_srt_timestamp(sentence.end),
                sentence.text
            ));
            index += 1;
        }
    }
    out
}

/// Renders WebVTT: the `WEBVTT` header, then unnumbered cues.
pub fn render_vtt(segments: &[TranscriptionSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        for sentence in split_by_punctuation(&segment.text, segment.start, segment.end) {
            out.push_str(&format!(
                "{} --> {}\n{}\n\n",
                format_vtt_timestamp(sentence.start),
                format_vtt_timestamp(sentence.end),
                sentence.text
            ));
        }
    }
    out
}

/// Body of a `verbose_json` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerboseTranscription {
    pub task: String,
    pub language: String,
    pub duration: f64,
    pub text: String,
    pub segments: Vec<TranscriptionSegment>,
}

/// Caller override first, else CJK presence decides `zh` vs `en`.
pub fn detect_language(text: &str, override_language: Option<&str>) -> String {
    if let Some(lang) = override_language
        && !lang.trim().is_empty()
    {
        return lang.trim().to_string();
    }
    if contains_cjk(text) {
        "zh".to_string()
    } else {
        "en".to_string()
    }
}

pub fn verbose_transcription(
    result: &AsrResult,
    duration: f64,
    override_language: Option<&str>,
) -> VerboseTranscription {
    let language = result
        .language
        .clone()
        .filter(|l| override_language.is_none() && !l.is_empty())
        .unwrap_or_else(|| detect_language(&result.text, override_language));
    VerboseTranscription {
        task: "transcribe".to_string(),
        language,
        duration,
        text: result.text.clone(),
        segments: result.segments.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting_is_exact() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(3661.5), "01:01:01,500");
        assert_eq!(format_vtt_timestamp(3661.5), "01:01:01.500");
        assert_eq!(format_srt_timestamp(359_999.999), "99:59:59,999");
        assert_eq!(format_srt_timestamp(-1.0), "00:00:00,000");
    }

    #[test]
    fn timestamp_formatting_is_injective_on_the_grid() {
        // Every distinct (h, m, s, ms) renders distinctly and parses back
        let probes = [
            (0u64, 0u64, 0u64, 1u64),
            (0, 0, 59, 999),
            (0, 59, 0, 0),
            (1, 0, 0, 0),
            (99, 59, 59, 999),
            (12, 34, 56, 789),
        ];
        let mut seen = std::collections::HashSet::new();
        for (h, m, s, ms) in probes {
            let seconds = (h * 3600 + m * 60 + s) as f64 + ms as f64 / 1000.0;
            let rendered = format_srt_timestamp(seconds);
            assert_eq!(split_clock(seconds), (h, m, s, ms));
            assert!(seen.insert(rendered));
        }
    }

    fn sample_segments() -> Vec<TranscriptionSegment> {
        vec![
            TranscriptionSegment::new(0, 0.0, 4.0, "第一句。第二句！"),
            TranscriptionSegment::new(1, 4.0, 6.0, "and then the end"),
        ]
    }

    #[test]
    fn srt_numbers_entries_densely() {
        let srt = render_srt(&sample_segments());
        let blocks: Vec<&str> = srt.trim_end().split("\n\n").collect();
        assert_eq!(blocks.len(), 3);
        for (i, block) in blocks.iter().enumerate() {
            let mut lines = block.lines();
            assert_eq!(lines.next().unwrap(), (i + 1).to_string());
            let times = lines.next().unwrap();
            assert!(times.contains(" --> "));
            assert!(times.contains(','));
        }
        assert!(srt.contains("第一句\n"));
    }

    #[test]
    fn vtt_has_header_and_dot_timestamps() {
        let vtt = render_vtt(&sample_segments());
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:02.000 --> 00:00:04.000"));
        assert!(!vtt.contains(','));
    }

    #[test]
    fn language_heuristic() {
        assert_eq!(detect_language("你好", None), "zh");
        assert_eq!(detect_language("hello", None), "en");
        assert_eq!(detect_language("你好", Some("ja")), "ja");
        assert_eq!(detect_language("", None), "en");
    }

    #[test]
    fn verbose_body_shape() {
        let result = AsrResult {
            text: "hello world".to_string(),
            segments: vec![TranscriptionSegment::new(0, 0.0, 1.5, "hello world")],
            language: None,
        };
        let body = verbose_transcription(&result, 1.5, None);
        assert_eq!(body.task, "transcribe");
        assert_eq!(body.language, "en");
        assert_eq!(body.duration, 1.5);
        assert_eq!(body.segments.len(), 1);

        let value = serde_json::to_value(&body).unwrap();
        assert!(value["segments"][0].get("speaker_id").is_none());
        assert_eq!(value["segments"][0]["no_speech_prob"], 0.0);
    }
}
