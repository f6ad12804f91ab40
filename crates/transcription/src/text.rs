use tracing::warn;

/// Punctuation that closes a sentence, full-width and ASCII.
const SENTENCE_PUNCTUATION: [char; 12] = [
    '，', '。', '！', '？', '；', '：', ',', '.', '!', '?', ';', ':',
];

pub fn is_sentence_punctuation(c: char) -> bool {
    SENTENCE_PUNCTUATION.contains(&c)
}

/// One sentence with its apportioned time span.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSentence {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Strips recognizer meta tags of the form `<|...|>` and trims the result.
pub fn clean_asr_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<|") {
        let after = &rest[open + 2..];
        let tag_body = after
            .find("|>")
            .map(|close| &after[..close])
            .filter(|body| !body.is_empty() && !body.contains('|') && !body.contains('>'));
        match tag_body {
            Some(body) => {
                out.push_str(&rest[..open]);
                rest = &after[body.len() + 2..];
            }
            None => {
                out.push_str(&rest[..open + 2]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn trim_trailing_punctuation(text: &str) -> String {
    text.trim_end_matches(is_sentence_punctuation).to_string()
}

fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Splits `text` on sentence punctuation and distributes `[start, end]`
/// across the sentences proportional to their character counts.
///
/// Meta tags are stripped first; each emitted sentence loses its trailing
/// punctuation; the last sentence's end is snapped back to `end` so
/// rounding never drifts the total span.
pub fn split_by_punctuation(text: &str, start: f64, end: f64) -> Vec<TimedSentence> {
    let text = clean_asr_tags(text);
    if text.is_empty() {
        return Vec::new();
    }

    let total_duration = end - start;
    if total_duration <= 0.0 {
        return vec![TimedSentence {
            text: trim_trailing_punctuation(&text),
            start,
            end,
        }];
    }

    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if is_sentence_punctuation(c) {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    if sentences.len() <= 1 {
        let only = sentences.into_iter().next().unwrap_or(text);
        return vec![TimedSentence {
            text: trim_trailing_punctuation(&only),
            start,
            end,
        }];
    }

    let total_chars: usize = sentences.iter().map(|s| s.chars().count()).sum();
    if total_chars == 0 {
        return vec![TimedSentence {
            text: trim_trailing_punctuation(&text),
            start,
            end,
        }];
    }

    let mut out = Vec::with_capacity(sentences.len());
    let mut current_time = start;
    for sentence in &sentences {
        let ratio = sentence.chars().count() as f64 / total_chars as f64;
        let seg_end = current_time + total_duration * ratio;
        out.push(TimedSentence {
            text: trim_trailing_punctuation(sentence),
            start: round_ms(current_time),
            end: round_ms(seg_end),
        });
        current_time = seg_end;
    }
    if let Some(last) = out.last_mut() {
        last.end = end;
    }
    out
}

/// Inverse text normalization, an opaque post-processing collaborator.
pub trait ItnNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> anyhow::Result<String>;
}

/// Applies ITN to final text. Failures are non-fatal: the original text is
/// returned unchanged.
pub fn apply_itn(normalizer: &dyn ItnNormalizer, text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    match normalizer.normalize(text) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(error = %e, "inverse text normalization failed, keeping original text");
            text.to_string()
        }
    }
}

fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF | 0x3040..=0x30FF)
}

/// True when the text contains CJK ideographs.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

/// Joins per-segment texts, inserting a space only between non-CJK
/// neighbors so both Chinese and Latin output read naturally.
pub fn join_texts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for part in parts {
        let part = part.as_ref().trim();
        if part.is_empty() {
            continue;
        }
        if !out.is_empty() {
            let left_cjk = out.chars().last().is_some_and(is_cjk_char);
            let right_cjk = part.chars().next().is_some_and(is_cjk_char);
            if !left_cjk && !right_cjk {
                out.push(' ');
            }
        }
        out.push_str(part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_meta_tags() {
        assert_eq!(clean_asr_tags("<|zh|><|NEUTRAL|>你好世界"), "你好世界");
        assert_eq!(clean_asr_tags("hello <|itn|> world"), "hello  world");
        assert_eq!(clean_asr_tags("plain text"), "plain text");
        // Unterminated or empty tags pass through literally
        assert_eq!(clean_asr_tags("a <| b"), "a <| b");
        assert_eq!(clean_asr_tags("a <||> b"), "a <||> b");
    }

    #[test]
    fn splits_sentences_and_apportions_time() {
        let out = split_by_punctuation("你好。今天天气不错！我们走吧", 10.0, 20.0);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text, "你好");
        assert_eq!(out[1].text, "今天天气不错");
        assert_eq!(out[2].text, "我们走吧");

        // Spans tile [10, 20] in order
        assert_eq!(out[0].start, 10.0);
        assert_eq!(out[2].end, 20.0);
        assert!(out[0].end <= out[1].start + 0.001);
        assert!(out[1].end <= out[2].start + 0.001);

        // Proportional: "今天天气不错！" is 7 chars of 14 total
        let mid = &out[1];
        assert!((mid.end - mid.start - 5.0).abs() < 0.01);
    }

    #[test]
    fn single_sentence_passes_through() {
        let out = split_by_punctuation("just one sentence.", 1.0, 2.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "just one sentence");
        assert_eq!(out[0].start, 1.0);
        assert_eq!(out[0].end, 2.5);
    }

    #[test]
    fn degenerate_span_returns_input_unchanged() {
        let out = split_by_punctuation("a. b. c.", 5.0, 5.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].start, 5.0);
        assert_eq!(out[0].end, 5.0);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_by_punctuation("", 0.0, 1.0).is_empty());
        assert!(split_by_punctuation("<|nospeech|>", 0.0, 1.0).is_empty());
    }

    #[test]
    fn last_end_is_snapped_exactly() {
        let out = split_by_punctuation("一。二。三。四。五。六。七", 0.0, 1.0);
        assert_eq!(out.last().unwrap().end, 1.0);
    }

    #[test]
    fn character_content_is_preserved() {
        let input = "第一句。第二句！第三句";
        let out = split_by_punctuation(input, 0.0, 3.0);
        let joined: String = out.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, "第一句第二句第三句");
    }

    #[test]
    fn itn_failures_are_swallowed() {
        struct Failing;
        impl ItnNormalizer for Failing {
            fn normalize(&self, _text: &str) -> anyhow::Result<String> {
                anyhow::bail!("model not loaded")
            }
        }
        assert_eq!(apply_itn(&Failing, "三点十五分"), "三点十五分");

        struct Upper;
        impl ItnNormalizer for Upper {
            fn normalize(&self, text: &str) -> anyhow::Result<String> {
                Ok(text.to_uppercase())
            }
        }
        assert_eq!(apply_itn(&Upper, "ok"), "OK");
    }

    #[test]
    fn cjk_aware_join() {
        assert_eq!(join_texts(["你好", "世界"]), "你好世界");
        assert_eq!(join_texts(["hello", "world"]), "hello world");
        assert_eq!(join_texts(["hello", "世界"]), "hello世界");
        assert_eq!(join_texts(["", "a", "", "b"]), "a b");
    }
}
