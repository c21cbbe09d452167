//! Timestamped transcript segments produced by a transcriber.

use serde::{Deserialize, Serialize};

/// One word with its time span, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A run of transcribed text with its time span, in seconds.
///
/// Times are relative to whatever audio the transcriber was given; the chunk
/// pipeline shifts them onto the job's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

impl Segment {
    /// Creates a segment without word timings.
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            words: None,
        }
    }

    /// Duration of the segment in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Moves the segment (and its words) by `offset` seconds.
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self.end += offset;
        if let Some(words) = self.words.as_mut() {
            for word in words {
                word.start += offset;
                word.end += offset;
            }
        }
        self
    }

    /// Fills in word timings by spreading the segment span across its words,
    /// weighted by word length. Existing word timings are kept.
    pub fn with_estimated_words(mut self) -> Self {
        if self.words.is_some() {
            return self;
        }
        let tokens: Vec<&str> = self.text.split_whitespace().collect();
        let total_chars: usize = tokens.iter().map(|t| t.chars().count()).sum();
        if tokens.is_empty() || total_chars == 0 {
            self.words = Some(Vec::new());
            return self;
        }

        let span = self.duration();
        let mut cursor = self.start;
        let mut words = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            let share = token.chars().count() as f64 / total_chars as f64;
            let end = if i + 1 == tokens.len() {
                self.end
            } else {
                cursor + span * share
            };
            words.push(Word {
                text: (*token).to_string(),
                start: cursor,
                end,
            });
            cursor = end;
        }
        self.words = Some(words);
        self
    }
}

/// Strips Whisper non-speech annotations in any language.
///
/// Whisper wraps annotations in `[…]`, `*…*`, or `(…)`; these never contain
/// real speech. Unmatched opening delimiters are kept as-is.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        let close = match ch {
            '[' => Some(']'),
            '(' => Some(')'),
            '*' => Some('*'),
            _ => None,
        };
        let Some(close) = close else {
            result.push(ch);
            chars.next();
            continue;
        };

        chars.next(); // consume opener
        let mut buf = String::new();
        let mut found_close = false;
        while let Some(&inner) = chars.peek() {
            chars.next();
            if inner == close {
                found_close = true;
                break;
            }
            buf.push(inner);
        }
        if !found_close {
            result.push(ch);
            result.push_str(&buf);
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifted_moves_segment_and_words() {
        let segment = Segment::new("hello world", 1.0, 2.0)
            .with_estimated_words()
            .shifted(30.0);

        assert_eq!(segment.start, 31.0);
        assert_eq!(segment.end, 32.0);
        let words = segment.words.unwrap();
        assert_eq!(words[0].start, 31.0);
        assert_eq!(words[1].end, 32.0);
    }

    #[test]
    fn estimated_words_cover_segment_span() {
        let segment = Segment::new("a bbb", 0.0, 4.0).with_estimated_words();
        let words = segment.words.unwrap();

        assert_eq!(words.len(), 2);
        assert_eq!(words[0].text, "a");
        assert_eq!(words[0].start, 0.0);
        assert!((words[0].end - 1.0).abs() < 1e-9);
        assert_eq!(words[1].end, 4.0);
    }

    #[test]
    fn estimated_words_keep_existing_timings() {
        let mut segment = Segment::new("hi", 0.0, 1.0);
        segment.words = Some(vec![Word {
            text: "hi".to_string(),
            start: 0.2,
            end: 0.4,
        }]);
        let segment = segment.with_estimated_words();
        assert_eq!(segment.words.unwrap()[0].start, 0.2);
    }

    #[test]
    fn estimated_words_on_empty_text() {
        let segment = Segment::new("   ", 0.0, 1.0).with_estimated_words();
        assert_eq!(segment.words, Some(Vec::new()));
    }

    #[test]
    fn duration_never_negative() {
        assert_eq!(Segment::new("x", 5.0, 4.0).duration(), 0.0);
    }

    #[test]
    fn clean_removes_bracket_annotations() {
        assert_eq!(clean_transcription("[BLANK_AUDIO]"), "");
        assert_eq!(clean_transcription("Hello [MUSIC] world"), "Hello world");
    }

    #[test]
    fn clean_removes_parens_and_asterisks() {
        assert_eq!(
            clean_transcription("(applause) thank you *laughs* all"),
            "thank you all"
        );
    }

    #[test]
    fn clean_keeps_unmatched_opener() {
        assert_eq!(clean_transcription("five (or six"), "five (or six");
    }

    #[test]
    fn clean_preserves_normal_text() {
        assert_eq!(clean_transcription("  Hello   world "), "Hello world");
    }

    #[test]
    fn segment_serde_skips_missing_words() {
        let json = serde_json::to_string(&Segment::new("hi", 0.0, 1.0)).unwrap();
        assert!(!json.contains("words"));
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.words, None);
    }
}
