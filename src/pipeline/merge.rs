//! Stitches per-window transcripts into one timeline.
//!
//! Each window's segments arrive relative to the window start. They are
//! cleaned of non-speech annotations, shifted onto the job timeline and
//! clamped to the window. In the overlap region the later window wins: the
//! earlier tail is cut back to where the later window begins. A word that
//! still appears on both sides of the cut is dropped from the earlier side.

use super::window::Window;
use crate::stt::{Segment, clean_transcription};

/// Shortest word considered for boundary de-duplication. Single letters
/// repeat legitimately ("a", "I").
const MIN_DEDUP_WORD_LEN: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct SegmentMerger {
    segments: Vec<Segment>,
    min_word_length: usize,
}

impl SegmentMerger {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            min_word_length: MIN_DEDUP_WORD_LEN,
        }
    }

    /// Continues from output merged by an earlier run.
    pub fn resume(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            ..Self::new()
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    /// Forgets everything merged from `at` onwards, so windows from there
    /// can be merged again.
    pub fn rewind(&mut self, at: f64) {
        self.cut_tail(at);
    }

    /// Merges one window's output. Returns how many segments were added.
    ///
    /// A window that produced no speech leaves the previous tail untouched.
    pub fn push_window(&mut self, window: &Window, segments: Vec<Segment>) -> usize {
        let incoming: Vec<Segment> = segments
            .into_iter()
            .filter_map(|segment| place(segment, window))
            .collect();
        if incoming.is_empty() {
            return 0;
        }

        self.cut_tail(window.start);
        if incoming[0].start < window.grid_start {
            self.drop_repeated_tail(&incoming[0]);
        }

        let added = incoming.len();
        self.segments.extend(incoming);
        added
    }

    /// Drops everything the earlier windows said from `cut` onwards.
    fn cut_tail(&mut self, cut: f64) {
        self.segments.retain(|s| s.start < cut);
        for segment in self.segments.iter_mut().rev() {
            if segment.end <= cut {
                break;
            }
            segment.end = cut;
            if let Some(words) = segment.words.as_mut() {
                let before = words.len();
                words.retain(|w| w.start < cut);
                for word in words.iter_mut() {
                    word.end = word.end.min(cut);
                }
                if words.len() != before {
                    segment.text = words
                        .iter()
                        .map(|w| w.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ");
                }
            }
        }
        self.segments.retain(|s| !s.text.is_empty());
    }

    /// Removes the last merged word when `next` opens with it. A segment
    /// left without words is dropped.
    fn drop_repeated_tail(&mut self, next: &Segment) {
        let Some(first) = next.text.split_whitespace().next() else {
            return;
        };
        if first.chars().count() < self.min_word_length {
            return;
        }
        let Some(last) = self.segments.last_mut() else {
            return;
        };
        let mut tokens: Vec<&str> = last.text.split_whitespace().collect();
        if tokens
            .last()
            .is_none_or(|word| normalize(word) != normalize(first))
        {
            return;
        }

        tokens.pop();
        last.text = tokens.join(" ");
        if let Some(words) = last.words.as_mut() {
            words.pop();
            if let Some(word) = words.last() {
                last.end = word.end;
            }
        }
        if last.text.is_empty() {
            self.segments.pop();
        }
    }
}

/// Cleans a window-relative segment and moves it onto the job timeline.
fn place(segment: Segment, window: &Window) -> Option<Segment> {
    let text = clean_transcription(&segment.text);
    if text.is_empty() {
        return None;
    }
    let mut placed = Segment { text, ..segment }.shifted(window.start);
    placed.start = placed.start.clamp(window.start, window.end);
    placed.end = placed.end.clamp(placed.start, window.end);
    Some(placed)
}

fn normalize(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
