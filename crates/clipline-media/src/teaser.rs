//! Hook teaser window selection.
//!
//! A teaser is a fixed-length excerpt from inside the clip, prepended
//! before the clip's own start. The LLM proposes a peak offset; it is only
//! trusted when it leaves room for the teaser and actually lands on speech.
//! Otherwise the densest spoken window inside the clip is used.

use clipline_models::{Moment, Word};

/// Teaser length in seconds.
pub const TEASER_DURATION: f64 = 6.0;

/// Minimum offset into the clip for a teaser window.
const MIN_OFFSET: f64 = 2.0;

/// Room that must remain between the teaser start and the clip end.
const MIN_REMAINING: f64 = 7.0;

/// Minimum words inside a window for it to count as speech.
const MIN_SPEECH_WORDS: usize = 3;

/// Resolve the absolute start of the teaser window for a moment.
///
/// Returns `None` when the clip is too short for a teaser or contains no
/// dense-enough speech.
pub fn resolve_peak_window(moment: &Moment, words: &[Word]) -> Option<f64> {
    let duration = moment.duration();
    if duration < MIN_OFFSET + MIN_REMAINING {
        return None;
    }

    // Trust the LLM's offset when it is in range and lands on speech
    if let Some(offset) = moment.peak_offset {
        if offset >= MIN_OFFSET && offset <= duration - MIN_REMAINING {
            let abs_peak = moment.start + offset;
            if has_speech_near(words, abs_peak) {
                return Some(abs_peak);
            }
        }
    }

    // Fall back to the densest speech window inside the clip
    densest_speech_window(
        words,
        moment.start + MIN_OFFSET,
        moment.end - MIN_REMAINING,
    )
}

/// Whether enough words are spoken around `t` to carry a teaser.
fn has_speech_near(words: &[Word], t: f64) -> bool {
    words
        .iter()
        .filter(|w| w.start >= t - 2.0 && w.end <= t + 4.0)
        .count()
        >= MIN_SPEECH_WORDS
}

/// Start of the TEASER_DURATION window with the most spoken words, within
/// `[range_start, range_end]`. Candidate starts are the word starts in
/// range; ties keep the earliest.
pub fn densest_speech_window(words: &[Word], range_start: f64, range_end: f64) -> Option<f64> {
    if range_end <= range_start {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for candidate in words
        .iter()
        .map(|w| w.start)
        .filter(|&s| s >= range_start && s <= range_end)
    {
        let count = words
            .iter()
            .filter(|w| w.start >= candidate && w.end <= candidate + TEASER_DURATION)
            .count();
        if count >= MIN_SPEECH_WORDS && best.map(|(c, _)| count > c).unwrap_or(true) {
            best = Some((count, candidate));
        }
    }

    best.map(|(_, start)| start)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Words spoken steadily from `from` to `to`, three per second.
    fn steady_words(from: f64, to: f64) -> Vec<Word> {
        let mut words = Vec::new();
        let mut t = from;
        while t < to {
            words.push(Word::new("word", t, t + 0.33));
            t += 0.334;
        }
        words
    }

    #[test]
    fn test_valid_peak_offset_is_trusted() {
        let mut moment = Moment::new(100.0, 160.0, "t");
        moment.peak_offset = Some(20.0);
        let words = steady_words(100.0, 160.0);

        let peak = resolve_peak_window(&moment, &words).unwrap();
        assert!((peak - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_density() {
        let mut moment = Moment::new(100.0, 160.0, "t");
        moment.peak_offset = Some(58.0); // less than 7s of room left
        let words = steady_words(100.0, 160.0);

        let peak = resolve_peak_window(&moment, &words).unwrap();
        assert!(peak >= 102.0);
        assert!(peak <= 153.0);
    }

    #[test]
    fn test_silent_peak_shifts_to_speech() {
        let mut moment = Moment::new(100.0, 160.0, "t");
        moment.peak_offset = Some(10.0); // silence at 110
        // Speech only in the second half of the clip
        let words = steady_words(130.0, 150.0);

        let peak = resolve_peak_window(&moment, &words).unwrap();
        assert!(peak >= 130.0, "peak {} should move into the speech", peak);
    }

    #[test]
    fn test_clip_too_short_for_teaser() {
        let mut moment = Moment::new(100.0, 108.0, "t");
        moment.peak_offset = Some(3.0);
        let words = steady_words(100.0, 108.0);
        assert!(resolve_peak_window(&moment, &words).is_none());
    }

    #[test]
    fn test_no_speech_means_no_teaser() {
        let moment = Moment::new(100.0, 160.0, "t");
        assert!(resolve_peak_window(&moment, &[]).is_none());
    }

    #[test]
    fn test_densest_window_picks_heaviest_region() {
        // Sparse words early, dense burst at 140
        let mut words = vec![
            Word::new("a", 105.0, 105.3),
            Word::new("b", 112.0, 112.3),
        ];
        words.extend(steady_words(140.0, 146.0));

        let start = densest_speech_window(&words, 102.0, 150.0).unwrap();
        assert!((140.0..=141.0).contains(&start));
    }
}
