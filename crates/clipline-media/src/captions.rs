//! ASS caption generation with word-accurate highlight timing.
//!
//! Transcript words inside the clip window are grouped into fixed-size
//! chunks. A chunk is on screen from its first word's start to its last
//! word's end; when highlighting is enabled the currently-spoken word is
//! recolored by emitting one dialogue event per word window, switching
//! exactly at that word's start/end timestamps.

use clipline_models::{JobConfig, TitlePosition, Word};

/// Canvas the captions are authored against (matches the render canvas).
pub const PLAY_RES_X: u32 = 1080;
pub const PLAY_RES_Y: u32 = 1920;

/// Sub-frame slack below which two timestamps are considered equal.
const TIME_EPSILON: f64 = 1e-4;

/// One dialogue event, times relative to clip start.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionEvent {
    pub start: f64,
    pub end: f64,
    pub style: &'static str,
    pub text: String,
}

/// A caption chunk's display window, times relative to clip start.
#[derive(Debug, Clone)]
pub struct ChunkWindow {
    pub start: f64,
    pub end: f64,
    /// Words of the chunk with clip-relative timestamps.
    pub words: Vec<Word>,
}

/// Group clip words into display chunks.
///
/// Word timestamps are rebased onto the clip, clamped at zero. A chunk's
/// window never overlaps its predecessor: its start is clamped to the
/// previous chunk's end.
pub fn chunk_windows(words: &[Word], clip_start: f64, chunk_size: usize) -> Vec<ChunkWindow> {
    let chunk_size = chunk_size.max(1);
    let mut windows: Vec<ChunkWindow> = Vec::new();

    for chunk in words.chunks(chunk_size) {
        let rebased: Vec<Word> = chunk
            .iter()
            .map(|w| {
                Word::new(
                    w.word.clone(),
                    (w.start - clip_start).max(0.0),
                    (w.end - clip_start).max(0.0),
                )
            })
            .collect();

        let Some(first) = rebased.first() else {
            continue;
        };
        let last = rebased.last().expect("non-empty chunk");

        let prev_end = windows.last().map(|w| w.end).unwrap_or(0.0);
        let start = first.start.max(if windows.is_empty() { 0.0 } else { prev_end });
        let end = last.end.max(start);

        if end - start < TIME_EPSILON {
            continue;
        }

        windows.push(ChunkWindow {
            start,
            end,
            words: rebased,
        });
    }

    windows
}

/// Produce the caption dialogue events for a clip.
///
/// `suppress_before` hides captions during a title intro: events ending
/// before it are dropped, straddling events start late.
pub fn caption_events(
    words: &[Word],
    clip_start: f64,
    chunk_size: usize,
    highlight: bool,
    highlight_color: &str,
    suppress_before: f64,
) -> Vec<CaptionEvent> {
    let mut events = Vec::new();

    for window in chunk_windows(words, clip_start, chunk_size) {
        let display: Vec<String> = window
            .words
            .iter()
            .map(|w| w.word.to_uppercase())
            .collect();

        if !highlight {
            push_event(
                &mut events,
                window.start,
                window.end,
                plain_text(&display),
                suppress_before,
            );
            continue;
        }

        // One event per spoken word, plus plain filler over the gaps, so the
        // highlight switches exactly at each word's boundaries.
        let color = hex_to_ass_bgr(highlight_color);
        let mut cursor = window.start;

        for (i, word) in window.words.iter().enumerate() {
            let word_start = word.start.max(window.start);
            let word_end = word.end.min(window.end).max(word_start);

            if word_start - cursor > TIME_EPSILON {
                push_event(
                    &mut events,
                    cursor,
                    word_start,
                    plain_text(&display),
                    suppress_before,
                );
            }
            if word_end - word_start > TIME_EPSILON {
                push_event(
                    &mut events,
                    word_start,
                    word_end,
                    highlighted_text(&display, i, &color),
                    suppress_before,
                );
            }
            cursor = word_end.max(cursor);
        }

        if window.end - cursor > TIME_EPSILON {
            push_event(
                &mut events,
                cursor,
                window.end,
                plain_text(&display),
                suppress_before,
            );
        }
    }

    events
}

fn push_event(
    events: &mut Vec<CaptionEvent>,
    start: f64,
    end: f64,
    text: String,
    suppress_before: f64,
) {
    if end <= suppress_before + TIME_EPSILON {
        return;
    }
    let start = start.max(suppress_before);
    if end - start < TIME_EPSILON {
        return;
    }
    events.push(CaptionEvent {
        start,
        end,
        style: "Default",
        text,
    });
}

fn plain_text(words: &[String]) -> String {
    words.join(" ")
}

fn highlighted_text(words: &[String], highlight_idx: usize, ass_color: &str) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i == highlight_idx {
                format!("{{\\c{}}}{}{{\\c&HFFFFFF&}}", ass_color, w)
            } else {
                w.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Convert `#RRGGBB` to the ASS `&HBBGGRR&` notation.
pub fn hex_to_ass_bgr(hex: &str) -> String {
    let h = hex.trim_start_matches('#');
    if h.len() != 6 || !h.chars().all(|c| c.is_ascii_hexdigit()) {
        return "&H00FFFF&".to_string(); // fallback yellow
    }
    let (r, g, b) = (&h[0..2], &h[2..4], &h[4..6]);
    format!("&H{}{}{}&", b, g, r).to_uppercase()
}

/// Split a title into one or two balanced uppercase lines.
pub fn wrap_title(text: &str, max_chars: usize) -> String {
    let text = text.to_uppercase();
    let text = text.trim();
    if text.len() <= max_chars {
        return text.to_string();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 2 {
        return text.to_string();
    }

    let mut best_split = 1;
    let mut best_diff = usize::MAX;
    for i in 1..words.len() {
        let line1 = words[..i].join(" ").len();
        let line2 = words[i..].join(" ").len();
        let diff = line1.abs_diff(line2);
        if diff < best_diff {
            best_diff = diff;
            best_split = i;
        }
    }

    format!(
        "{}\\N{}",
        words[..best_split].join(" "),
        words[best_split..].join(" ")
    )
}

/// Format seconds as the ASS `H:MM:SS.cc` timestamp.
pub fn format_ass_time(t: f64) -> String {
    let t = t.max(0.0);
    let hours = (t / 3600.0).floor() as u32;
    let mins = ((t % 3600.0) / 60.0).floor() as u32;
    let secs = (t % 60.0).floor() as u32;
    let centis = ((t % 1.0) * 100.0).floor() as u32;
    format!("{}:{:02}:{:02}.{:02}", hours, mins, secs, centis)
}

/// Build the complete ASS document for one clip.
///
/// `words` carry absolute source timestamps; `title` is `None` when the
/// title is disabled or carried by the teaser instead.
pub fn generate_ass(
    words: &[Word],
    clip_start: f64,
    clip_duration: f64,
    title: Option<&str>,
    config: &JobConfig,
) -> String {
    let header = format!(
        "[Script Info]\n\
         Title: Captions\n\
         ScriptType: v4.00+\n\
         WrapStyle: 0\n\
         ScaledBorderAndShadow: yes\n\
         YCbCr Matrix: TV.709\n\
         PlayResX: {resx}\n\
         PlayResY: {resy}\n\
         \n\
         [V4+ Styles]\n\
         Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
         Style: Default,{cfont},{csize},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,5,2,2,40,40,{cmargin},1\n\
         Style: Title,{tfont},{tsize},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,5,2,2,40,40,{cmargin},1\n\
         Style: TitleTop,{tfont},{tsize},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,5,2,8,60,60,{tmargin},1\n\
         \n\
         [Events]\n\
         Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        resx = PLAY_RES_X,
        resy = PLAY_RES_Y,
        cfont = config.caption_font,
        csize = config.caption_font_size,
        cmargin = config.caption_margin_v,
        tfont = config.title_font,
        tsize = config.title_font_size,
        tmargin = config.title_margin_v,
    );

    let mut lines: Vec<String> = Vec::new();
    let mut suppress_before = 0.0;

    if let Some(title) = title {
        let wrapped = wrap_title(title, 16);
        match config.title_position {
            TitlePosition::Top => {
                let end = if clip_duration > 0.0 {
                    clip_duration + 1.0
                } else {
                    9999.0
                };
                lines.push(format!(
                    "Dialogue: 0,{},{},TitleTop,,0,0,0,,{}",
                    format_ass_time(0.0),
                    format_ass_time(end),
                    wrapped
                ));
            }
            TitlePosition::Intro => {
                if config.title_intro_duration > 0.0 {
                    // Visible from frame 1, fades out as captions take over
                    lines.push(format!(
                        "Dialogue: 0,{},{},Title,,0,0,0,,{{\\fad(0,350)}}{}",
                        format_ass_time(0.0),
                        format_ass_time(config.title_intro_duration),
                        wrapped
                    ));
                    suppress_before = config.title_intro_duration;
                }
            }
        }
    }

    for event in caption_events(
        words,
        clip_start,
        config.caption_chunk_size,
        config.caption_highlight,
        &config.caption_highlight_color,
        suppress_before,
    ) {
        lines.push(format!(
            "Dialogue: 0,{},{},{},,0,0,0,,{}",
            format_ass_time(event.start),
            format_ass_time(event.end),
            event.style,
            event.text
        ));
    }

    format!("{}{}\n", header, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contiguous_words() -> Vec<Word> {
        vec![
            Word::new("the", 12.00, 12.40),
            Word::new("market", 12.40, 12.85),
            Word::new("reversed", 12.85, 13.30),
            Word::new("right", 13.30, 13.70),
            Word::new("there", 13.70, 14.20),
            Word::new("today", 14.20, 14.90),
        ]
    }

    #[test]
    fn test_highlight_window_matches_word_exactly() {
        // Word with start=12.40, end=12.85 in a chunk of size 3
        let events = caption_events(&contiguous_words(), 0.0, 3, true, "#ffff00", 0.0);

        let highlighted: Vec<&CaptionEvent> = events
            .iter()
            .filter(|e| e.text.contains("\\c&H00FFFF&}MARKET"))
            .collect();
        assert_eq!(highlighted.len(), 1);
        assert!((highlighted[0].start - 12.40).abs() < 1e-9);
        assert!((highlighted[0].end - 12.85).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_windows_tile_without_gaps_or_overlaps() {
        let words = contiguous_words();
        let windows = chunk_windows(&words, 12.0, 3);
        assert_eq!(windows.len(), 2);

        // First chunk covers its words, second starts where the first ends
        assert!((windows[0].start - 0.0).abs() < 1e-9);
        assert!((windows[0].end - 1.30).abs() < 1e-9);
        assert!((windows[1].start - 1.30).abs() < 1e-9);
        assert!((windows[1].end - 2.90).abs() < 1e-9);
    }

    #[test]
    fn test_highlight_events_partition_chunk_window() {
        let events = caption_events(&contiguous_words(), 12.0, 3, true, "#ffff00", 0.0);

        // Events must be non-overlapping and cover [0, 2.90] contiguously
        let mut cursor = 0.0;
        for event in &events {
            assert!(
                (event.start - cursor).abs() < 1e-6,
                "gap or overlap at {} (expected {})",
                event.start,
                cursor
            );
            assert!(event.end > event.start);
            cursor = event.end;
        }
        assert!((cursor - 2.90).abs() < 1e-6);
    }

    #[test]
    fn test_title_intro_suppresses_early_captions() {
        let words = vec![
            Word::new("early", 0.0, 1.0),
            Word::new("later", 5.0, 6.0),
        ];
        let events = caption_events(&words, 0.0, 1, false, "#ffff00", 3.5);

        assert_eq!(events.len(), 1);
        assert!((events[0].start - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_highlight_single_event_per_chunk() {
        let events = caption_events(&contiguous_words(), 12.0, 3, false, "#ffff00", 0.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "THE MARKET REVERSED");
        assert_eq!(events[1].text, "RIGHT THERE TODAY");
    }

    #[test]
    fn test_hex_to_ass_bgr() {
        assert_eq!(hex_to_ass_bgr("#ffff00"), "&H00FFFF&");
        assert_eq!(hex_to_ass_bgr("#ff0000"), "&H0000FF&");
        assert_eq!(hex_to_ass_bgr("garbage"), "&H00FFFF&");
    }

    #[test]
    fn test_wrap_title_balances_lines() {
        assert_eq!(wrap_title("short", 16), "SHORT");
        let wrapped = wrap_title("this is a much longer title", 16);
        assert!(wrapped.contains("\\N"));
        let parts: Vec<&str> = wrapped.split("\\N").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].len().abs_diff(parts[1].len()) <= 6);
    }

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(0.0), "0:00:00.00");
        assert_eq!(format_ass_time(75.25), "0:01:15.25");
        assert_eq!(format_ass_time(3601.5), "1:00:01.50");
    }

    #[test]
    fn test_generate_ass_has_title_and_styles() {
        let config = JobConfig::default();
        let doc = generate_ass(&contiguous_words(), 12.0, 30.0, Some("Big Reversal"), &config);

        assert!(doc.contains("PlayResX: 1080"));
        assert!(doc.contains("PlayResY: 1920"));
        assert!(doc.contains("Style: Default,Montserrat ExtraBold,78"));
        assert!(doc.contains("BIG REVERSAL"));
        assert!(doc.contains("\\fad(0,350)"));
    }

    #[test]
    fn test_generate_ass_top_title_pins_full_duration() {
        let mut config = JobConfig::default();
        config.title_position = TitlePosition::Top;
        let doc = generate_ass(&contiguous_words(), 12.0, 30.0, Some("Pinned"), &config);

        assert!(doc.contains("TitleTop"));
        // Top mode does not suppress captions: the first chunk is present
        assert!(doc.contains("THE MARKET REVERSED"));
    }
}
