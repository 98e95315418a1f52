//! Moment selection: prompt construction, LLM response validation,
//! overlap dedup and ranking.
//!
//! The model proposes clip windows; everything it returns is distrusted.
//! Windows are clamped to the duration bounds and the transcript range,
//! invalid ones are discarded (not the whole job, as long as one survives),
//! overlapping windows keep the higher hook score, and the survivors are
//! ranked by score and truncated to the configured clip count.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use clipline_models::{format_clock, JobConfig, Moment, Transcript};

use crate::error::{PipelineError, PipelineResult};
use crate::llm::OpenRouterClient;

/// Attempts at parsing an LLM response before giving up.
pub const LLM_PARSE_RETRIES: usize = 3;

/// Seconds two accepted moments may intersect before one is dropped.
pub const OVERLAP_TOLERANCE: f64 = 1.0;

/// Buffer kept between a moment's end and the hard end of the video.
const END_BUFFER: f64 = 2.0;

/// A clip shorter than this fraction of the minimum is a broken timestamp
/// and is dropped; anything between gets extended to the minimum.
const DROP_FRACTION: f64 = 0.4;

/// Select, validate and rank moments for a transcript.
pub async fn select_moments(
    client: &OpenRouterClient,
    transcript: &Transcript,
    config: &JobConfig,
) -> PipelineResult<Vec<Moment>> {
    if transcript.is_empty() {
        // Silent audio yields zero candidates, which is a selection failure,
        // not a transcription one
        return Err(PipelineError::selection("no valid moments found"));
    }

    let prompt = build_prompt(transcript, config);

    let mut last_parse_error = String::new();
    for attempt in 1..=LLM_PARSE_RETRIES {
        let text = client.complete_json(&config.model, &prompt).await?;

        match parse_response(&text) {
            Ok(raw) => {
                let moments = validate(raw, transcript.duration(), config);
                if moments.is_empty() {
                    return Err(PipelineError::selection("no valid moments found"));
                }
                info!(
                    count = moments.len(),
                    model = %config.model,
                    "Moment selection complete"
                );
                return Ok(moments);
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    "LLM returned unparseable moments, retrying with the same prompt"
                );
                last_parse_error = e.to_string();
            }
        }
    }

    Err(PipelineError::selection(format!(
        "LLM response unparseable after {} attempts: {}",
        LLM_PARSE_RETRIES, last_parse_error
    )))
}

/// Run the raw candidates through every validation pass.
fn validate(raw: Vec<RawMoment>, transcript_duration: f64, config: &JobConfig) -> Vec<Moment> {
    let moments: Vec<Moment> = raw.into_iter().filter_map(RawMoment::into_moment).collect();
    let moments = enforce_duration_limits(moments, config.min_duration, config.max_duration);
    let moments = clamp_to_transcript(moments, transcript_duration, config.min_duration);
    let moments = dedup_overlaps(moments, OVERLAP_TOLERANCE);
    rank_and_truncate(moments, config.max_clips)
}

/// Build the selection prompt from a timestamped transcript.
pub fn build_prompt(transcript: &Transcript, config: &JobConfig) -> String {
    let mut lines = Vec::new();
    let mut line_words: Vec<&str> = Vec::new();
    let mut line_start = 0.0;

    // Group words into ~12-word lines prefixed with their start time
    for (i, word) in transcript.words.iter().enumerate() {
        if line_words.is_empty() {
            line_start = word.start;
        }
        line_words.push(&word.word);
        if line_words.len() >= 12 || i == transcript.words.len() - 1 {
            lines.push(format!("[{}] {}", format_clock(line_start), line_words.join(" ")));
            line_words.clear();
        }
    }
    let transcript_text = lines.join("\n");
    let duration = transcript.duration();

    format!(
        r#"You are a viral short-form content editor. Analyze the transcript and identify the best clips.

THE #1 RULE: Every clip must tell a COMPLETE STORY. The viewer must understand what's happening without any other context. Never cut mid-thought or mid-explanation.

WHAT MAKES A GREAT CLIP:
1. Full story arcs: clear setup, development, payoff
2. Strategy/knowledge explanations with a clear before/after
3. Strong opinions and hot takes
4. Lessons from real experience
5. Emotional moments with substance and context

NEVER select: random snippets with no context, segments starting or ending mid-sentence, greetings/intros, dead air, or clips that require the rest of the video to make sense.

DURATION RULES:
- MINIMUM {min:.0} seconds. Try hard to find segments this long.
- MAXIMUM {max:.0} seconds.
- Pad 2-3 seconds before the speaker starts and after they finish.
- VIDEO LENGTH: {duration:.0}s. ALL start/end values MUST be below {duration:.0}. Never go past the end.

Return a JSON object with a "clips" array. No markdown fences. "start" and "end" MUST be numbers in SECONDS (e.g. 56.0, 173.5), NOT "mm:ss" strings.

Include "hook_score" (1-10) and "hook_reason" for the opening seconds of each clip: 8-10 means a specific claim, shocking number or strong opinion that stops scrollers; 1-4 means filler or a mid-sentence opener.

Include "peak_offset": seconds from the clip's start to the single most compelling SPOKEN moment inside it, to be prepended as a short teaser. The person must be actively speaking there and at least 6 seconds of content must remain. Set to null if no standout moment exists.

{{"clips": [
  {{"start": 56.0, "end": 120.0, "title": "Short punchy title", "reason": "Why this works", "hook_score": 8, "hook_reason": "Opens with a shocking claim", "peak_offset": 38.0}}
]}}

Return EXACTLY {count} clips if the video has enough content, spread across the ENTIRE video with no overlapping windows. If the video is too short for {count} clips meeting the duration rules, return as many as genuinely fit (minimum 1).

TRANSCRIPT:
{transcript}"#,
        min = config.min_duration,
        max = config.max_duration,
        duration = duration,
        count = config.max_clips,
        transcript = transcript_text,
    )
}

/// Raw moment as returned by the model, before coercion.
#[derive(Debug, Deserialize)]
struct RawMoment {
    start: Value,
    end: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    hook_score: Option<f64>,
    #[serde(default)]
    hook_reason: Option<String>,
    #[serde(default)]
    peak_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ClipsEnvelope {
    clips: Vec<RawMoment>,
}

impl RawMoment {
    /// Coerce into a typed moment; timestamps the model returned as
    /// strings (including "mm:ss") are converted, garbage is discarded.
    fn into_moment(self) -> Option<Moment> {
        let start = coerce_seconds(&self.start)?;
        let end = coerce_seconds(&self.end)?;

        let mut moment = Moment::new(start, end, self.title.unwrap_or_default());
        if moment.title.is_empty() {
            moment.title = format!("Clip at {}", format_clock(start));
        }
        moment.reason = self.reason;
        if let Some(score) = self.hook_score {
            moment.hook_score = score;
        }
        moment.hook_reason = self.hook_reason;
        moment.peak_offset = self.peak_offset.as_ref().and_then(coerce_seconds);
        Some(moment)
    }
}

/// Parse the response as `{"clips": [...]}` or a bare array.
fn parse_response(text: &str) -> Result<Vec<RawMoment>, serde_json::Error> {
    let text = crate::llm::strip_markdown_fences(text);
    match serde_json::from_str::<ClipsEnvelope>(text) {
        Ok(envelope) => Ok(envelope.clips),
        Err(_) => serde_json::from_str::<Vec<RawMoment>>(text),
    }
}

/// Accept numbers, numeric strings, and "mm:ss" / "hh:mm:ss" strings.
fn coerce_seconds(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return Some(n);
            }
            let parts: Vec<&str> = s.split(':').collect();
            match parts.len() {
                2 => {
                    let m: f64 = parts[0].parse().ok()?;
                    let sec: f64 = parts[1].parse().ok()?;
                    Some(m * 60.0 + sec)
                }
                3 => {
                    let h: f64 = parts[0].parse().ok()?;
                    let m: f64 = parts[1].parse().ok()?;
                    let sec: f64 = parts[2].parse().ok()?;
                    Some(h * 3600.0 + m * 60.0 + sec)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Hard-enforce the duration bounds.
///
/// Too long gets clamped; slightly short gets extended to the minimum;
/// drastically short (under [`DROP_FRACTION`] of the minimum) is a broken
/// timestamp and is dropped.
pub fn enforce_duration_limits(moments: Vec<Moment>, min: f64, max: f64) -> Vec<Moment> {
    let drop_below = min * DROP_FRACTION;
    moments
        .into_iter()
        .filter_map(|mut m| {
            let duration = m.duration();
            if duration <= 0.0 {
                warn!(title = %m.title, duration, "Dropping moment with invalid duration");
                return None;
            }
            if duration > max {
                m.end = m.start + max;
            } else if duration < min {
                if duration < drop_below {
                    warn!(title = %m.title, duration, min, "Dropping moment far below minimum");
                    return None;
                }
                m.end = m.start + min;
            }
            Some(m)
        })
        .collect()
}

/// Keep moments inside the transcript range, with an end buffer.
///
/// A start past the end is a hallucinated timestamp; an end past the
/// buffer is clamped and re-checked against the minimum.
pub fn clamp_to_transcript(moments: Vec<Moment>, duration: f64, min: f64) -> Vec<Moment> {
    let max_end = (duration - END_BUFFER).max(0.0);
    moments
        .into_iter()
        .filter_map(|mut m| {
            if m.start < 0.0 {
                m.start = 0.0;
            }
            if m.start >= max_end {
                warn!(title = %m.title, start = m.start, "Dropping moment past the video end");
                return None;
            }
            if m.end > max_end {
                m.end = max_end;
            }
            if m.duration() < min {
                warn!(
                    title = %m.title,
                    duration = m.duration(),
                    "Dropping moment too short after range clamp"
                );
                return None;
            }
            Some(m)
        })
        .collect()
}

/// Resolve overlaps: when two windows intersect beyond the tolerance the
/// higher hook score survives (earlier start wins ties).
pub fn dedup_overlaps(mut moments: Vec<Moment>, tolerance: f64) -> Vec<Moment> {
    moments.sort_by(|a, b| {
        b.hook_score
            .total_cmp(&a.hook_score)
            .then(a.start.total_cmp(&b.start))
    });

    let mut kept: Vec<Moment> = Vec::new();
    for moment in moments {
        if kept.iter().any(|k| k.overlaps(&moment, tolerance)) {
            warn!(title = %moment.title, "Dropping overlapping moment with lower score");
            continue;
        }
        kept.push(moment);
    }
    kept
}

/// Score-descending truncation to the configured clip count, then render order.
pub fn rank_and_truncate(mut moments: Vec<Moment>, max_clips: usize) -> Vec<Moment> {
    moments.sort_by(|a, b| {
        b.hook_score
            .total_cmp(&a.hook_score)
            .then(a.start.total_cmp(&b.start))
    });
    moments.truncate(max_clips);
    moments.sort_by(|a, b| a.start.total_cmp(&b.start));
    moments
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_models::Word;

    fn moment(start: f64, end: f64, score: f64) -> Moment {
        let mut m = Moment::new(start, end, format!("m{}", start));
        m.hook_score = score;
        m
    }

    fn config() -> JobConfig {
        JobConfig {
            min_duration: 20.0,
            max_duration: 60.0,
            max_clips: 2,
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_parse_envelope_and_bare_array() {
        let envelope = r#"{"clips": [{"start": 10.0, "end": 40.0, "title": "A"}]}"#;
        assert_eq!(parse_response(envelope).unwrap().len(), 1);

        let bare = r#"[{"start": 10.0, "end": 40.0, "title": "A"}]"#;
        assert_eq!(parse_response(bare).unwrap().len(), 1);

        assert!(parse_response("here are your clips!").is_err());
    }

    #[test]
    fn test_coerce_seconds_formats() {
        assert_eq!(coerce_seconds(&serde_json::json!(56.5)), Some(56.5));
        assert_eq!(coerce_seconds(&serde_json::json!("90")), Some(90.0));
        assert_eq!(coerce_seconds(&serde_json::json!("01:30")), Some(90.0));
        assert_eq!(coerce_seconds(&serde_json::json!("1:02:03")), Some(3723.0));
        assert_eq!(coerce_seconds(&serde_json::json!(null)), None);
        assert_eq!(coerce_seconds(&serde_json::json!("garbage")), None);
    }

    #[test]
    fn test_duration_limits_clamp_extend_drop() {
        let moments = vec![
            moment(0.0, 100.0, 7.0),  // too long: clamp to 60
            moment(200.0, 215.0, 7.0), // 15s, >= 40% of min: extend to 20
            moment(300.0, 305.0, 7.0), // 5s, broken: drop
            moment(400.0, 400.0, 7.0), // zero: drop
        ];
        let result = enforce_duration_limits(moments, 20.0, 60.0);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].duration(), 60.0);
        assert_eq!(result[1].duration(), 20.0);
    }

    #[test]
    fn test_clamp_to_transcript_range() {
        let moments = vec![
            moment(550.0, 590.0, 7.0),  // start past the end: drop
            moment(500.0, 590.0, 7.0),  // end clamped to 538, still >= min
            moment(530.0, 590.0, 7.0),  // only 8s after clamp: drop
            moment(-5.0, 30.0, 7.0),    // negative start clamped to 0
        ];
        let result = clamp_to_transcript(moments, 540.0, 20.0);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].end, 538.0);
        assert_eq!(result[1].start, 0.0);
    }

    #[test]
    fn test_dedup_higher_score_wins() {
        let moments = vec![
            moment(10.0, 50.0, 6.0),
            moment(40.0, 80.0, 9.0), // overlaps the first by 10s
            moment(100.0, 140.0, 5.0),
        ];
        let result = dedup_overlaps(moments, OVERLAP_TOLERANCE);
        assert_eq!(result.len(), 2);
        assert!(result.iter().any(|m| m.hook_score == 9.0));
        assert!(result.iter().any(|m| m.start == 100.0));
        assert!(!result.iter().any(|m| m.start == 10.0));
    }

    #[test]
    fn test_dedup_tolerance_allows_small_touch() {
        let moments = vec![moment(10.0, 50.0, 6.0), moment(49.5, 90.0, 9.0)];
        let result = dedup_overlaps(moments, OVERLAP_TOLERANCE);
        assert_eq!(result.len(), 2, "0.5s intersection is within tolerance");
    }

    #[test]
    fn test_rank_and_truncate_orders_for_render() {
        let moments = vec![
            moment(300.0, 340.0, 9.0),
            moment(10.0, 50.0, 8.0),
            moment(100.0, 140.0, 3.0),
        ];
        let result = rank_and_truncate(moments, 2);
        // Lowest score dropped; survivors back in timeline order
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].start, 10.0);
        assert_eq!(result[1].start, 300.0);
    }

    #[test]
    fn test_prompt_carries_bounds_and_transcript() {
        let transcript = Transcript::from_words(vec![
            Word::new("the", 0.0, 0.3),
            Word::new("story", 0.3, 0.8),
        ]);
        let prompt = build_prompt(&transcript, &config());
        assert!(prompt.contains("MINIMUM 20"));
        assert!(prompt.contains("MAXIMUM 60"));
        assert!(prompt.contains("[00:00] the story"));
        assert!(prompt.contains("EXACTLY 2 clips"));
    }

    #[tokio::test]
    async fn test_select_moments_validates_and_ranks() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": serde_json::json!({
                "clips": [
                    {"start": 10.0, "end": 45.0, "title": "Keep A", "hook_score": 8},
                    {"start": "01:40", "end": "02:20", "title": "Keep B", "hook_score": 9},
                    {"start": 30.0, "end": 65.0, "title": "Overlaps A", "hook_score": 4},
                    {"start": 900.0, "end": 950.0, "title": "Past end", "hook_score": 10}
                ]
            }).to_string()}}]
        });

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = crate::llm::OpenRouterClient::with_base_url(
            "key",
            server.uri(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        // 300s transcript: "Past end" is hallucinated, "Overlaps A" loses
        let words: Vec<Word> = (0..300)
            .map(|i| Word::new("w", i as f64, i as f64 + 0.5))
            .collect();
        let transcript = Transcript::from_words(words);

        let moments = select_moments(&client, &transcript, &config()).await.unwrap();
        assert_eq!(moments.len(), 2);
        assert_eq!(moments[0].title, "Keep A");
        assert_eq!(moments[1].title, "Keep B");
        assert_eq!(moments[1].start, 100.0);
    }

    #[tokio::test]
    async fn test_select_moments_empty_transcript_is_selection_error() {
        let client = crate::llm::OpenRouterClient::with_base_url(
            "key",
            "http://127.0.0.1:1",
            std::time::Duration::from_secs(1),
        )
        .unwrap();

        let err = select_moments(&client, &Transcript::default(), &config())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Selection(_)));
        assert!(err.to_string().contains("no valid moments"));
    }

    #[tokio::test]
    async fn test_select_moments_retries_unparseable_then_fails() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "not json at all"}}]
            })))
            .expect(LLM_PARSE_RETRIES as u64)
            .mount(&server)
            .await;

        let client = crate::llm::OpenRouterClient::with_base_url(
            "key",
            server.uri(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let transcript = Transcript::from_words(vec![Word::new("w", 0.0, 100.0)]);
        let err = select_moments(&client, &transcript, &config())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unparseable"));
    }
}
