//! Temporal smoothing of detected subject centers.
//!
//! Raw detections jitter frame to frame. The track is built by aligning
//! detections to the sampled timestamps, filling gaps by linear
//! interpolation (edges are held), then applying a window-3 moving average
//! and clamping to frame bounds.

use clipline_models::Rect;

use crate::tracking::detector::FrameDetection;

/// Timestamp match slack when aligning detections to samples, seconds.
const ALIGN_EPSILON: f64 = 0.51;

/// One smoothed point of the crop-center track, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub t: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Build the smoothed crop-center track for a set of sample timestamps.
///
/// Returns an empty track when no detection aligns with any sample.
pub fn build_track(
    timestamps: &[f64],
    detections: &[FrameDetection],
    frame_w: f64,
    frame_h: f64,
) -> Vec<TrackPoint> {
    if timestamps.is_empty() {
        return Vec::new();
    }

    // Align each sample with the nearest detection, if close enough
    let mut centers: Vec<Option<(f64, f64)>> = timestamps
        .iter()
        .map(|&t| {
            detections
                .iter()
                .map(|d| (d, (d.timestamp - t).abs()))
                .filter(|(_, dist)| *dist <= ALIGN_EPSILON)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(d, _)| (d.bbox.center_x(), d.bbox.center_y()))
        })
        .collect();

    if centers.iter().all(Option::is_none) {
        return Vec::new();
    }

    fill_gaps(&mut centers);

    let mut xs: Vec<f64> = centers.iter().map(|c| c.unwrap().0).collect();
    let mut ys: Vec<f64> = centers.iter().map(|c| c.unwrap().1).collect();
    moving_average(&mut xs);
    moving_average(&mut ys);

    timestamps
        .iter()
        .zip(xs.iter().zip(ys.iter()))
        .map(|(&t, (&cx, &cy))| TrackPoint {
            t,
            cx: cx.clamp(0.0, (frame_w - 1.0).max(0.0)),
            cy: cy.clamp(0.0, (frame_h - 1.0).max(0.0)),
        })
        .collect()
}

/// Hold edges, linearly interpolate interior gaps.
fn fill_gaps(values: &mut [Option<(f64, f64)>]) {
    let valid: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.is_some().then_some(i))
        .collect();
    if valid.is_empty() {
        return;
    }

    let first = valid[0];
    let last = *valid.last().unwrap();

    for i in 0..first {
        values[i] = values[first];
    }
    for i in (last + 1)..values.len() {
        values[i] = values[last];
    }

    for pair in valid.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a <= 1 {
            continue;
        }
        let (ax, ay) = values[a].unwrap();
        let (bx, by) = values[b].unwrap();
        for i in (a + 1)..b {
            let frac = (i - a) as f64 / (b - a) as f64;
            values[i] = Some((ax + (bx - ax) * frac, ay + (by - ay) * frac));
        }
    }
}

/// In-place window-3 moving average; edges average their single neighbor.
fn moving_average(values: &mut [f64]) {
    if values.len() < 3 {
        return;
    }
    let original = values.to_vec();
    for i in 1..values.len() - 1 {
        values[i] = (original[i - 1] + original[i] + original[i + 1]) / 3.0;
    }
    values[0] = (original[0] + original[1]) / 2.0;
    let n = values.len();
    values[n - 1] = (original[n - 2] + original[n - 1]) / 2.0;
}

/// Median of the normalized horizontal centers of a track.
pub fn median_normalized_x(points: &[TrackPoint], frame_w: f64) -> Option<f64> {
    if points.is_empty() || frame_w <= 0.0 {
        return None;
    }
    let mut xs: Vec<f64> = points.iter().map(|p| p.cx / frame_w).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    Some(xs[xs.len() / 2].clamp(0.0, 1.0))
}

/// Padded tight crop around the first detection, for the split-panel zoom.
///
/// For talking-head framing the face and shoulders occupy roughly the top
/// 80% of a person box; only that region is kept, with small margins. A
/// subject filling most of the frame gets no tight zoom (`None`) since
/// zooming would show nothing new.
pub fn tight_subject_box(
    detection: &FrameDetection,
    frame_w: f64,
    frame_h: f64,
) -> Option<Rect> {
    let bbox = &detection.bbox;

    let face_h = bbox.height * 0.80;
    let pad_x = bbox.width * 0.06;
    let pad_top = face_h * 0.04;
    let pad_bottom = face_h * 0.10;

    let cx = bbox.center_x();
    let cy = bbox.y + face_h / 2.0;

    let mut width = bbox.width + pad_x * 2.0;
    let mut height = face_h + pad_top + pad_bottom;

    // Never zoom harder than 10% of the frame in either dimension
    width = width.max(frame_w * 0.10);
    height = height.max(frame_h * 0.10);

    if width > frame_w * 0.75 || height > frame_h * 0.75 {
        return None;
    }

    let rect = Rect::centered_at(cx, cy, width, height).clamp_within(frame_w, frame_h);
    let (_, _, w, h) = rect.even_aligned();
    if w < 50 || h < 50 {
        return None;
    }

    Some(rect)
}
