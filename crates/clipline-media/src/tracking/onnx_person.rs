//! ONNX Runtime person detector (YOLOv8n), the first cascade tier.
//!
//! Frames are letterboxed to the model's 640x640 input, normalized to
//! [0,1] CHW, and the highest-scoring person box per frame is kept. The
//! model file is resolved from `CLIPLINE_YOLO_MODEL` or a set of default
//! paths; a missing model makes this tier unavailable, not an error.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::debug;

use clipline_models::Rect;

use crate::error::{MediaError, MediaResult};
use crate::tracking::detector::{DetectorSource, FrameDetection, SubjectDetector};
use crate::tracking::frames::SampledFrame;

/// Model input edge length.
const INPUT_SIZE: u32 = 640;

/// Minimum confidence for a person box.
const SCORE_THRESHOLD: f32 = 0.4;

/// COCO class index for "person".
const PERSON_CLASS: usize = 0;

/// Default model locations, checked in order.
const MODEL_PATHS: &[&str] = &[
    "./models/yolov8n.onnx",
    "./backend/models/yolov8n.onnx",
    "/app/models/yolov8n.onnx",
    "/usr/share/clipline/models/yolov8n.onnx",
];

/// YOLOv8n person detector behind the uniform cascade interface.
pub struct OnnxPersonDetector {
    session: Mutex<Session>,
}

impl OnnxPersonDetector {
    /// Load the model from the env override or the default search paths.
    pub fn from_default_paths() -> MediaResult<Self> {
        let path = resolve_model_path()
            .ok_or_else(|| MediaError::ModelNotFound("yolov8n.onnx".to_string()))?;
        Self::from_model(&path)
    }

    pub fn from_model(model_path: &Path) -> MediaResult<Self> {
        let bytes = std::fs::read(model_path)
            .map_err(|e| MediaError::detection_failed(format!("ORT read model file: {e}")))?;

        let session = Session::builder()
            .map_err(|e| MediaError::detection_failed(format!("ORT session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| MediaError::detection_failed(format!("ORT opt level: {e}")))?
            .commit_from_memory(bytes.as_slice())
            .map_err(|e| MediaError::detection_failed(format!("ORT load model: {e}")))?;

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn detect_frame(&self, frame: &SampledFrame) -> MediaResult<Option<FrameDetection>> {
        let image = frame.load_rgb()?;
        let (frame_w, frame_h) = (image.width(), image.height());

        let (tensor, scale, pad_x, pad_y) = letterbox_tensor(&image)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::detection_failed("ORT session poisoned"))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| MediaError::detection_failed(format!("ORT run failed: {e}")))?;

        let output = outputs
            .get("output0")
            .or_else(|| outputs.get("output"))
            .ok_or_else(|| MediaError::detection_failed("ORT returned no outputs"))?;

        let best = best_person_box(output)?;

        Ok(best.map(|(cx, cy, w, h, score)| {
            // Undo the letterbox transform back to source pixels
            let cx = ((cx - pad_x) / scale) as f64;
            let cy = ((cy - pad_y) / scale) as f64;
            let w = (w / scale) as f64;
            let h = (h / scale) as f64;

            FrameDetection {
                timestamp: frame.timestamp,
                bbox: Rect::centered_at(cx, cy, w, h)
                    .clamp_within(frame_w as f64, frame_h as f64),
                confidence: score as f64,
                source: DetectorSource::Person,
            }
        }))
    }
}

#[async_trait]
impl SubjectDetector for OnnxPersonDetector {
    fn name(&self) -> &'static str {
        "yolov8n"
    }

    fn source(&self) -> DetectorSource {
        DetectorSource::Person
    }

    async fn detect(&self, frames: &[SampledFrame]) -> MediaResult<Vec<FrameDetection>> {
        let mut detections = Vec::new();
        for frame in frames {
            match self.detect_frame(frame) {
                Ok(Some(detection)) => detections.push(detection),
                Ok(None) => {}
                Err(e) => debug!(timestamp = frame.timestamp, error = %e, "Person inference failed on frame"),
            }
        }
        Ok(detections)
    }
}

fn resolve_model_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLIPLINE_YOLO_MODEL") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    MODEL_PATHS
        .iter()
        .copied()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Letterbox an RGB image into a (1,3,640,640) tensor normalized to [0,1].
///
/// Returns the tensor plus the scale and padding needed to map detections
/// back to source coordinates.
fn letterbox_tensor(image: &image::RgbImage) -> MediaResult<(Value, f32, f32, f32)> {
    let (w, h) = (image.width(), image.height());
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let scaled_w = (w as f32 * scale).round() as u32;
    let scaled_h = (h as f32 * scale).round() as u32;
    let pad_x = (INPUT_SIZE - scaled_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - scaled_h) as f32 / 2.0;

    let resized = image::imageops::resize(
        image,
        scaled_w.max(1),
        scaled_h.max(1),
        image::imageops::FilterType::Triangle,
    );

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut chw = vec![0.5f32; plane * 3];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = x + pad_x as u32;
        let ty = y + pad_y as u32;
        if tx >= INPUT_SIZE || ty >= INPUT_SIZE {
            continue;
        }
        let idx = (ty * INPUT_SIZE + tx) as usize;
        for c in 0..3 {
            chw[c * plane + idx] = pixel.0[c] as f32 / 255.0;
        }
    }

    let shape = vec![1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
    let tensor = Tensor::from_array((shape, chw.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| MediaError::detection_failed(format!("ORT tensor: {e}")))?;

    Ok((tensor, scale, pad_x, pad_y))
}

/// Highest-scoring person box from a YOLOv8 output tensor.
///
/// Accepts the (1, 84, N) layout: 4 box rows then one score row per class.
fn best_person_box(output: &Value) -> MediaResult<Option<(f32, f32, f32, f32, f32)>> {
    let (shape, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| MediaError::detection_failed(format!("ORT extract: {e}")))?;

    let (rows, anchors) = match shape.len() {
        3 if shape[0] == 1 => (shape[1] as usize, shape[2] as usize),
        2 => (shape[0] as usize, shape[1] as usize),
        _ => {
            return Err(MediaError::detection_failed(format!(
                "Unexpected detector output shape: {:?}",
                shape
            )))
        }
    };

    if rows < 5 || data.len() < rows * anchors {
        return Err(MediaError::detection_failed(
            "Detector output too small for box decoding",
        ));
    }

    let row = |r: usize, i: usize| data[r * anchors + i];
    let mut best: Option<(f32, f32, f32, f32, f32)> = None;

    for i in 0..anchors {
        let score = row(4 + PERSON_CLASS, i);
        if score < SCORE_THRESHOLD {
            continue;
        }
        if best.map(|(_, _, _, _, s)| score > s).unwrap_or(true) {
            best = Some((row(0, i), row(1, i), row(2, i), row(3, i), score));
        }
    }

    Ok(best)
}
