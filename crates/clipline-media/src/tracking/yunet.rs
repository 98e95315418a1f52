//! OpenCV YuNet face-landmark detector, the second cascade tier.
//!
//! YuNet is a lightweight CNN face detector exposed through OpenCV's
//! FaceDetectorYN API; each detection carries five facial landmarks, which
//! is what makes it the landmark tier of the cascade. Requires OpenCV 4.5+
//! with the DNN module and a downloaded model file.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use opencv::core::{Mat, Size};
use opencv::imgcodecs;
use opencv::objdetect::FaceDetectorYN;
use opencv::prelude::{FaceDetectorYNTrait, MatTraitConst};
use tracing::debug;

use clipline_models::Rect;

use crate::error::{MediaError, MediaResult};
use crate::tracking::detector::{DetectorSource, FrameDetection, SubjectDetector};
use crate::tracking::frames::SampledFrame;

/// Score threshold, lowered to catch small webcam-overlay faces.
const SCORE_THRESHOLD: f32 = 0.3;

const NMS_THRESHOLD: f32 = 0.3;

const TOP_K: i32 = 10;

/// Default model locations, checked in order.
const MODEL_PATHS: &[&str] = &[
    "./models/face_detection_yunet_2023mar.onnx",
    "./backend/models/face_detection_yunet_2023mar.onnx",
    "/app/models/face_detection_yunet_2023mar.onnx",
    "/usr/share/opencv/models/face_detection_yunet_2023mar.onnx",
];

/// YuNet detector behind the uniform cascade interface.
pub struct YuNetFaceDetector {
    detector: Mutex<opencv::core::Ptr<FaceDetectorYN>>,
}

impl YuNetFaceDetector {
    /// Load the model from the env override or the default search paths.
    pub fn from_default_paths() -> MediaResult<Self> {
        let path = resolve_model_path()
            .ok_or_else(|| MediaError::ModelNotFound("face_detection_yunet".to_string()))?;
        Self::from_model(&path)
    }

    pub fn from_model(model_path: &std::path::Path) -> MediaResult<Self> {
        let detector = FaceDetectorYN::create(
            &model_path.to_string_lossy(),
            "",
            Size::new(320, 320),
            SCORE_THRESHOLD,
            NMS_THRESHOLD,
            TOP_K,
            0,
            0,
        )
        .map_err(|e| MediaError::detection_failed(format!("YuNet init failed: {e}")))?;

        Ok(Self {
            detector: Mutex::new(detector),
        })
    }

    fn detect_frame(&self, frame: &SampledFrame) -> MediaResult<Option<FrameDetection>> {
        let image = imgcodecs::imread(
            &frame.path.to_string_lossy(),
            imgcodecs::IMREAD_COLOR,
        )
        .map_err(|e| MediaError::detection_failed(format!("imread failed: {e}")))?;

        let (frame_w, frame_h) = (image.cols(), image.rows());
        if frame_w == 0 || frame_h == 0 {
            return Ok(None);
        }

        let mut detector = self
            .detector
            .lock()
            .map_err(|_| MediaError::detection_failed("YuNet detector poisoned"))?;

        detector
            .set_input_size(Size::new(frame_w, frame_h))
            .map_err(|e| MediaError::detection_failed(format!("YuNet input size: {e}")))?;

        let mut faces = Mat::default();
        detector
            .detect(&image, &mut faces)
            .map_err(|e| MediaError::detection_failed(format!("YuNet detect: {e}")))?;

        // Each row: x, y, w, h, 5 landmark pairs, score (15 floats)
        let mut best: Option<(f64, Rect, f64)> = None;
        for row in 0..faces.rows() {
            let at = |col: i32| -> MediaResult<f32> {
                faces
                    .at_2d::<f32>(row, col)
                    .copied()
                    .map_err(|e| MediaError::detection_failed(format!("YuNet row read: {e}")))
            };

            let bbox = Rect::new(at(0)? as f64, at(1)? as f64, at(2)? as f64, at(3)? as f64);
            let score = at(14)? as f64;
            let area = bbox.area();

            if best.as_ref().map(|(a, _, _)| area > *a).unwrap_or(true) {
                best = Some((area, bbox, score));
            }
        }

        Ok(best.map(|(_, bbox, score)| FrameDetection {
            timestamp: frame.timestamp,
            bbox: bbox.clamp_within(frame_w as f64, frame_h as f64),
            confidence: score,
            source: DetectorSource::FaceLandmark,
        }))
    }
}

#[async_trait]
impl SubjectDetector for YuNetFaceDetector {
    fn name(&self) -> &'static str {
        "yunet"
    }

    fn source(&self) -> DetectorSource {
        DetectorSource::FaceLandmark
    }

    async fn detect(&self, frames: &[SampledFrame]) -> MediaResult<Vec<FrameDetection>> {
        let mut detections = Vec::new();
        for frame in frames {
            match self.detect_frame(frame) {
                Ok(Some(detection)) => detections.push(detection),
                Ok(None) => {}
                Err(e) => debug!(timestamp = frame.timestamp, error = %e, "YuNet failed on frame"),
            }
        }
        Ok(detections)
    }
}

fn resolve_model_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLIPLINE_YUNET_MODEL") {
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
