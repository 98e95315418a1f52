//! Haar cascade frontal-face detector, the last cascade tier.
//!
//! The classical detector ships with every OpenCV install, so this tier
//! works without downloaded models. Less robust than the CNN tiers but a
//! reasonable last resort before the centered fallback.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use opencv::core::{AlgorithmHint, Mat, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::{CascadeClassifierTrait, MatTraitConst};
use tracing::debug;

use clipline_models::Rect;

use crate::error::{MediaError, MediaResult};
use crate::tracking::detector::{DetectorSource, FrameDetection, SubjectDetector};
use crate::tracking::frames::SampledFrame;

/// Standard OpenCV install locations for the frontal-face cascade.
const CASCADE_PATHS: &[&str] = &[
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
    "/usr/share/opencv/haarcascades/haarcascade_frontalface_default.xml",
    "/usr/local/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
    "./models/haarcascade_frontalface_default.xml",
];

/// Haar cascade detector behind the uniform cascade interface.
pub struct HaarFaceDetector {
    classifier: Mutex<CascadeClassifier>,
}

impl HaarFaceDetector {
    /// Load the cascade from the env override or the standard locations.
    pub fn from_default_paths() -> MediaResult<Self> {
        let path = resolve_cascade_path()
            .ok_or_else(|| MediaError::ModelNotFound("haarcascade_frontalface".to_string()))?;
        Self::from_cascade(&path)
    }

    pub fn from_cascade(path: &std::path::Path) -> MediaResult<Self> {
        let classifier = CascadeClassifier::new(&path.to_string_lossy())
            .map_err(|e| MediaError::detection_failed(format!("Haar cascade init: {e}")))?;
        Ok(Self {
            classifier: Mutex::new(classifier),
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

        let mut gray = Mat::default();
        imgproc::cvt_color(
            &image,
            &mut gray,
            imgproc::COLOR_BGR2GRAY,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(|e| MediaError::detection_failed(format!("BGR2GRAY failed: {e}")))?;

        let mut faces: Vector<opencv::core::Rect> = Vector::new();
        self.classifier
            .lock()
            .map_err(|_| MediaError::detection_failed("Haar classifier poisoned"))?
            .detect_multi_scale(
                &gray,
                &mut faces,
                1.1,
                5,
                0,
                Size::new(30, 30),
                Size::new(0, 0),
            )
            .map_err(|e| MediaError::detection_failed(format!("Haar detect: {e}")))?;

        let mut best: Option<Rect> = None;
        for face in faces {
            let rect = Rect::new(
                face.x as f64,
                face.y as f64,
                face.width as f64,
                face.height as f64,
            );
            if best.as_ref().map(|b| rect.area() > b.area()).unwrap_or(true) {
                best = Some(rect);
            }
        }

        Ok(best.map(|bbox| FrameDetection {
            timestamp: frame.timestamp,
            bbox: bbox.clamp_within(frame_w as f64, frame_h as f64),
            // Haar reports no score; a flat mid confidence keeps the shape uniform
            confidence: 0.5,
            source: DetectorSource::Cascade,
        }))
    }
}

#[async_trait]
impl SubjectDetector for HaarFaceDetector {
    fn name(&self) -> &'static str {
        "haar"
    }

    fn source(&self) -> DetectorSource {
        DetectorSource::Cascade
    }

    async fn detect(&self, frames: &[SampledFrame]) -> MediaResult<Vec<FrameDetection>> {
        let mut detections = Vec::new();
        for frame in frames {
            match self.detect_frame(frame) {
                Ok(Some(detection)) => detections.push(detection),
                Ok(None) => {}
                Err(e) => debug!(timestamp = frame.timestamp, error = %e, "Haar failed on frame"),
            }
        }
        Ok(detections)
    }
}

fn resolve_cascade_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CLIPLINE_HAAR_CASCADE") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    CASCADE_PATHS
        .iter()
        .copied()
        .map(PathBuf::from)
        .find(|p| p.exists())
}
