//! Pipeline error taxonomy.
//!
//! Stage-level errors (`Acquisition`, `Transcription`, `Selection`) are
//! terminal for the job. `Render` is per-moment and never aborts the
//! sibling renders. `Cancelled` is the user-initiated stop, distinguishable
//! from failure everywhere it surfaces.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Moment selection failed: {0}")]
    Selection(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Manually stopped")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] clipline_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    pub fn transcription(msg: impl Into<String>) -> Self {
        Self::Transcription(msg.into())
    }

    pub fn selection(msg: impl Into<String>) -> Self {
        Self::Selection(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Human-readable message recorded on the failed job.
    pub fn job_message(&self) -> String {
        self.to_string()
    }

    /// Lift a media error into the failing stage's variant, keeping
    /// cancellation distinguishable.
    pub fn from_media(stage: Stage, err: clipline_media::MediaError) -> Self {
        use clipline_media::MediaError;
        if matches!(err, MediaError::Cancelled) {
            return Self::Cancelled;
        }
        match stage {
            Stage::Acquisition => Self::Acquisition(err.to_string()),
            Stage::Transcription => Self::Transcription(err.to_string()),
            Stage::Render => Self::Render(err.to_string()),
        }
    }
}

/// Stage attribution for lifted media errors.
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Acquisition,
    Transcription,
    Render,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipline_media::MediaError;

    #[test]
    fn test_cancelled_stays_cancelled_through_lift() {
        let err = PipelineError::from_media(Stage::Render, MediaError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.job_message(), "Manually stopped");
    }

    #[test]
    fn test_media_error_maps_to_stage() {
        let err = PipelineError::from_media(
            Stage::Acquisition,
            MediaError::download_failed("geo restricted"),
        );
        assert!(matches!(err, PipelineError::Acquisition(_)));
        assert!(err.job_message().contains("geo restricted"));
    }
}
