//! Pipeline engine for clipline.
//!
//! Submitting a job runs the full pipeline (download, transcribe, select
//! moments, render clips) as an independent task tracked by the
//! [`PipelineService`] registry. Expensive intermediates (transcript, LLM
//! moments, source file) are cached per video id so repeat jobs
//! short-circuit the stages they can.

pub mod config;
pub mod driver;
pub mod error;
pub mod llm;
pub mod registry;
pub mod selector;
pub mod state_machine;
pub mod transcribe;

pub use config::WorkerConfig;
pub use driver::{run_job, DriverContext};
pub use error::{PipelineError, PipelineResult};
pub use llm::OpenRouterClient;
pub use registry::{PipelineService, SubmitReceipt};
pub use state_machine::JobStateMachine;
