//! Local JSON persistence for the clipline pipeline.
//!
//! Three stores, all plain JSON files under one data directory:
//! - [`StateStore`]: one record per job plus an append-only history of
//!   terminal jobs
//! - [`AnalysisCache`]: transcript + selected moments keyed by video id
//! - [`VideoFileCache`]: downloaded source files with a TTL
//!
//! All writes go through write-to-temp-then-rename so concurrent readers
//! never observe a partial file.

pub mod analysis_cache;
pub mod error;
pub mod fsio;
pub mod state_store;
pub mod video_cache;

pub use analysis_cache::{AnalysisCache, AnalysisEntry, CacheInfo};
pub use error::{StorageError, StorageResult};
pub use state_store::StateStore;
pub use video_cache::VideoFileCache;
