//! External tool wrappers and clip rendering for the clipline pipeline.
//!
//! This crate wraps the external collaborators (yt-dlp, ffprobe, FFmpeg,
//! detection models) behind typed interfaces:
//! - [`download`]: media acquisition
//! - [`probe`]: stream inspection
//! - [`command`]: FFmpeg builder and streaming subprocess runner
//! - [`captions`]: ASS caption/title generation
//! - [`filters`]: vertical layout filter graphs
//! - [`tracking`]: speaker-tracking detector cascade
//! - [`teaser`]: hook teaser window selection
//! - [`render`]: the clip renderer tying it all together

pub mod captions;
pub mod command;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod render;
pub mod teaser;
pub mod tracking;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, CommandRunner, FfmpegCommand, LogSink};
pub use download::{download_audio, download_video, DownloadOptions};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use render::{ClipRenderer, RenderRequest};
pub use tracking::{CropTrack, DetectorSource, SpeakerTracker};
