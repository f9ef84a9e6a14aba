//! Batch MP3 loudness equalizer
//!
//! Normalizes every file of an uploaded batch to the same EBU R128 loudness
//! target with in-process FFmpeg, then packs the results into one ZIP archive.

pub mod archive;
pub mod batch;
pub mod config;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod http;
pub mod normalize;
pub mod state;
pub mod transcode;

#[cfg(test)]
pub(crate) mod tests;

pub use archive::build_archive;
pub use batch::{
    process_batch, AudioItem, BatchProgress, BatchReport, CancelSignal, ProcessingOutcome,
    ProgressObserver,
};
pub use config::{NormalizationConfig, ServerConfig};
pub use engine::{CodecEngine, EncodeJob, EngineHandle, EngineLoader, EngineRef};
pub use error::{EngineLoadError, EqualizerError, FfmpegError, ItemError, Result};
pub use normalize::normalize;
