//! Loudness normalization transcoding
//!
//! This module handles the in-process FFmpeg side of normalization:
//! - Audio decoder initialization from the source stream
//! - The `loudnorm` filter graph, including resampling to the output rate
//! - MP3 encoder initialization
//! - The loudnorm measurement pass feeding two-pass normalization
//! - The in-memory demux/decode/filter/encode/mux pipeline

pub mod decoder;
pub mod encoder;
pub mod filter;
pub mod measure;
pub mod pipeline;

pub use pipeline::transcode;
