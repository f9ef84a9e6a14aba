//! Crate-level tests
//!
//! - Batch pipeline scenarios against an in-memory engine
//! - Upload/download through the HTTP router
//! - End-to-end normalization with the linked FFmpeg

pub mod fixtures;
pub mod upload;
