//! In-process FFmpeg engine

use std::sync::Arc;

use crate::error::{EngineLoadError, ItemErrorKind};
use crate::ffmpeg::{encoder_available, install_log_filter, missing_filter, REQUIRED_FILTERS};
use crate::transcode::pipeline::transcode;

use super::workspace::Workspace;
use super::{CodecEngine, EncodeJob, EngineLoader, EngineRef};

/// Loads FFmpeg and checks the build can run the normalization graph
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    /// Encoder that must be present
    pub encoder: &'static str,
}

impl Default for FfmpegLoader {
    fn default() -> Self {
        Self {
            encoder: crate::config::NormalizationConfig::STANDARD.codec,
        }
    }
}

impl EngineLoader for FfmpegLoader {
    fn load(&self) -> Result<EngineRef, EngineLoadError> {
        crate::ffmpeg::init()?;
        install_log_filter();

        if !encoder_available(self.encoder) {
            return Err(EngineLoadError::MissingEncoder(self.encoder.to_string()));
        }
        if let Some(filter) = missing_filter(REQUIRED_FILTERS) {
            return Err(EngineLoadError::MissingFilter(filter.to_string()));
        }

        tracing::info!(
            encoder = self.encoder,
            version = %crate::ffmpeg::version_info(),
            "FFmpeg engine loaded"
        );

        Ok(Arc::new(FfmpegEngine::new()))
    }
}

/// Engine that transcodes workspace buffers with libavcodec/libavfilter
#[derive(Debug, Default)]
pub struct FfmpegEngine {
    workspace: Workspace,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodecEngine for FfmpegEngine {
    fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn run(&self, job: &EncodeJob) -> Result<(), ItemErrorKind> {
        let input = self.workspace.read_file(&job.input)?;
        let encoded = transcode(input, job)?;
        self.workspace.write_file(&job.output, encoded.into());
        Ok(())
    }
}
