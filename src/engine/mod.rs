//! Codec engine handle
//!
//! This module handles:
//! - The `CodecEngine` seam between the pipeline and FFmpeg
//! - Lazy, single-flight engine loading (`EngineHandle`)
//! - The engine's private in-memory workspace

pub mod ffmpeg;
pub mod workspace;

use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::NormalizationConfig;
use crate::error::{EngineLoadError, ItemErrorKind};
use workspace::Workspace;

pub use self::ffmpeg::{FfmpegEngine, FfmpegLoader};

/// One filter/encode invocation against the engine workspace
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeJob {
    /// Workspace path of the source bytes
    pub input: String,
    /// Workspace path the encoded result is written to
    pub output: String,
    /// Audio filter description applied before encoding
    pub filter: String,
    /// Loudness targets for a measurement pass. When set, `filter` is only
    /// the fallback for inputs loudnorm cannot measure.
    pub measure: Option<NormalizationConfig>,
    /// Encoder name
    pub codec: &'static str,
    /// Output bitrate in bps
    pub bitrate: usize,
    /// Output sample rate in Hz
    pub sample_rate: u32,
}

impl EncodeJob {
    pub fn new(
        input: impl Into<String>,
        output: impl Into<String>,
        norm: &NormalizationConfig,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            filter: norm.filter_spec(),
            measure: norm.two_pass.then_some(*norm),
            codec: norm.codec,
            bitrate: norm.bitrate,
            sample_rate: norm.sample_rate,
        }
    }
}

/// A loaded transcoding engine.
///
/// `run` is CPU-bound and blocking; async callers must move it onto the
/// blocking pool.
pub trait CodecEngine: Send + Sync {
    fn workspace(&self) -> &Workspace;

    /// Read `job.input` from the workspace, filter and encode it, and write
    /// the result to `job.output`.
    fn run(&self, job: &EncodeJob) -> Result<(), ItemErrorKind>;
}

pub type EngineRef = Arc<dyn CodecEngine>;

/// Brings up an engine instance. Called at most once per successful load.
pub trait EngineLoader: Send + Sync {
    fn load(&self) -> Result<EngineRef, EngineLoadError>;
}

/// Lazily-loaded, shared engine
///
/// The first `acquire` runs the loader; concurrent callers wait on that same
/// load. A failed load leaves the handle empty so the next caller retries.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    cell: OnceCell<EngineRef>,
}

impl EngineHandle {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    /// Handle backed by the in-process FFmpeg engine
    pub fn ffmpeg() -> Self {
        Self::new(Arc::new(FfmpegLoader::default()))
    }

    /// Get the engine, loading it first if needed.
    pub async fn acquire(&self) -> Result<EngineRef, EngineLoadError> {
        let engine = self
            .cell
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                tracing::info!("Loading codec engine");
                let started = std::time::Instant::now();
                let engine = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| EngineLoadError::Join(e.to_string()))?
                    .inspect_err(|e| tracing::error!(error = %e, "Codec engine failed to load"))?;
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Codec engine ready"
                );
                Ok::<_, EngineLoadError>(engine)
            })
            .await?;
        Ok(Arc::clone(engine))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullEngine {
        workspace: Workspace,
    }

    impl CodecEngine for NullEngine {
        fn workspace(&self) -> &Workspace {
            &self.workspace
        }

        fn run(&self, _job: &EncodeJob) -> Result<(), ItemErrorKind> {
            Ok(())
        }
    }

    /// Fails the first `failures` loads, then succeeds
    struct FlakyLoader {
        failures: usize,
        calls: AtomicUsize,
    }

    impl EngineLoader for FlakyLoader {
        fn load(&self) -> Result<EngineRef, EngineLoadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EngineLoadError::MissingEncoder("libmp3lame".into()));
            }
            Ok(Arc::new(NullEngine {
                workspace: Workspace::new(),
            }))
        }
    }

    #[test]
    fn test_encode_job_uses_standard_parameters() {
        let job = EncodeJob::new("in", "out", &NormalizationConfig::STANDARD);
        assert_eq!(job.filter, "loudnorm=I=-23:LRA=11:TP=-1.5");
        assert_eq!(job.codec, "libmp3lame");
        assert_eq!(job.bitrate, 320_000);
        assert_eq!(job.sample_rate, 44_100);
        assert_eq!(job.measure, Some(NormalizationConfig::STANDARD));

        let single = NormalizationConfig {
            two_pass: false,
            ..NormalizationConfig::STANDARD
        };
        assert_eq!(EncodeJob::new("in", "out", &single).measure, None);
    }

    #[tokio::test]
    async fn test_acquire_reuses_loaded_engine() {
        let loader = Arc::new(FlakyLoader {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let handle = EngineHandle::new(loader.clone());
        assert!(!handle.is_loaded());

        let a = handle.acquire().await.unwrap();
        let b = handle.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(handle.is_loaded());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let loader = Arc::new(FlakyLoader {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let handle = EngineHandle::new(loader.clone());

        let err = handle.acquire().await.err().unwrap();
        assert!(matches!(err, EngineLoadError::MissingEncoder(_)));
        assert!(!handle.is_loaded());

        assert!(handle.acquire().await.is_ok());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }
}
