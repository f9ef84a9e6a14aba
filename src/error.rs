use thiserror::Error;

use crate::engine::workspace::WorkspaceError;

/// Main error type for the equalizer pipeline
#[derive(Error, Debug)]
pub enum EqualizerError {
    /// The codec engine could not be loaded; fatal to the whole batch
    #[error("Engine load failed: {0}")]
    EngineLoad(#[from] EngineLoadError),

    /// A batch with zero items was submitted
    #[error("Batch contains no items")]
    EmptyBatch,

    /// Every item of a completed batch failed
    #[error("All {} items failed to process", failures.len())]
    TotalFailure { failures: Vec<ItemFailure> },

    /// The archive was requested for a set without processed items
    #[error("No processed items to archive")]
    NothingToArchive,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while bringing up the codec engine
#[derive(Error, Debug, Clone)]
pub enum EngineLoadError {
    #[error("FFmpeg initialization failed: {0}")]
    Init(String),

    #[error("Encoder not available: {0}")]
    MissingEncoder(String),

    #[error("Filter not available: {0}")]
    MissingFilter(String),

    #[error("Engine load task failed: {0}")]
    Join(String),
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("Failed to open input: {0}")]
    OpenInput(String),

    #[error("Failed to find stream info: {0}")]
    FindStreamInfo(String),

    #[error("No audio stream found in input")]
    NoAudioStream,

    #[error("Failed to create decoder: {0}")]
    DecoderCreate(String),

    #[error("Failed to find encoder: {0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Filter graph error: {0}")]
    FilterGraph(String),

    #[error("Failed to create muxer: {0}")]
    MuxerCreate(String),

    #[error("Failed to write header: {0}")]
    WriteHeader(String),

    #[error("Failed to write packet: {0}")]
    WritePacket(String),

    #[error("Failed to write trailer: {0}")]
    WriteTrailer(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    #[error("Memory IO error: {0}")]
    MemoryIo(String),
}

/// Per-item processing failure, tagged with the item it belongs to
#[derive(Error, Debug)]
#[error("{name}: {kind}")]
pub struct ItemError {
    pub name: String,
    #[source]
    pub kind: ItemErrorKind,
}

impl ItemError {
    pub fn new(name: impl Into<String>, kind: impl Into<ItemErrorKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ItemErrorKind {
    #[error("input payload is empty")]
    MissingInput,

    #[error("transcode failed: {0}")]
    Engine(#[from] FfmpegError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("engine produced no output")]
    EmptyOutput,

    #[error("transcode task aborted: {0}")]
    Join(String),
}

/// Name and reason of a failed item, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ItemFailure {
    pub name: String,
    pub reason: String,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EqualizerError>;
