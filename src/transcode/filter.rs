//! Loudness normalization filter graph
//!
//! `abuffer -> loudnorm -> aresample -> aformat -> abuffersink`
//!
//! The tail of the chain converts loudnorm's 192 kHz double output into the
//! exact rate, sample format and layout the MP3 encoder was opened with, and
//! the sink re-chunks frames to the encoder's fixed frame size. The
//! measurement pass uses a bare `abuffer -> loudnorm -> abuffersink` graph.

use super::decoder::AudioDecoder;
use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;

const SOURCE: &str = "in";
const SINK: &str = "out";

/// Input side description of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_fmt: &'static str,
}

impl SourceFormat {
    /// Format of the frames `decoder` produces
    pub fn of(decoder: &AudioDecoder) -> Self {
        Self {
            sample_rate: decoder.sample_rate(),
            channels: decoder.channels(),
            sample_fmt: decoder.format().name(),
        }
    }
}

/// Output side description of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: u32,
}

fn channel_layout_name(channels: u16) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        n => format!("{}c", n),
    }
}

/// Build the full filter description between the source and the sink.
pub fn graph_spec(filter: &str, sink: &SinkFormat) -> String {
    format!(
        "{},aresample={},aformat=sample_fmts=fltp:channel_layouts={}",
        filter,
        sink.sample_rate,
        channel_layout_name(sink.channels)
    )
}

/// Arguments for the `abuffer` source
pub fn source_args(source: &SourceFormat) -> String {
    format!(
        "time_base=1/{rate}:sample_rate={rate}:sample_fmt={fmt}:channel_layout={layout}",
        rate = source.sample_rate,
        fmt = source.sample_fmt,
        layout = channel_layout_name(source.channels)
    )
}

/// A configured normalization graph
pub struct LoudnormFilter {
    graph: ffmpeg::filter::Graph,
}

impl LoudnormFilter {
    /// Graph feeding an encoder opened for `sink`
    pub fn new(filter: &str, source: &SourceFormat, sink: &SinkFormat) -> Result<Self, FfmpegError> {
        let mut filter = Self::build(&graph_spec(filter, sink), source)?;
        filter.sink()?.sink().set_frame_size(sink.frame_size);
        Ok(filter)
    }

    /// Graph running `filter` alone, for analysis passes whose output is
    /// discarded
    pub fn analyzer(filter: &str, source: &SourceFormat) -> Result<Self, FfmpegError> {
        Self::build(filter, source)
    }

    fn build(spec: &str, source: &SourceFormat) -> Result<Self, FfmpegError> {
        let mut graph = ffmpeg::filter::Graph::new();

        let abuffer = ffmpeg::filter::find("abuffer")
            .ok_or_else(|| FfmpegError::FilterGraph("abuffer filter not found".into()))?;
        let abuffersink = ffmpeg::filter::find("abuffersink")
            .ok_or_else(|| FfmpegError::FilterGraph("abuffersink filter not found".into()))?;

        graph
            .add(&abuffer, SOURCE, &source_args(source))
            .map_err(|e| FfmpegError::FilterGraph(format!("abuffer: {}", e)))?;
        graph
            .add(&abuffersink, SINK, "")
            .map_err(|e| FfmpegError::FilterGraph(format!("abuffersink: {}", e)))?;

        graph
            .output(SOURCE, 0)
            .and_then(|parser| parser.input(SINK, 0))
            .and_then(|parser| parser.parse(spec))
            .map_err(|e| FfmpegError::FilterGraph(format!("parse '{}': {}", spec, e)))?;
        graph
            .validate()
            .map_err(|e| FfmpegError::FilterGraph(format!("validate: {}", e)))?;

        tracing::debug!(graph = %spec, "Filter graph configured");

        Ok(Self { graph })
    }

    fn source(&mut self) -> Result<ffmpeg::filter::Context<'_>, FfmpegError> {
        self.graph
            .get(SOURCE)
            .ok_or_else(|| FfmpegError::FilterGraph("source pad missing".into()))
    }

    fn sink(&mut self) -> Result<ffmpeg::filter::Context<'_>, FfmpegError> {
        self.graph
            .get(SINK)
            .ok_or_else(|| FfmpegError::FilterGraph("sink pad missing".into()))
    }

    /// Feed one decoded frame into the graph.
    pub fn push(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<(), FfmpegError> {
        self.source()?
            .source()
            .add(frame)
            .map_err(|e| FfmpegError::FilterGraph(format!("push frame: {}", e)))
    }

    /// Signal end of input so buffered audio drains through the graph.
    pub fn flush(&mut self) -> Result<(), FfmpegError> {
        self.source()?
            .source()
            .flush()
            .map_err(|e| FfmpegError::FilterGraph(format!("flush: {}", e)))
    }

    /// Pull one filtered frame, or `None` if the graph needs more input or
    /// has drained completely.
    pub fn pull(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>, FfmpegError> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.sink()?.sink().frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::FilterGraph(format!("pull frame: {}", e))),
        }
    }
}
