//! Test fixtures
//!
//! - `FakeEngine`: an in-memory engine that "normalizes" by tagging bytes
//! - `FakeLoader`: counts loads, can be slowed down or made to fail
//! - `sine_wav`: synthesizes a PCM WAV file for FFmpeg-backed tests

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::batch::AudioItem;
use crate::engine::workspace::Workspace;
use crate::engine::{CodecEngine, EncodeJob, EngineHandle, EngineLoader, EngineRef};
use crate::error::{EngineLoadError, FfmpegError, ItemErrorKind};

/// Output prefix written by `FakeEngine`
pub const FAKE_OUTPUT_TAG: &[u8] = b"NORMALIZED:";
/// Inputs starting with this fail to "decode"
pub const CORRUPT: &[u8] = b"corrupt";
/// Inputs starting with this succeed without writing any output
pub const SILENT: &[u8] = b"silent";

/// Deterministic stand-in for the FFmpeg engine
#[derive(Debug, Default)]
pub struct FakeEngine {
    workspace: Workspace,
    pub runs: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Time each run takes
    pub run_time: Duration,
}

impl FakeEngine {
    pub fn with_run_time(run_time: Duration) -> Self {
        Self {
            run_time,
            ..Default::default()
        }
    }

    pub fn expected_output(input: &[u8]) -> Bytes {
        let mut out = FAKE_OUTPUT_TAG.to_vec();
        out.extend_from_slice(input);
        Bytes::from(out)
    }
}

impl CodecEngine for FakeEngine {
    fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn run(&self, job: &EncodeJob) -> Result<(), ItemErrorKind> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.run_time.is_zero() {
            std::thread::sleep(self.run_time);
        }

        let result = (|| -> Result<(), ItemErrorKind> {
            let input = self.workspace.read_file(&job.input)?;
            if input.starts_with(CORRUPT) {
                return Err(ItemErrorKind::Engine(FfmpegError::DecodePacket(
                    "Invalid data found when processing input".to_string(),
                )));
            }
            if !input.starts_with(SILENT) {
                self.workspace
                    .write_file(&job.output, Self::expected_output(&input));
            }
            Ok(())
        })();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Loader handing out one shared `FakeEngine`
pub struct FakeLoader {
    pub engine: Arc<FakeEngine>,
    pub loads: AtomicUsize,
    /// Number of initial loads that fail
    pub failures: usize,
    pub load_time: Duration,
}

impl FakeLoader {
    pub fn new() -> Arc<Self> {
        Self::with(FakeEngine::default(), 0, Duration::ZERO)
    }

    pub fn with(engine: FakeEngine, failures: usize, load_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(engine),
            loads: AtomicUsize::new(0),
            failures,
            load_time,
        })
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl EngineLoader for FakeLoader {
    fn load(&self) -> Result<EngineRef, EngineLoadError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_time.is_zero() {
            std::thread::sleep(self.load_time);
        }
        if n < self.failures {
            return Err(EngineLoadError::MissingEncoder("libmp3lame".to_string()));
        }
        let engine: EngineRef = self.engine.clone();
        Ok(engine)
    }
}

/// Handle over a fresh `FakeLoader`
pub fn fake_handle() -> (EngineHandle, Arc<FakeLoader>) {
    let loader = FakeLoader::new();
    (EngineHandle::new(loader.clone()), loader)
}

pub fn item(name: &str, data: &[u8]) -> AudioItem {
    AudioItem::new(name, Bytes::copy_from_slice(data), "audio/mpeg")
}

/// Whether the linked FFmpeg can run the real normalization chain
pub fn lame_available() -> bool {
    if ffmpeg::init().is_err() {
        return false;
    }
    let available = ffmpeg::encoder::find_by_name("libmp3lame").is_some()
        && ffmpeg::filter::find("loudnorm").is_some();
    if !available {
        println!("Skipping: FFmpeg build lacks libmp3lame or loudnorm");
    }
    available
}

/// 16-bit PCM WAV holding a 440 Hz sine at half scale
pub fn sine_wav(sample_rate: u32, channels: u16, seconds: f32) -> Vec<u8> {
    sine_wav_with_amplitude(sample_rate, channels, seconds, 0.5)
}

/// 16-bit PCM WAV holding a 440 Hz sine at `amplitude` (0.0..=1.0)
pub fn sine_wav_with_amplitude(
    sample_rate: u32,
    channels: u16,
    seconds: f32,
    amplitude: f32,
) -> Vec<u8> {
    let frames = (sample_rate as f32 * seconds) as u32;
    let block_align = channels as u32 * 2;
    let data_len = frames * block_align;

    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    wav.extend_from_slice(&(block_align as u16).to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = (t * 440.0 * std::f32::consts::TAU).sin() * amplitude;
        let sample = (value * i16::MAX as f32) as i16;
        for _ in 0..channels {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
    }
    wav
}

#[test]
fn test_sine_wav_header() {
    let wav = sine_wav(8_000, 2, 0.5);
    assert_eq!(&wav[0..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
    assert_eq!(wav.len(), 44 + 4_000 * 4);
}
