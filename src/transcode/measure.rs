//! First-pass loudness measurement
//!
//! Runs the source through `loudnorm` in analysis mode and reads back the
//! report the filter logs when its graph is freed. Feeding the measured
//! values into the second pass lets loudnorm apply one linear gain instead of
//! dynamic compression.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use serde::Deserialize;

use super::decoder::AudioDecoder;
use super::filter::{LoudnormFilter, SourceFormat};
use crate::config::NormalizationConfig;
use crate::error::FfmpegError;
use crate::ffmpeg::capture_log;
use crate::ffmpeg::io::MemoryInput;

/// Input loudness statistics reported by `loudnorm`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnessMeasurement {
    /// Integrated loudness in LUFS
    pub input_i: f64,
    /// True peak in dBTP
    pub input_tp: f64,
    /// Loudness range in LU
    pub input_lra: f64,
    /// Gating threshold in LUFS
    pub input_thresh: f64,
}

/// loudnorm's JSON report; values are quoted numbers
#[derive(Debug, Deserialize)]
struct Report {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
}

fn finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl LoudnessMeasurement {
    /// Extract the measurement from captured loudnorm log output.
    ///
    /// `None` when no report is present or it holds non-finite values, as it
    /// does for digital silence.
    pub fn from_report(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        let report: Report = serde_json::from_str(&text[start..=end]).ok()?;
        Some(Self {
            input_i: finite(&report.input_i)?,
            input_tp: finite(&report.input_tp)?,
            input_lra: finite(&report.input_lra)?,
            input_thresh: finite(&report.input_thresh)?,
        })
    }

    /// Second-pass filter: the fixed targets plus these measurements, in
    /// linear mode. Values are clamped to the ranges loudnorm accepts.
    pub fn filter_spec(&self, norm: &NormalizationConfig) -> String {
        format!(
            "{}:measured_I={:.2}:measured_LRA={:.2}:measured_TP={:.2}:measured_thresh={:.2}:linear=true",
            norm.filter_spec(),
            self.input_i.clamp(-99.0, 0.0),
            self.input_lra.clamp(0.0, 99.0),
            self.input_tp.clamp(-99.0, 99.0),
            self.input_thresh.clamp(-99.0, 0.0),
        )
    }
}

fn feed(
    decoder: &mut AudioDecoder,
    filter: &mut LoudnormFilter,
    source_pts: &mut i64,
) -> Result<usize, FfmpegError> {
    let mut decoded = 0;
    while let Some(mut frame) = decoder.receive_frame()? {
        frame.set_pts(Some(*source_pts));
        *source_pts += frame.samples() as i64;
        filter.push(&frame)?;
        decoded += 1;
        while filter.pull()?.is_some() {}
    }
    Ok(decoded)
}

/// Measure the loudness of an in-memory audio file.
///
/// Fails like the transcode does on undecodable input. `Ok(None)` means the
/// audio decoded but loudnorm produced no usable report.
pub fn measure_loudness(
    input: Bytes,
    norm: &NormalizationConfig,
) -> Result<Option<LoudnessMeasurement>, FfmpegError> {
    let mut demuxer = MemoryInput::open(input)?;
    let mut decoder = AudioDecoder::open_best(demuxer.input())?;
    let mut filter = LoudnormFilter::analyzer(&norm.measurement_spec(), &SourceFormat::of(&decoder))?;

    let mut frames = 0;
    let mut source_pts = 0i64;
    let mut packet = ffmpeg::codec::packet::Packet::empty();
    loop {
        match packet.read(demuxer.input_mut()) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Demuxer stopped early");
                break;
            }
        }
        if packet.stream() != decoder.stream_index() {
            continue;
        }
        decoder.send_packet(&packet)?;
        frames += feed(&mut decoder, &mut filter, &mut source_pts)?;
    }
    decoder.send_eof()?;
    frames += feed(&mut decoder, &mut filter, &mut source_pts)?;

    if frames == 0 {
        return Err(FfmpegError::DecodePacket(
            "no audio frames could be decoded".to_string(),
        ));
    }

    filter.flush()?;
    while filter.pull()?.is_some() {}

    // loudnorm logs its report while the graph is torn down
    let ((), report) = capture_log(move || drop(filter));
    let measurement = LoudnessMeasurement::from_report(&report);
    tracing::debug!(?measurement, frames, "Loudness measured");

    Ok(measurement)
}
