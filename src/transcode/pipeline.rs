//! In-memory normalization pipeline
//!
//! demux (memory) -> decode -> loudnorm graph -> MP3 encode -> mux (memory)
//!
//! When the job asks for it, a measurement pass over the same buffer runs
//! first and the loudnorm graph applies the measured values linearly.
//!
//! Runs synchronously; callers on the async runtime wrap it in
//! `spawn_blocking`.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;

use super::decoder::AudioDecoder;
use super::encoder::Mp3Encoder;
use super::filter::{LoudnormFilter, SinkFormat, SourceFormat};
use super::measure::measure_loudness;
use crate::config::NormalizationConfig;
use crate::engine::EncodeJob;
use crate::error::FfmpegError;
use crate::ffmpeg::io::{MemoryInput, MemoryOutput};

/// Container the encoded stream is written to
const OUTPUT_FORMAT: &str = "mp3";

/// Per-run counters, reported in the completion log line
#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    packets_in: usize,
    frames_decoded: usize,
    frames_encoded: usize,
    packets_out: usize,
}

/// Drives the encoder and muxer for filtered frames
struct Sink<'a> {
    encoder: Mp3Encoder,
    output: &'a mut MemoryOutput,
    stream_time_base: ffmpeg::Rational,
    next_pts: i64,
    stats: &'a mut Stats,
}

impl Sink<'_> {
    fn encode(&mut self, frame: &mut ffmpeg::util::frame::Audio) -> Result<(), FfmpegError> {
        frame.set_pts(Some(self.next_pts));
        self.next_pts += frame.samples() as i64;
        self.encoder.send_frame(frame)?;
        self.stats.frames_encoded += 1;
        self.drain()
    }

    fn finish(&mut self) -> Result<(), FfmpegError> {
        self.encoder.send_eof()?;
        self.drain()
    }

    fn drain(&mut self) -> Result<(), FfmpegError> {
        while let Some(mut packet) = self.encoder.receive_packet()? {
            packet.set_stream(0);
            packet.set_position(-1);
            packet.rescale_ts(self.encoder.time_base(), self.stream_time_base);
            packet
                .write_interleaved(self.output.output_mut())
                .map_err(|e| FfmpegError::WritePacket(e.to_string()))?;
            self.stats.packets_out += 1;
        }
        Ok(())
    }
}

fn drain_filter(filter: &mut LoudnormFilter, sink: &mut Sink<'_>) -> Result<(), FfmpegError> {
    while let Some(mut frame) = filter.pull()? {
        sink.encode(&mut frame)?;
    }
    Ok(())
}

fn drain_decoder(
    decoder: &mut AudioDecoder,
    filter: &mut LoudnormFilter,
    sink: &mut Sink<'_>,
    source_pts: &mut i64,
) -> Result<usize, FfmpegError> {
    let mut decoded = 0;
    while let Some(mut frame) = decoder.receive_frame()? {
        frame.set_pts(Some(*source_pts));
        *source_pts += frame.samples() as i64;
        filter.push(&frame)?;
        decoded += 1;
        drain_filter(filter, sink)?;
    }
    Ok(decoded)
}

/// Filter for the encoding pass, from a measurement of `input` when possible
fn second_pass_filter(
    input: &Bytes,
    norm: &NormalizationConfig,
    fallback: &str,
) -> Result<String, FfmpegError> {
    match measure_loudness(input.clone(), norm)? {
        Some(measurement) => Ok(measurement.filter_spec(norm)),
        None => {
            tracing::warn!("Loudness not measurable, falling back to dynamic normalization");
            Ok(fallback.to_string())
        }
    }
}

/// Normalize and re-encode one in-memory audio file.
///
/// Returns the complete MP3 file. Fails if the input has no decodable audio
/// stream or if any stage of the chain errors; never returns a partial file.
pub fn transcode(input: Bytes, job: &EncodeJob) -> Result<Vec<u8>, FfmpegError> {
    let input_len = input.len();
    let filter_spec = match &job.measure {
        Some(norm) => second_pass_filter(&input, norm, &job.filter)?,
        None => job.filter.clone(),
    };

    let mut demuxer = MemoryInput::open(input)?;
    let mut decoder = AudioDecoder::open_best(demuxer.input())?;

    let encoder = Mp3Encoder::open(job.codec, job.sample_rate, decoder.channels(), job.bitrate)?;

    let source = SourceFormat::of(&decoder);
    let sink_format = SinkFormat {
        sample_rate: job.sample_rate,
        channels: encoder.channels(),
        frame_size: encoder.frame_size() as u32,
    };
    let mut filter = LoudnormFilter::new(&filter_spec, &source, &sink_format)?;

    let mut output = MemoryOutput::create(OUTPUT_FORMAT)?;
    {
        let params = encoder.codec_parameters()?;
        let mut stream = output
            .output_mut()
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| FfmpegError::MuxerCreate(format!("add_stream: {}", e)))?;
        stream.set_parameters(params);
        stream.set_time_base(encoder.time_base());
    }
    output
        .output_mut()
        .write_header()
        .map_err(|e| FfmpegError::WriteHeader(e.to_string()))?;

    // The muxer may pick its own stream timebase during write_header
    let stream_time_base = output
        .output()
        .stream(0)
        .map(|s| s.time_base())
        .unwrap_or_else(|| encoder.time_base());

    let mut stats = Stats::default();
    let mut frames_decoded = 0;
    let mut source_pts = 0i64;
    {
        let mut sink = Sink {
            encoder,
            output: &mut output,
            stream_time_base,
            next_pts: 0,
            stats: &mut stats,
        };

        let mut packet = ffmpeg::codec::packet::Packet::empty();
        loop {
            match packet.read(demuxer.input_mut()) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    // Trailing garbage after the last good frame ends the stream
                    tracing::debug!(error = %e, "Demuxer stopped early");
                    break;
                }
            }
            if packet.stream() != decoder.stream_index() {
                continue;
            }
            sink.stats.packets_in += 1;
            decoder.send_packet(&packet)?;
            frames_decoded += drain_decoder(&mut decoder, &mut filter, &mut sink, &mut source_pts)?;
        }

        decoder.send_eof()?;
        frames_decoded += drain_decoder(&mut decoder, &mut filter, &mut sink, &mut source_pts)?;

        if frames_decoded == 0 {
            return Err(FfmpegError::DecodePacket(
                "no audio frames could be decoded".to_string(),
            ));
        }

        filter.flush()?;
        drain_filter(&mut filter, &mut sink)?;
        sink.finish()?;
    }
    stats.frames_decoded = frames_decoded;

    output
        .output_mut()
        .write_trailer()
        .map_err(|e| FfmpegError::WriteTrailer(e.to_string()))?;

    let data = output.take_data();
    tracing::debug!(
        filter = %filter_spec,
        input_bytes = input_len,
        output_bytes = data.len(),
        packets_in = stats.packets_in,
        frames_decoded = stats.frames_decoded,
        frames_encoded = stats.frames_encoded,
        packets_out = stats.packets_out,
        "Transcode complete"
    );

    Ok(data)
}
