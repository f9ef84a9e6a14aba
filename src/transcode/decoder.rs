//! Audio decoder for the normalization pipeline
//!
//! Wraps an FFmpeg `AVCodecContext` to decode compressed audio packets
//! (MP3 in practice, but anything libavcodec understands) into PCM frames.

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;

/// Audio decoder backed by a FFmpeg codec context
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
}

impl AudioDecoder {
    /// Open a decoder for the given stream from its own codec parameters.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self, FfmpegError> {
        let stream_index = stream.index();
        let context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                FfmpegError::DecoderCreate(format!(
                    "codec context for stream {}: {}",
                    stream_index, e
                ))
            })?;

        let decoder = context.decoder().audio().map_err(|e| {
            FfmpegError::DecoderCreate(format!(
                "audio decoder for stream {}: {}",
                stream_index, e
            ))
        })?;

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    /// Open a decoder for the best audio stream of `input`.
    pub fn open_best(input: &ffmpeg::format::context::Input) -> Result<Self, FfmpegError> {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or(FfmpegError::NoAudioStream)?;
        Self::open(&stream)
    }

    /// Send a compressed packet to the decoder.
    ///
    /// `AVERROR_INVALIDDATA` skips the packet: damaged frames in the middle of
    /// a file should not sink the whole item.
    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<(), FfmpegError> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "send_packet: skipping undecodable packet"
                );
                Ok(())
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_packet on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }

    /// Send EOF to flush the decoder's internal buffers.
    pub fn send_eof(&mut self) -> Result<(), FfmpegError> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_eof on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }

    /// Receive one decoded frame, or `None` if the decoder needs more input.
    pub fn receive_frame(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>, FfmpegError> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(ffmpeg::Error::InvalidData) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    "receive_frame: dropping undecodable frame"
                );
                Ok(None)
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "receive_frame on stream {}: {}",
                self.stream_index, e
            ))),
        }
    }

    /// Index of the demuxer stream this decoder consumes
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }

    pub fn format(&self) -> ffmpeg::util::format::sample::Sample {
        self.decoder.format()
    }
}
