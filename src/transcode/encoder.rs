//! MP3 encoder for the normalization pipeline
//!
//! Wraps an FFmpeg `AVCodecContext` to encode planar float PCM into MP3
//! packets at a fixed bitrate and sample rate.

use crate::error::FfmpegError;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

/// Sample format the filter graph delivers to the encoder
pub const ENCODER_SAMPLE_FMT: Sample = Sample::F32(ffmpeg::util::format::sample::Type::Planar);
/// MPEG-1 Layer III frame size (samples per channel per frame)
pub const MP3_FRAME_SIZE: usize = 1152;

/// Channel count of the encoded output for a given source channel count.
///
/// Mono stays mono; everything else is folded to stereo.
pub fn output_channels(source_channels: u16) -> u16 {
    if source_channels == 1 {
        1
    } else {
        2
    }
}

/// MP3 encoder backed by a real FFmpeg codec context
pub struct Mp3Encoder {
    encoder: ffmpeg::encoder::Audio,
    frame_size: usize,
    channels: u16,
    time_base: ffmpeg::Rational,
}

impl Mp3Encoder {
    /// Open the named encoder (normally `libmp3lame`).
    pub fn open(
        codec_name: &str,
        sample_rate: u32,
        channels: u16,
        bitrate: usize,
    ) -> Result<Self, FfmpegError> {
        let codec = codec::encoder::find_by_name(codec_name)
            .ok_or_else(|| FfmpegError::EncoderNotFound(codec_name.to_string()))?;

        let channels = output_channels(channels);
        let ch_layout = if channels == 1 {
            ChannelLayout::MONO
        } else {
            ChannelLayout::STEREO
        };
        let time_base = ffmpeg::Rational::new(1, sample_rate as i32);

        // Configure the audio encoder BEFORE opening
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(time_base);

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderCreate(format!("audio encoder handle: {}", e))
        })?;

        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_format(ENCODER_SAMPLE_FMT);
        audio_enc.set_channel_layout(ch_layout);
        audio_enc.set_bit_rate(bitrate);

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            FfmpegError::EncoderCreate(format!("open {}: {}", codec_name, e))
        })?;

        let frame_size = match encoder.frame_size() as usize {
            0 => MP3_FRAME_SIZE,
            n => n,
        };

        Ok(Self {
            encoder,
            frame_size,
            channels,
            time_base,
        })
    }

    pub fn send_frame(&mut self, frame: &ffmpeg::util::frame::Audio) -> Result<(), FfmpegError> {
        self.encoder
            .send_frame(frame)
            .map_err(|e| FfmpegError::EncodeFrame(format!("send_frame: {}", e)))
    }

    /// Send EOF to flush the encoder's buffered output.
    pub fn send_eof(&mut self) -> Result<(), FfmpegError> {
        match self.encoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::EncodeFrame(format!("send_eof: {}", e))),
        }
    }

    /// Receive one encoded packet, or `None` if the encoder needs more input.
    pub fn receive_packet(&mut self) -> Result<Option<ffmpeg::codec::packet::Packet>, FfmpegError> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::EncodeFrame(format!("receive_packet: {}", e))),
        }
    }

    /// Samples per channel the encoder expects in every frame but the last.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// The encoder timebase (1 / sample_rate).
    pub fn time_base(&self) -> ffmpeg::Rational {
        self.time_base
    }

    /// Codec parameters for the encoded stream (for muxer stream setup).
    pub fn codec_parameters(&self) -> Result<ffmpeg::codec::Parameters, FfmpegError> {
        use std::ops::Deref;
        use std::rc::Rc;
        let ctx: &ffmpeg::codec::Context = self.encoder.deref();
        unsafe {
            let params = ffmpeg::ffi::avcodec_parameters_alloc();
            if params.is_null() {
                return Err(FfmpegError::MuxerCreate(
                    "failed to allocate codec parameters".to_string(),
                ));
            }
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
            if ret < 0 {
                let mut params = params;
                ffmpeg::ffi::avcodec_parameters_free(&mut params);
                return Err(FfmpegError::MuxerCreate(format!(
                    "codec parameters: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
            Ok(ffmpeg::codec::Parameters::wrap(
                params,
                None::<Rc<dyn std::any::Any>>,
            ))
        }
    }
}
