//! Custom AVIOContexts for in-memory demuxing and muxing
//!
//! Workspace buffers never touch the filesystem: the input side reads from a
//! `Bytes` buffer through a read/seek callback pair, and the output side
//! writes into a growable `Vec<u8>` through write/seek callbacks.
//!
//! # Thread safety
//! Neither side is thread-safe. Each transcode creates one `MemoryInput` and
//! one `MemoryOutput` and consumes them on the same blocking thread.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use std::ffi::c_void;
use std::io::{Read, Seek, SeekFrom, Write};
use std::mem::ManuallyDrop;
use std::ptr;

use crate::error::FfmpegError;

/// Size of the AVIO scratch buffer handed to FFmpeg
const IO_BUFFER_SIZE: usize = 32 * 1024;
/// `whence` flag: report total stream size instead of seeking
const AVSEEK_SIZE: i32 = 0x10000;
/// `whence` flag: hint that the seek may be expensive; ignored in memory
const AVSEEK_FORCE: i32 = 0x20000;

/// Read cursor over an immutable input buffer
pub struct MemoryReader {
    data: Bytes,
    position: usize,
}

impl MemoryReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        // Seeking past the end is allowed; reads from there hit EOF
        if self.position >= self.data.len() {
            return Ok(0);
        }
        let n = (self.data.len() - self.position).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl Seek for MemoryReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let len = self.data.len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => len + p,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }
        self.position = new_pos as usize;
        Ok(self.position as u64)
    }
}

/// Custom IO sink that writes to an in-memory buffer.
pub struct MemoryWriter {
    buffer: Vec<u8>,
    position: u64,
}

impl MemoryWriter {
    /// Create a new memory writer
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(IO_BUFFER_SIZE),
            position: 0,
        }
    }

    /// Take the written data, leaving the writer empty
    pub fn take(&mut self) -> Vec<u8> {
        self.position = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let pos = self.position as usize;
        let end = pos + buf.len();

        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }

        self.buffer[pos..end].copy_from_slice(buf);
        self.position += buf.len() as u64;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let buffer_len = self.buffer.len() as i64;

        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(p) => self.position as i64 + p,
            SeekFrom::End(p) => buffer_len + p,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of buffer",
            ));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

// C-compatible callbacks for FFmpeg

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: i32) -> i32 {
    let reader = &mut *(opaque as *mut MemoryReader);
    let out = std::slice::from_raw_parts_mut(buf, buf_size.max(0) as usize);
    match reader.read(out) {
        Ok(0) => ffmpeg::ffi::AVERROR_EOF,
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_input(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let reader = &mut *(opaque as *mut MemoryReader);

    if whence & AVSEEK_SIZE != 0 {
        return reader.len() as i64;
    }

    let seek_from = match whence & !AVSEEK_FORCE {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match reader.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

unsafe extern "C" fn write_packet(opaque: *mut c_void, buf: *const u8, buf_size: i32) -> i32 {
    let writer = &mut *(opaque as *mut MemoryWriter);
    let slice = std::slice::from_raw_parts(buf, buf_size.max(0) as usize);
    match writer.write(slice) {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

unsafe extern "C" fn seek_output(opaque: *mut c_void, offset: i64, whence: i32) -> i64 {
    let writer = &mut *(opaque as *mut MemoryWriter);

    if whence & AVSEEK_SIZE != 0 {
        return writer.buffer.len() as i64;
    }

    let seek_from = match whence & !AVSEEK_FORCE {
        0 => SeekFrom::Start(offset.max(0) as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    match writer.seek(seek_from) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

/// Free an AVIO context we allocated ourselves, including its scratch buffer.
unsafe fn free_avio(mut avio: *mut ffmpeg::ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    ffmpeg::ffi::av_freep(&mut (*avio).buffer as *mut *mut u8 as *mut c_void);
    ffmpeg::ffi::avio_context_free(&mut avio);
}

fn ffmpeg_error_string(code: i32) -> String {
    ffmpeg::Error::from(code).to_string()
}

/// Demuxer context reading from an in-memory buffer
pub struct MemoryInput {
    input: ManuallyDrop<ffmpeg::format::context::Input>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    _reader: Box<MemoryReader>,
}

impl MemoryInput {
    /// Open `data` as a media file and read its stream info.
    pub fn open(data: Bytes) -> Result<Self, FfmpegError> {
        unsafe {
            let reader_ptr = Box::into_raw(Box::new(MemoryReader::new(data)));

            let buffer = ffmpeg::ffi::av_malloc(IO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::MemoryIo(
                    "Failed to allocate AVIO buffer".to_string(),
                ));
            }

            let avio = ffmpeg::ffi::avio_alloc_context(
                buffer,
                IO_BUFFER_SIZE as i32,
                0,
                reader_ptr as *mut c_void,
                Some(read_packet),
                None,
                Some(seek_input),
            );
            if avio.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::MemoryIo(
                    "Failed to allocate AVIO context".to_string(),
                ));
            }

            let mut ctx = ffmpeg::ffi::avformat_alloc_context();
            if ctx.is_null() {
                free_avio(avio);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::OpenInput(
                    "Failed to allocate format context".to_string(),
                ));
            }
            (*ctx).pb = avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;

            // On failure avformat_open_input frees ctx but leaves our pb alone
            let ret = ffmpeg::ffi::avformat_open_input(
                &mut ctx,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            );
            if ret < 0 {
                free_avio(avio);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::OpenInput(ffmpeg_error_string(ret)));
            }

            let ret = ffmpeg::ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                (*ctx).pb = ptr::null_mut();
                ffmpeg::ffi::avformat_close_input(&mut ctx);
                free_avio(avio);
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::FindStreamInfo(ffmpeg_error_string(ret)));
            }

            Ok(Self {
                input: ManuallyDrop::new(ffmpeg::format::context::Input::wrap(ctx)),
                avio,
                _reader: Box::from_raw(reader_ptr),
            })
        }
    }

    pub fn input(&self) -> &ffmpeg::format::context::Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut ffmpeg::format::context::Input {
        &mut self.input
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        // SAFETY: detach pb so closing the format context cannot touch the
        // AVIO context we own, then close it exactly once. After that nothing
        // references avio.
        unsafe {
            (*self.input.as_mut_ptr()).pb = ptr::null_mut();
            ManuallyDrop::drop(&mut self.input);
            free_avio(self.avio);
        }
        self.avio = ptr::null_mut();
    }
}

/// Muxer context writing into an in-memory buffer
pub struct MemoryOutput {
    output: ManuallyDrop<ffmpeg::format::context::Output>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    writer: Box<MemoryWriter>,
}

impl MemoryOutput {
    /// Create an output context for the named container format (e.g. "mp3").
    pub fn create(format_name: &str) -> Result<Self, FfmpegError> {
        let filename = std::ffi::CString::new(format!("memory.{}", format_name))
            .map_err(|e| FfmpegError::MuxerCreate(e.to_string()))?;
        let format = std::ffi::CString::new(format_name)
            .map_err(|e| FfmpegError::MuxerCreate(e.to_string()))?;

        unsafe {
            let writer_ptr = Box::into_raw(Box::new(MemoryWriter::new()));

            let buffer = ffmpeg::ffi::av_malloc(IO_BUFFER_SIZE) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(writer_ptr));
                return Err(FfmpegError::MemoryIo(
                    "Failed to allocate AVIO buffer".to_string(),
                ));
            }

            let avio = ffmpeg::ffi::avio_alloc_context(
                buffer,
                IO_BUFFER_SIZE as i32,
                1,
                writer_ptr as *mut c_void,
                None,
                Some(write_packet),
                Some(seek_output),
            );
            if avio.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(writer_ptr));
                return Err(FfmpegError::MemoryIo(
                    "Failed to allocate AVIO context".to_string(),
                ));
            }

            let mut output_ptr: *mut ffmpeg::ffi::AVFormatContext = ptr::null_mut();

            let ret = ffmpeg::ffi::avformat_alloc_output_context2(
                &mut output_ptr,
                ptr::null_mut(),
                format.as_ptr(),
                filename.as_ptr(),
            );
            if ret < 0 || output_ptr.is_null() {
                free_avio(avio);
                drop(Box::from_raw(writer_ptr));
                return Err(FfmpegError::MuxerCreate(format!(
                    "{}: {}",
                    format_name,
                    ffmpeg_error_string(ret)
                )));
            }

            (*output_ptr).pb = avio;
            (*output_ptr).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO as i32;

            Ok(Self {
                output: ManuallyDrop::new(ffmpeg::format::context::Output::wrap(output_ptr)),
                avio,
                writer: Box::from_raw(writer_ptr),
            })
        }
    }

    pub fn output(&self) -> &ffmpeg::format::context::Output {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut ffmpeg::format::context::Output {
        &mut self.output
    }

    /// Flush buffered AVIO data and take everything written so far.
    pub fn take_data(&mut self) -> Vec<u8> {
        // SAFETY: avio stays valid for the lifetime of self.
        unsafe { ffmpeg::ffi::avio_flush(self.avio) };
        self.writer.take()
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        // SAFETY: detach pb so dropping the Output cannot avio_close our
        // custom context (its opaque is not a URLContext). The format context
        // is freed exactly once, then nothing else references avio.
        unsafe {
            (*self.output.as_mut_ptr()).pb = ptr::null_mut();
            ManuallyDrop::drop(&mut self.output);
            free_avio(self.avio);
        }
        self.avio = ptr::null_mut();
    }
}
