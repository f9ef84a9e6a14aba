//! FFmpeg module - library initialization and shared helpers
//!
//! This module handles:
//! - FFmpeg initialization
//! - Routing FFmpeg's own log output into `tracing`
//! - Capturing log text on the current thread (filter reports)
//! - Custom AVIOContexts for in-memory demuxing and muxing
//! - Capability checks used when the engine loads

pub mod io;

pub use ffmpeg_next as ffmpeg;

use std::cell::RefCell;
use std::sync::Once;

use crate::error::EngineLoadError;

/// Filters the normalization graph is built from
pub const REQUIRED_FILTERS: &[&str] = &["abuffer", "abuffersink", "loudnorm", "aresample", "aformat"];

/// Initialize the FFmpeg library.
///
/// Safe to call more than once; every engine load goes through here.
pub fn init() -> Result<(), EngineLoadError> {
    ffmpeg::init()
        .map_err(|e| EngineLoadError::Init(format!("ffmpeg::init() failed: {}", e)))?;

    tracing::debug!("FFmpeg initialized");

    Ok(())
}

static LOG_FILTER: Once = Once::new();

/// Install a custom FFmpeg log callback that forwards messages to `tracing`
/// and drops known-noisy ones.
///
/// Altering the global log callback is not thread-safe, so installation is
/// guarded by a `Once` and happens during engine load, before any transcode
/// work runs.
pub fn install_log_filter() {
    LOG_FILTER.call_once(|| {
        // SAFETY: both functions modify global FFmpeg state and are called
        // after `ffmpeg::init()`, exactly once per process.
        unsafe {
            ffmpeg_next::ffi::av_log_set_level(ffmpeg_next::ffi::AV_LOG_WARNING as i32);
            ffmpeg_next::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
        }
    });
}

/// Messages that are expected side-effects of in-memory muxing and should be suppressed.
const SUPPRESSED_MESSAGES: &[&str] = &[
    "Estimating duration from bitrate",
    "Could not update timestamps for skipped samples",
    "Queue input is backward in time",
];

thread_local! {
    /// Informational log text collected for an active `capture_log` on this thread
    static CAPTURE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Ends a capture even if the captured closure panics
struct CaptureScope;

impl Drop for CaptureScope {
    fn drop(&mut self) {
        let _ = CAPTURE.try_with(|capture| {
            if let Ok(mut capture) = capture.try_borrow_mut() {
                capture.take();
            }
        });
    }
}

/// Run `f` and return the FFmpeg log text (info level and more severe) it
/// emitted on the calling thread.
///
/// Filters such as `loudnorm` only report their measurements through
/// `av_log`; this is how those reports are read back in-process.
pub fn capture_log<T>(f: impl FnOnce() -> T) -> (T, String) {
    install_log_filter();
    CAPTURE.with(|capture| *capture.borrow_mut() = Some(String::new()));
    let scope = CaptureScope;
    let result = f();
    let text = CAPTURE
        .with(|capture| capture.borrow_mut().take())
        .unwrap_or_default();
    drop(scope);
    (result, text)
}

fn capturing() -> bool {
    CAPTURE
        .try_with(|capture| {
            capture
                .try_borrow()
                .map(|capture| capture.is_some())
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

fn append_capture(text: &str) {
    let _ = CAPTURE.try_with(|capture| {
        if let Ok(mut capture) = capture.try_borrow_mut() {
            if let Some(buf) = capture.as_mut() {
                buf.push_str(text);
            }
        }
    });
}

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg_next::ffi::va_list,
) {
    use std::ffi::CStr;

    let capture = capturing() && level <= ffmpeg_next::ffi::AV_LOG_INFO as std::ffi::c_int;
    let forward = level <= ffmpeg_next::ffi::av_log_get_level();
    if !capture && !forward {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg_next::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    if capture {
        append_capture(&msg);
    }
    if !forward {
        return;
    }
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    for suppressed in SUPPRESSED_MESSAGES {
        if msg.contains(suppressed) {
            return;
        }
    }

    if level <= ffmpeg_next::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg_next::ffi::AV_LOG_WARNING as std::ffi::c_int {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::debug!(target: "ffmpeg", "{}", msg);
    }
}

/// Check whether a named encoder exists in the linked FFmpeg build.
pub fn encoder_available(name: &str) -> bool {
    ffmpeg::encoder::find_by_name(name).is_some()
}

/// Return the first filter from `names` missing in the linked FFmpeg build.
pub fn missing_filter(names: &[&'static str]) -> Option<&'static str> {
    names
        .iter()
        .copied()
        .find(|name| ffmpeg::filter::find(name).is_none())
}

/// Get the version information of the linked FFmpeg libraries.
pub fn version_info() -> String {
    let version = ffmpeg::util::version();
    format!(
        "libavutil {}.{}.{}",
        version >> 16,
        (version >> 8) & 0xff,
        version & 0xff
    )
}
