//! C ABI wrapper for the bytewave scheduler.
//!
//! Exposes a small set of functions to create/destroy a player, swap the playing signal
//! (bytebeat expression or built-in patch), and pull interleaved f32 audio.
//!
//! ABI notes
//! - All functions are `extern "C"` and `#[no_mangle]`.
//! - Opaque handle type: `BytewaveEngine` (heap-allocated; you own/delete it).
//! - Render path produces **mono** internally and duplicates to N channels.
//! - Status-returning calls use `BYTEWAVE_OK` / the negative `BYTEWAVE_ERR_*` codes.
//!
//! Threading
//! - Rendering and signal swaps must be serialized by the host (the handle is not shared
//!   internally). Swaps take effect at the next buffer boundary of the render stream.

use std::ffi::{c_char, CStr};

use bytewave_engine::visual::grayscale;
use bytewave_engine::{Patch, Scheduler, SchedulerConfig, Signal, SignalSlot, TimelineSink};
use tracing::{debug, warn};

pub const BYTEWAVE_OK: i32 = 0;
pub const BYTEWAVE_ERR_NULL: i32 = -1;
pub const BYTEWAVE_ERR_UTF8: i32 = -2;
pub const BYTEWAVE_ERR_PARSE: i32 = -3;
pub const BYTEWAVE_ERR_UNKNOWN_PATCH: i32 = -4;

/// Opaque player handed to C: a scheduler over a software timeline plus its signal slot.
pub struct BytewaveEngine {
    gain: f32,
    slot: SignalSlot,
    scheduler: Scheduler<TimelineSink>,
}

impl BytewaveEngine {
    fn new(sample_rate: u32, buffer_len: usize) -> Option<Self> {
        let config = SchedulerConfig { sample_rate, buffer_len, ..SchedulerConfig::default() };
        let slot = SignalSlot::new(Patch::Ramp.signal(sample_rate));
        let sink = TimelineSink::with_capacity(sample_rate, buffer_len);
        let mut scheduler = match Scheduler::new(sink, slot.clone(), config) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "rejecting engine configuration");
                return None;
            }
        };
        scheduler.start().ok()?;
        Some(Self { gain: 1.0, slot, scheduler })
    }

    fn sample_rate(&self) -> u32 {
        self.scheduler.config().sample_rate
    }
}

/// Borrow a C string as UTF-8.
///
/// # Safety
/// `s` must be null or point to a NUL-terminated string valid for the call.
unsafe fn c_str<'a>(s: *const c_char) -> Result<&'a str, i32> {
    if s.is_null() {
        return Err(BYTEWAVE_ERR_NULL);
    }
    CStr::from_ptr(s).to_str().map_err(|_| BYTEWAVE_ERR_UTF8)
}

// --- Creation / destruction -------------------------------------------------------

/// Create a player at `sample_rate` with `buffer_len`-sample buffers, playing the `ramp` patch.
/// Returns null if the configuration is invalid (zero rate or length).
#[no_mangle]
pub extern "C" fn bytewave_create(sample_rate: u32, buffer_len: u32) -> *mut BytewaveEngine {
    match BytewaveEngine::new(sample_rate, buffer_len as usize) {
        Some(e) => Box::into_raw(Box::new(e)),
        None => std::ptr::null_mut(),
    }
}

/// Destroy a player previously returned by `bytewave_create`.
///
/// # Safety
/// `engine` must be null or a pointer from `bytewave_create` not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn bytewave_destroy(engine: *mut BytewaveEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// --- Signal control ---------------------------------------------------------------

/// Parse `expr` as a bytebeat expression and swap it in.
///
/// # Safety
/// `engine` must be a live handle; `expr` a NUL-terminated string (or null).
#[no_mangle]
pub unsafe extern "C" fn bytewave_set_expression(engine: *mut BytewaveEngine, expr: *const c_char) -> i32 {
    let Some(e) = engine.as_mut() else { return BYTEWAVE_ERR_NULL };
    let src = match c_str(expr) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match Signal::parse_bytebeat(src) {
        Ok(signal) => {
            debug!(expr = src, "expression set over C ABI");
            e.slot.swap(signal);
            BYTEWAVE_OK
        }
        Err(err) => {
            debug!(error = %err, "expression rejected");
            BYTEWAVE_ERR_PARSE
        }
    }
}

/// Swap in a built-in patch by name (`ramp`, `drone`, `siren`, `gate`, `pulse`).
///
/// # Safety
/// `engine` must be a live handle; `name` a NUL-terminated string (or null).
#[no_mangle]
pub unsafe extern "C" fn bytewave_set_patch(engine: *mut BytewaveEngine, name: *const c_char) -> i32 {
    let Some(e) = engine.as_mut() else { return BYTEWAVE_ERR_NULL };
    let name = match c_str(name) {
        Ok(s) => s,
        Err(code) => return code,
    };
    match Patch::from_name(name) {
        Some(patch) => {
            e.slot.swap(patch.signal(e.sample_rate()));
            BYTEWAVE_OK
        }
        None => BYTEWAVE_ERR_UNKNOWN_PATCH,
    }
}

/// Set overall output gain (0..1 suggested). Values are clamped to [0, +inf).
///
/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn bytewave_set_gain(engine: *mut BytewaveEngine, gain: f32) {
    if let Some(e) = engine.as_mut() {
        e.gain = if gain.is_finite() { gain.max(0.0) } else { 1.0 };
    }
}

// --- Rendering -------------------------------------------------------------------

/// Render `frames` of audio into an interleaved f32 buffer with `channels` channels.
/// The internal signal is mono; the sample is duplicated to all channels.
///
/// Returns the number of frames rendered (0 on error).
///
/// # Safety
/// `engine` must be a live handle and `out_interleaved` valid for `frames * channels` writes.
#[no_mangle]
pub unsafe extern "C" fn bytewave_render_interleaved_f32(
    engine: *mut BytewaveEngine,
    out_interleaved: *mut f32,
    frames: u32,
    channels: u32,
) -> u32 {
    let Some(e) = engine.as_mut() else { return 0 };
    if out_interleaved.is_null() || frames == 0 || channels == 0 {
        return 0;
    }
    let ch = channels as usize;
    let out = std::slice::from_raw_parts_mut(out_interleaved, frames as usize * ch);
    let gain = e.gain;
    match e.scheduler.render_interleaved(out, ch, |s| s * gain) {
        Ok(n) => u32::try_from(n).unwrap_or(frames),
        Err(err) => {
            warn!(error = %err, "render failed");
            out.fill(0.0);
            0
        }
    }
}

// --- Diagnostics ------------------------------------------------------------------

/// Number of scheduling underruns (refills that fell behind playback) so far.
///
/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn bytewave_underruns(engine: *const BytewaveEngine) -> u64 {
    engine.as_ref().map_or(0, |e| e.scheduler.stats().underruns)
}

/// Number of samples replaced by silence because the signal faulted.
///
/// # Safety
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn bytewave_faults(engine: *const BytewaveEngine) -> u64 {
    engine.as_ref().map_or(0, |e| e.scheduler.stats().faults)
}

/// Write the most recently refilled buffer as 8-bit grayscale into `out` (up to `len` bytes).
/// Returns the number of bytes written; 0 before the first refill.
///
/// # Safety
/// `engine` must be a live handle and `out` valid for `len` writes.
#[no_mangle]
pub unsafe extern "C" fn bytewave_scope(engine: *const BytewaveEngine, out: *mut u8, len: u32) -> u32 {
    let Some(e) = engine.as_ref() else { return 0 };
    if out.is_null() {
        return 0;
    }
    let out = std::slice::from_raw_parts_mut(out, len as usize);
    let written = e.scheduler.latest_buffer().map_or(0, |b| grayscale(b, out));
    u32::try_from(written).unwrap_or(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn bytebeat(t: usize) -> f32 {
        (((t % 256) as f64 / 256.0) * 2.0 - 1.0) as f32
    }

    #[test]
    fn create_render_destroy() {
        unsafe {
            let e = bytewave_create(8_000, 160);
            assert!(!e.is_null());
            // 0.1 s lead at 8 kHz, then the ramp from t = 0
            let mut out = vec![1.0_f32; (800 + 640) * 2];
            assert_eq!(bytewave_render_interleaved_f32(e, out.as_mut_ptr(), 800 + 640, 2), 1440);
            assert!(out[..1600].iter().all(|s| *s == 0.0));
            for (t, frame) in out[1600..].chunks_exact(2).enumerate() {
                assert_eq!(frame, [bytebeat(t), bytebeat(t)]);
            }
            assert_eq!(bytewave_underruns(e), 0);
            assert_eq!(bytewave_faults(e), 0);

            let mut px = [0u8; 160];
            assert_eq!(bytewave_scope(e, px.as_mut_ptr(), 160), 160);
            bytewave_destroy(e);
        }
    }

    #[test]
    fn signal_control_status_codes() {
        unsafe {
            let e = bytewave_create(8_000, 160);
            let ok = CString::new("t*(t>>5|t>>8)").unwrap();
            let bad = CString::new("t +").unwrap();
            let drone = CString::new("drone").unwrap();
            let nope = CString::new("nope").unwrap();
            assert_eq!(bytewave_set_expression(e, ok.as_ptr()), BYTEWAVE_OK);
            assert_eq!(bytewave_set_expression(e, bad.as_ptr()), BYTEWAVE_ERR_PARSE);
            assert_eq!(bytewave_set_expression(e, std::ptr::null()), BYTEWAVE_ERR_NULL);
            assert_eq!(bytewave_set_patch(e, drone.as_ptr()), BYTEWAVE_OK);
            assert_eq!(bytewave_set_patch(e, nope.as_ptr()), BYTEWAVE_ERR_UNKNOWN_PATCH);
            assert_eq!(bytewave_set_patch(std::ptr::null_mut(), drone.as_ptr()), BYTEWAVE_ERR_NULL);
            bytewave_destroy(e);
        }
    }

    #[test]
    fn gain_scales_output_and_invalid_config_is_null() {
        assert!(bytewave_create(0, 160).is_null());
        assert!(bytewave_create(8_000, 0).is_null());
        unsafe {
            let e = bytewave_create(8_000, 160);
            bytewave_set_gain(e, 0.5);
            let mut out = vec![0.0_f32; 801];
            bytewave_render_interleaved_f32(e, out.as_mut_ptr(), 801, 1);
            assert_eq!(out[800], -0.5);
            bytewave_destroy(e);
        }
    }
}
