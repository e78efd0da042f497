//! Numeric and time helpers shared by the stream algebra and the scheduler.
//!
//! Design goals:
//! - Sample-exact, side-effect free helpers that are easy to test
//! - Math backend selection through `cfg-if`
//! - Optional `fast-math` approximation for the oscillator sine
//!
//! Conventions:
//! - Samples are computed in `f64` and narrowed to `f32` only when written to a buffer.
//! - Time is measured in samples (`u64`) on the logical timeline and in seconds (`f64`)
//!   on the hardware timeline.

#![allow(clippy::excessive_precision)]

use core::f64::consts::PI;

use cfg_if::cfg_if;
use num_traits::Float;

// --------------------------------- Constants -------------------------------------

/// 2π (commonly useful)
pub const TAU: f64 = 2.0 * PI;

/// Sample rate assumed by combinators that are not given one explicitly.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Scale applied to bytebeat values before wrapping: one "byte" of amplitude.
pub const BYTEBEAT_SCALE: f64 = 256.0;

// ----------------------------- Math backend selection -----------------------------

cfg_if! {
    if #[cfg(feature = "fast-math")] {
        /// Sine with range reduction into [-π/2, π/2] and a 7th-order odd polynomial.
        /// Max abs error ~2e-4 over the reduced range.
        #[inline]
        pub fn sine(x: f64) -> f64 {
            let k = (x / TAU).round();
            let mut xr = x - k * TAU;
            // fold into [-π/2, π/2] using sin(π - x) = sin(x)
            if xr > 0.5 * PI {
                xr = PI - xr;
            } else if xr < -0.5 * PI {
                xr = -PI - xr;
            }
            let x2 = xr * xr;
            let x3 = x2 * xr;
            xr + (-1.0 / 6.0) * x3 + (1.0 / 120.0) * x3 * x2 + (-1.0 / 5040.0) * x3 * x2 * x2
        }
    } else {
        /// Exact sine (std backend).
        #[inline]
        pub fn sine(x: f64) -> f64 {
            x.sin()
        }
    }
}

// --------------------------------- Modulo ----------------------------------------

/// True mathematical modulo: the result carries the sign of `m`, so for a positive
/// modulus it is always in `[0, m)`.
///
/// `modulo(-1.0, 256.0) == 255.0`, whereas the truncating `%` would give `-1.0`.
/// Computed as `((n % m) + m) % m` so that tiny negative inputs collapse to `0`
/// instead of rounding up to `m`.
#[inline]
pub fn modulo<T: Float>(n: T, m: T) -> T {
    ((n % m) + m) % m
}

/// Map a bytebeat value into [-1, 1): `modulo(value / 256, 1) * 2 - 1`.
#[inline]
pub fn bytebeat_sample(value: f64) -> f64 {
    modulo(value / BYTEBEAT_SCALE, 1.0) * 2.0 - 1.0
}

// --------------------------------- Phase / time ----------------------------------

/// Per-sample phase increment (radians) for `freq_hz` at `sample_rate`.
#[inline]
pub fn phase_increment(freq_hz: f64, sample_rate: f64) -> f64 {
    TAU * freq_hz / sample_rate
}

/// Number of samples covering `secs` seconds. Partial samples round up, negative
/// durations give zero.
#[inline]
pub fn seconds_to_samples(secs: f64, sample_rate: f64) -> usize {
    let n = (secs * sample_rate).ceil();
    if n.is_finite() && n > 0.0 { n as usize } else { 0 }
}

/// Duration in seconds of `frames` samples at `sample_rate`.
#[inline]
pub fn samples_to_seconds(frames: usize, sample_rate: u32) -> f64 {
    frames as f64 / f64::from(sample_rate)
}

/// Hard clip into the buffer range [-1, 1].
#[inline]
pub fn clamp_unit(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

// --------------------------------- Tests -----------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modulo_is_non_negative() {
        assert_eq!(modulo(-1.0, 256.0), 255.0);
        assert_eq!(modulo(-257.0, 256.0), 255.0);
        assert_eq!(modulo(513.0, 256.0), 1.0);
        assert_eq!(modulo(-0.25_f32, 1.0), 0.75);
        assert_eq!(modulo(-1e-20, 1.0), 0.0);
    }

    #[test]
    fn bytebeat_ramp_wraps_every_256() {
        assert_eq!(bytebeat_sample(0.0), -1.0);
        assert_eq!(bytebeat_sample(255.0), (255.0 / 256.0) * 2.0 - 1.0);
        assert_eq!(bytebeat_sample(256.0), -1.0);
        assert_eq!(bytebeat_sample(511.0), (255.0 / 256.0) * 2.0 - 1.0);
        assert_eq!(bytebeat_sample(-128.0), 0.0);
    }

    #[test]
    fn time_conversions() {
        assert_eq!(seconds_to_samples(0.5, 48_000.0), 24_000);
        assert_eq!(seconds_to_samples(-1.0, 48_000.0), 0);
        assert_eq!(seconds_to_samples(1.0 / 96_000.0, 48_000.0), 1);
        assert_eq!(samples_to_seconds(1600, 48_000), 1600.0 / 48_000.0);
    }

    #[test]
    fn sine_tracks_std() {
        for i in -64..64 {
            let x = f64::from(i) * 0.37;
            assert!((sine(x) - x.sin()).abs() < 1e-3, "x={x}");
        }
    }
}
