//! bytewave core: a lazy, pull-based stream algebra for composing synthesis graphs.
//!
//! Features
//! - `fast-math`: polynomial sine in the oscillator instead of `f64::sin`
//!
//! Modules
//! - [`dsp`]    : numeric/time helpers (true modulo, bytebeat mapping, phase, sample counts)
//! - [`stream`] : the [`Stream`](stream::Stream) description type and input normalisation
//! - [`ops`]    : combinators (`constant`, `osc`, `add`, `mul`, `zip`, `cat`, `cycle`, `take`,
//!   `count`, `rand`, `noise`, `map`)
//!
//! Design
//! - Streams are descriptions; walking one builds fresh iterator state, so graphs are reusable
//! - Nothing is materialised ahead of time except explicitly fixed streams
//! - Values are `f64`; buffers narrow to `f32` downstream

pub mod dsp;
pub mod ops;
pub mod stream;

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::dsp::{bytebeat_sample, modulo, DEFAULT_SAMPLE_RATE, TAU};
    pub use crate::ops::{
        add, cat, constant, count, cycle, map, mul, noise, osc, osc_at, rand, seconds, seconds_at,
        take, zip,
    };
    pub use crate::stream::{SignalInput, Stream, Traversal, Value};
}
