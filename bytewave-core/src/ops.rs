//! Stream combinators.
//!
//! Every combinator returns a new [`Stream`] description; walking it builds fresh traversals of
//! all its inputs, so one expression can be played any number of times. The only exception is
//! [`rand`], which is a single process-wide sequence.
//!
//! Numeric arguments accept anything convertible into [`SignalInput`], so plain numbers are
//! lifted to constant streams: `osc(add(240.0, mul(osc(0.1), 120.0)))`.

use std::sync::{Arc, OnceLock};

use ::rand::rngs::StdRng;
use ::rand::{Rng, SeedableRng};

use crate::dsp::{phase_increment, seconds_to_samples, sine, DEFAULT_SAMPLE_RATE, TAU};
use crate::stream::{SignalInput, Stream, Traversal, Value};

#[inline]
fn lift(input: impl Into<SignalInput>) -> Stream {
    input.into().into_stream()
}

// ------------------------------------ Sources ------------------------------------

/// Infinite stream of `x`.
pub fn constant(x: f64) -> Stream {
    Stream::deferred(move || std::iter::repeat(x))
}

/// Infinite increasing sequence `start, start + 1, …`.
pub fn count(start: i64) -> Stream {
    Stream::deferred(move || (start..).map(|i| i as f64))
}

/// Sine oscillator at the default sample rate (48 kHz).
pub fn osc(freq: impl Into<SignalInput>) -> Stream {
    osc_at(freq, DEFAULT_SAMPLE_RATE)
}

/// Sine oscillator. Each output sample consumes exactly one frequency value (Hz); the stream
/// ends when the frequency stream does.
pub fn osc_at(freq: impl Into<SignalInput>, sample_rate: u32) -> Stream {
    let freq = lift(freq);
    let scale = phase_increment(1.0, f64::from(sample_rate));
    Stream::deferred(move || Osc { freq: freq.iter(), phase: 0.0, scale })
}

struct Osc {
    freq: Traversal,
    phase: f64,
    scale: f64,
}

impl Iterator for Osc {
    type Item = f64;

    #[inline]
    fn next(&mut self) -> Option<f64> {
        let freq = self.freq.next()?;
        let y = sine(self.phase);
        // keep the accumulator bounded; sine is periodic so the output is unchanged
        self.phase = (self.phase + freq * self.scale) % TAU;
        Some(y)
    }
}

/// Uniform noise in [-1, 1) drawn from one process-wide sequence.
///
/// Unlike every other combinator this is **not** re-instantiable: all consumers, in every
/// graph, advance the same cursor. Two `rand()` leaves in one expression therefore see
/// different values. Use [`noise`] for a reproducible, per-traversal sequence.
pub fn rand() -> Stream {
    static SHARED: OnceLock<Stream> = OnceLock::new();
    SHARED.get_or_init(|| Stream::shared(Noise::new(StdRng::from_entropy()))).clone()
}

/// Seeded uniform noise in [-1, 1). Each traversal restarts the same sequence.
pub fn noise(seed: u64) -> Stream {
    Stream::deferred(move || Noise::new(StdRng::seed_from_u64(seed)))
}

struct Noise {
    rng: StdRng,
}

impl Noise {
    fn new(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Iterator for Noise {
    type Item = f64;

    #[inline]
    fn next(&mut self) -> Option<f64> {
        Some(self.rng.gen_range(-1.0..1.0))
    }
}

// ---------------------------------- Arithmetic -----------------------------------

/// Pointwise sum, pulling one value from `a` then one from `b` per step.
///
/// # Panics
///
/// Pulling after either input is exhausted panics: `add` requires inputs at least as long as
/// its consumer reads. Use [`take`] on the result, not on the operands, to bound it.
pub fn add(a: impl Into<SignalInput>, b: impl Into<SignalInput>) -> Stream {
    let (a, b) = (lift(a), lift(b));
    Stream::deferred(move || Add { a: a.iter(), b: b.iter() })
}

struct Add {
    a: Traversal,
    b: Traversal,
}

impl Iterator for Add {
    type Item = f64;

    #[inline]
    fn next(&mut self) -> Option<f64> {
        match (self.a.next(), self.b.next()) {
            (Some(x), Some(y)) => Some(x + y),
            _ => panic!("add: input stream exhausted (add requires infinite or at-least-as-long inputs)"),
        }
    }
}

/// Pointwise product via [`zip`]: ends as soon as either input ends.
pub fn mul(a: impl Into<SignalInput>, b: impl Into<SignalInput>) -> Stream {
    map(zip::<f64, f64>(lift(a), lift(b)), |(x, y): (f64, f64)| x * y)
}

// ---------------------------------- Structure ------------------------------------

/// Pairs of `(a[i], b[i])`.
///
/// Each step pulls `a` first, then `b`. The stream ends when `a` ends, or as soon as `b`
/// reports completion, in which case the `a` value already pulled for that step is dropped.
/// The order matters for shared inputs such as [`rand`].
pub fn zip<A: Value, B: Value>(a: impl Into<Stream<A>>, b: impl Into<Stream<B>>) -> Stream<(A, B)> {
    let (a, b) = (a.into(), b.into());
    Stream::deferred(move || Zip { a: a.iter(), b: b.iter(), done: false })
}

struct Zip<A, B> {
    a: Traversal<A>,
    b: Traversal<B>,
    done: bool,
}

impl<A, B> Iterator for Zip<A, B> {
    type Item = (A, B);

    fn next(&mut self) -> Option<(A, B)> {
        if self.done {
            return None;
        }
        let pair = self.a.next().and_then(|x| self.b.next().map(|y| (x, y)));
        self.done = pair.is_none();
        pair
    }
}

/// All of `a`, then all of `b`. `b` is only instantiated once `a` is exhausted.
pub fn cat<T: Value>(a: impl Into<Stream<T>>, b: impl Into<Stream<T>>) -> Stream<T> {
    let (a, b) = (a.into(), b.into());
    Stream::deferred(move || Cat { first: Some(a.iter()), second: b.clone(), rest: None })
}

struct Cat<T> {
    first: Option<Traversal<T>>,
    second: Stream<T>,
    rest: Option<Traversal<T>>,
}

impl<T: Value> Iterator for Cat<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if let Some(first) = self.first.as_mut() {
            if let Some(x) = first.next() {
                return Some(x);
            }
            self.first = None;
            self.rest = Some(self.second.iter());
        }
        self.rest.as_mut()?.next()
    }
}

/// Repeat `a` forever, re-instantiating it for every lap.
///
/// A lap that yields nothing ends the stream rather than spinning.
pub fn cycle<T: Value>(a: impl Into<Stream<T>>) -> Stream<T> {
    let source = a.into();
    Stream::deferred(move || Cycle { current: source.iter(), source: source.clone(), lap_len: 0 })
}

struct Cycle<T> {
    source: Stream<T>,
    current: Traversal<T>,
    lap_len: usize,
}

impl<T: Value> Iterator for Cycle<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            if let Some(x) = self.current.next() {
                self.lap_len += 1;
                return Some(x);
            }
            if self.lap_len == 0 {
                return None;
            }
            self.current = self.source.iter();
            self.lap_len = 0;
        }
    }
}

/// The first `n` values of `a` (fewer if `a` ends first).
pub fn take<T: Value>(a: impl Into<Stream<T>>, n: usize) -> Stream<T> {
    let a = a.into();
    Stream::deferred(move || a.iter().take(n))
}

/// Elementwise transform with a pure function.
pub fn map<T, U, F>(s: impl Into<Stream<T>>, f: F) -> Stream<U>
where
    T: Value,
    U: Value,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let s = s.into();
    let f = Arc::new(f);
    Stream::deferred(move || {
        let f = Arc::clone(&f);
        s.iter().map(move |x| f(x))
    })
}

// ------------------------------------ Time ---------------------------------------

/// Sample count for `secs` seconds at the default rate, for use with [`take`].
pub fn seconds(secs: f64) -> usize {
    seconds_at(secs, DEFAULT_SAMPLE_RATE)
}

/// Sample count for `secs` seconds at `sample_rate`.
pub fn seconds_at(secs: f64, sample_rate: u32) -> usize {
    seconds_to_samples(secs, f64::from(sample_rate))
}

// ------------------------------------ Tests --------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_constant_yields_exactly_n() {
        assert_eq!(take(constant(0.5), 7).iter().collect::<Vec<_>>(), vec![0.5; 7]);
        assert!(take(constant(0.5), 0).iter().next().is_none());
    }

    #[test]
    fn cat_of_takes_on_a_shared_stream_continues_its_cursor() {
        let s = count(0).share();
        let joined = cat(take(&s, 3), take(&s, 2));
        assert_eq!(joined.iter().collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn cat_of_takes_on_a_fresh_stream_restarts_it() {
        let s = count(10);
        let joined = cat(take(&s, 3), take(&s, 2));
        assert_eq!(joined.iter().collect::<Vec<_>>(), vec![10.0, 11.0, 12.0, 10.0, 11.0]);
        // and the description is replayable
        assert_eq!(joined.iter().count(), 5);
    }

    #[test]
    fn zip_length_follows_the_finite_second_input() {
        let z = zip(count(0), take(constant(1.0), 7));
        let pairs: Vec<_> = z.iter().collect();
        assert_eq!(pairs.len(), 7);
        assert_eq!(pairs[6], (6.0, 1.0));
    }

    #[test]
    fn zip_discards_the_first_input_when_the_second_ends() {
        let a = count(0).share();
        let z = zip(&a, take(constant(0.0), 2));
        assert_eq!(z.iter().count(), 2);
        // two pairs plus the third `a` value that was pulled before `b` reported completion
        assert_eq!(a.iter().next(), Some(3.0));
    }

    #[test]
    fn cycle_repeats_an_oscillator_window() {
        let k = 37;
        let looped = cycle(take(osc(1.0), k));
        let values = looped.first(k * 4 + 5);
        for (i, v) in values.iter().enumerate() {
            assert_eq!(*v, values[i % k], "index {i}");
        }
    }

    #[test]
    fn cycle_of_empty_stream_ends() {
        assert!(cycle(take(constant(1.0), 0)).iter().next().is_none());
    }

    #[test]
    fn osc_accumulates_phase_per_frequency_value() {
        let s = osc_at(Stream::fixed(vec![12_000.0, 12_000.0, 12_000.0]), 48_000);
        let v = s.first(10);
        assert_eq!(v.len(), 3, "osc ends with its frequency stream");
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 1.0).abs() < 1e-3);
        assert!(v[2].abs() < 1e-3);
    }

    #[test]
    fn arithmetic_lifts_constants() {
        assert_eq!(add(1.0, 2.0).first(3), vec![3.0; 3]);
        assert_eq!(mul(count(1), 0.5).first(3), vec![0.5, 1.0, 1.5]);
        assert_eq!(mul(count(0), take(constant(2.0), 2)).first(5), vec![0.0, 2.0]);
    }

    #[test]
    #[should_panic(expected = "add: input stream exhausted")]
    fn add_fails_fast_on_exhausted_input() {
        let s = add(take(constant(1.0), 2), 1.0);
        let _ = s.first(3);
    }

    #[test]
    fn map_and_count() {
        let s = map(count(3), |t: f64| t * 2.0);
        assert_eq!(s.first(3), vec![6.0, 8.0, 10.0]);
        let square = map(map(count(0), |t: f64| t / 48_000.0), |t: f64| -> f64 { if t % (1.0 / 30.0) > 1.0 / 60.0 { 1.0 } else { -1.0 } });
        assert!(square.first(1600).iter().all(|v| v.abs() == 1.0));
    }

    #[test]
    fn noise_is_reproducible_and_in_range() {
        let n = noise(7);
        let a = n.first(256);
        assert_eq!(a, n.first(256));
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn rand_is_one_shared_sequence() {
        let r = rand();
        assert!(r.is_shared());
        let mut a = r.iter();
        let mut b = rand().iter();
        let x = a.next().unwrap();
        let y = b.next().unwrap();
        assert!((-1.0..1.0).contains(&x) && (-1.0..1.0).contains(&y));
        // an expression using rand twice does not see the same value twice in a row
        let pair = zip(rand(), rand()).first(64);
        assert!(pair.iter().any(|(p, q)| p != q));
    }

    #[test]
    fn seconds_helper() {
        assert_eq!(seconds(0.5), 24_000);
        assert_eq!(seconds_at(1.0, 44_100), 44_100);
    }
}
