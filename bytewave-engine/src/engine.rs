//! Pull engine: turns the active [`Signal`] into samples on a never-reset logical timeline.
//!
//! The engine owns the read side of a [`SignalSlot`], the logical sample counter `t`, and the
//! live traversal of the active signal. It is the single cursor into the signal; the
//! scheduler drives it one quantum at a time through [`Engine::fill`], simpler callers one
//! sample at a time through [`Engine::next`].
//!
//! Faults never escape: a panicking or non-finite sample becomes silence and is counted in
//! the returned [`FillReport`]. Panics caught this way skip the process panic hook, so a
//! faulting generator costs one log line per quantum rather than a stderr message per sample.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};

use bytewave_core::dsp::clamp_unit;
use bytewave_core::stream::Traversal;
use tracing::{info, warn};

use crate::signal::{Mapping, PureFn, Retired, Signal, SignalSlot};

thread_local! {
    static CONTAINING: Cell<u32> = const { Cell::new(0) };
    static SUPPRESSED: Cell<u64> = const { Cell::new(0) };
}

static QUIET_HOOK: Once = Once::new();

/// Chain a panic hook that stays silent for panics raised under [`contained`] and forwards
/// every other panic to the hook that was installed before.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CONTAINING.with(Cell::get) > 0 {
                SUPPRESSED.with(|n| n.set(n.get() + 1));
            } else {
                previous(info);
            }
        }));
    });
}

/// Run generator or visual code, turning a panic into `Err` without reporting it.
pub(crate) fn contained<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    CONTAINING.with(|c| c.set(c.get() + 1));
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    CONTAINING.with(|c| c.set(c.get() - 1));
    outcome
}

/// Panics silenced on this thread so far.
#[cfg(test)]
pub(crate) fn suppressed_panics() -> u64 {
    SUPPRESSED.with(Cell::get)
}

/// Live state for the active signal.
enum Voice {
    Function { f: PureFn, mapping: Mapping },
    Stream(Traversal),
    /// Finite stream ran out; silence until the next swap.
    Finished,
    /// Stream traversal panicked; silence until the next swap.
    Retired,
}

impl Voice {
    fn instantiate(signal: &Signal) -> Self {
        match signal {
            Signal::Function { f, mapping } => Voice::Function { f: Arc::clone(f), mapping: *mapping },
            Signal::Stream(s) => Voice::Stream(s.iter()),
        }
    }

    fn into_traversal(self) -> Option<Traversal> {
        match self {
            Voice::Stream(it) => Some(it),
            _ => None,
        }
    }
}

/// What happened while producing one quantum.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Samples replaced by silence because the generator panicked or went non-finite.
    pub faults: usize,
    /// Logical time of the first faulty sample.
    pub first_fault_at: Option<u64>,
    /// Samples padded with silence after a finite stream ended (or after a retired stream).
    pub silent: usize,
    /// A new signal was picked up at the start of this quantum.
    pub swapped: bool,
}

impl FillReport {
    fn fault(&mut self, t: u64) {
        self.faults += 1;
        self.first_fault_at.get_or_insert(t);
    }
}

pub struct Engine {
    slot: SignalSlot,
    active: Arc<Signal>,
    voice: Voice,
    t: u64,
    sample_rate: u32,
}

impl Engine {
    /// Build an engine reading from `slot`; the current signal is instantiated immediately.
    ///
    /// The first engine in the process chains the quiet panic hook described above.
    pub fn new(slot: SignalSlot, sample_rate: u32) -> Self {
        install_quiet_hook();
        let active = slot.load();
        let voice = Voice::instantiate(&active);
        Self { slot, active, voice, t: 0, sample_rate }
    }

    /// The slot this engine reads; clone it to hand a swap handle to a control thread.
    #[inline]
    pub fn slot(&self) -> &SignalSlot {
        &self.slot
    }

    /// Logical sample counter: the `t` of the next sample to be produced.
    #[inline]
    pub fn time(&self) -> u64 {
        self.t
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Produce one sample. A swap is picked up before every call.
    pub fn next(&mut self) -> f32 {
        let mut report = FillReport { swapped: self.sync(), ..FillReport::default() };
        let s = self.pull(&mut report);
        if let Some(t) = report.first_fault_at {
            warn!(t, "signal fault; substituting silence");
        }
        s
    }

    /// Fill `out` with the next `out.len()` samples. The slot is sampled once, up front, so a
    /// swap never lands in the middle of a quantum.
    pub fn fill(&mut self, out: &mut [f32]) -> FillReport {
        let mut report = FillReport { swapped: self.sync(), ..FillReport::default() };
        for s in out.iter_mut() {
            *s = self.pull(&mut report);
        }
        report
    }

    /// Adopt the slot's signal if it changed. Returns whether it did. The replaced signal
    /// and traversal go back to the slot to be dropped on the control side.
    fn sync(&mut self) -> bool {
        let latest = self.slot.load();
        if Arc::ptr_eq(&latest, &self.active) {
            return false;
        }
        let voice = std::mem::replace(&mut self.voice, Voice::instantiate(&latest));
        let signal = std::mem::replace(&mut self.active, latest);
        self.slot.retire(Retired { signal, traversal: voice.into_traversal() });
        true
    }

    fn pull(&mut self, report: &mut FillReport) -> f32 {
        let t = self.t;
        self.t += 1;

        let value = match &mut self.voice {
            Voice::Function { f, mapping } => {
                let mapping = *mapping;
                match contained(|| f(t)) {
                    Ok(v) if v.is_finite() => Some(mapping.apply(v)),
                    _ => None,
                }
            }
            Voice::Stream(it) => match contained(|| it.next()) {
                Ok(Some(v)) if v.is_finite() => Some(v),
                Ok(Some(_)) => None,
                Ok(None) => {
                    info!(t, "stream signal finished; playing silence");
                    self.voice = Voice::Finished;
                    report.silent += 1;
                    return 0.0;
                }
                Err(_) => {
                    warn!(t, "stream signal panicked; retiring it until the next swap");
                    self.voice = Voice::Retired;
                    report.fault(t);
                    return 0.0;
                }
            },
            Voice::Finished | Voice::Retired => {
                report.silent += 1;
                return 0.0;
            }
        };

        match value {
            #[allow(clippy::cast_possible_truncation)]
            Some(v) => clamp_unit(v) as f32,
            None => {
                report.fault(t);
                0.0
            }
        }
    }
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("t", &self.t)
            .field("sample_rate", &self.sample_rate)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytewave_core::dsp::bytebeat_sample;
    use bytewave_core::ops::{add, constant, take};
    use bytewave_core::stream::Stream;

    fn engine_with(signal: Signal) -> Engine {
        Engine::new(SignalSlot::new(signal), 48_000)
    }

    #[test]
    fn pure_function_matches_direct_evaluation() {
        let mut e = engine_with(Signal::bytebeat_fn(|t| (t * (t >> 5 | t >> 8)) as f64));
        let mut buf = vec![0.0; 512];
        e.fill(&mut buf);
        for (t, s) in buf.iter().enumerate() {
            let t = t as u64;
            assert_eq!(*s, bytebeat_sample((t * (t >> 5 | t >> 8)) as f64) as f32);
        }
        assert_eq!(e.time(), 512);
    }

    #[test]
    fn non_finite_values_become_counted_silence() {
        let mut e = engine_with(Signal::function(|t| if t % 4 == 1 { f64::NAN } else { 0.5 }));
        let mut buf = vec![1.0; 8];
        let report = e.fill(&mut buf);
        assert_eq!(buf, vec![0.5, 0.0, 0.5, 0.5, 0.5, 0.0, 0.5, 0.5]);
        assert_eq!(report.faults, 2);
        assert_eq!(report.first_fault_at, Some(1));
    }

    #[test]
    fn panicking_function_is_contained_per_sample() {
        let mut e = engine_with(Signal::function(|t| {
            assert!(t != 2, "boom");
            0.25
        }));
        let mut buf = vec![1.0; 4];
        let report = e.fill(&mut buf);
        assert_eq!(buf, vec![0.25, 0.25, 0.0, 0.25]);
        assert_eq!(report.faults, 1);
    }

    #[test]
    fn contained_panics_skip_the_panic_hook() {
        let mut e = engine_with(Signal::function(|t| {
            assert!(t % 2 == 0, "odd sample");
            0.5
        }));
        let before = suppressed_panics();
        let report = e.fill(&mut [0.0; 10]);
        assert_eq!(report.faults, 5);
        assert_eq!(suppressed_panics() - before, 5);
    }

    #[test]
    fn replaced_graphs_are_released_by_the_control_side() {
        let marker = Arc::new(());
        let held = Arc::clone(&marker);
        let slot = SignalSlot::new(Signal::stream(Stream::deferred(move || {
            let _ = &held;
            std::iter::repeat(0.5)
        })));
        let mut e = Engine::new(slot.clone(), 48_000);
        let mut buf = vec![0.0; 4];
        e.fill(&mut buf);
        slot.swap(Signal::silence());
        assert_eq!(Arc::strong_count(&marker), 2);
        assert!(e.fill(&mut buf).swapped);
        // the refill only queued the old graph
        assert_eq!(Arc::strong_count(&marker), 2);
        assert_eq!(slot.collect_retired(), 1);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn exhausted_add_retires_the_stream() {
        let mut e = engine_with(Signal::stream(add(take(constant(0.1), 2), 0.1)));
        let mut buf = vec![1.0; 5];
        let report = e.fill(&mut buf);
        assert_eq!(&buf[..2], &[0.2, 0.2]);
        assert_eq!(&buf[2..], &[0.0, 0.0, 0.0]);
        assert_eq!(report.faults, 1);
        assert_eq!(report.silent, 2);
    }

    #[test]
    fn finite_streams_pad_with_silence() {
        let mut e = engine_with(Signal::stream(Stream::fixed(vec![0.5, -0.5])));
        let mut buf = vec![1.0; 4];
        let report = e.fill(&mut buf);
        assert_eq!(buf, vec![0.5, -0.5, 0.0, 0.0]);
        assert_eq!(report.silent, 2);
        assert_eq!(report.faults, 0);
    }

    #[test]
    fn stream_values_are_clamped_into_range() {
        let mut e = engine_with(Signal::stream(constant(3.0)));
        assert_eq!(e.next(), 1.0);
    }

    #[test]
    fn swaps_land_on_quantum_boundaries() {
        let slot = SignalSlot::new(Signal::function(|_| 0.25));
        let mut e = Engine::new(slot.clone(), 48_000);
        let mut buf = vec![0.0; 4];
        assert!(!e.fill(&mut buf).swapped);
        slot.swap(Signal::function(|_| -0.25));
        let report = e.fill(&mut buf);
        assert!(report.swapped);
        assert_eq!(buf, vec![-0.25; 4]);
        // the logical clock keeps running across swaps
        assert_eq!(e.time(), 8);
    }

    #[test]
    fn next_pulls_one_sample_at_a_time() {
        let mut e = engine_with(Signal::bytebeat_fn(|t| t as f64));
        assert_eq!(e.next(), -1.0);
        assert_eq!(e.next(), bytebeat_sample(1.0) as f32);
        assert_eq!(e.time(), 2);
    }
}
