//! Signals and the atomically swappable slot that holds the active one.
//!
//! A [`Signal`] is what the scheduler plays: either a pure function of the logical sample
//! index (bytebeat style) or a [`Stream`] graph description. The [`SignalSlot`] is the only
//! piece of state shared between a control thread and the audio path; it is replaced as a
//! whole reference so the audio side never observes a half-built generator.
//!
//! Graphs the engine stops playing are handed back through a bounded channel and dropped by
//! the next [`SignalSlot::swap`] or [`SignalSlot::collect_retired`], so tearing down a large
//! stream graph runs on the control thread rather than inside a refill.

use core::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use bytewave_core::dsp::bytebeat_sample;
use bytewave_core::stream::{Stream, Traversal};
use tracing::debug;

use crate::bytebeat::{Expr, ParseError};

/// Pure generator: logical sample index → value. Must be re-evaluable at any `t`.
pub type PureFn = Arc<dyn Fn(u64) -> f64 + Send + Sync>;

/// How a pure function's value becomes a sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mapping {
    /// `modulo(value / 256, 1) * 2 - 1`
    Bytebeat,
    /// The value is already a sample.
    Direct,
}

impl Mapping {
    #[inline]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Mapping::Bytebeat => bytebeat_sample(value),
            Mapping::Direct => value,
        }
    }
}

/// A playable signal description.
#[derive(Clone)]
pub enum Signal {
    Function { f: PureFn, mapping: Mapping },
    Stream(Stream),
}

impl Signal {
    /// Pure function whose values are samples.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(u64) -> f64 + Send + Sync + 'static,
    {
        Signal::Function { f: Arc::new(f), mapping: Mapping::Direct }
    }

    /// Pure integer-style function passed through the bytebeat mapping.
    pub fn bytebeat_fn<F>(f: F) -> Self
    where
        F: Fn(u64) -> f64 + Send + Sync + 'static,
    {
        Signal::Function { f: Arc::new(f), mapping: Mapping::Bytebeat }
    }

    /// A parsed bytebeat expression in `t`.
    pub fn bytebeat(expr: Expr) -> Self {
        Self::bytebeat_fn(move |t| expr.eval(t as f64))
    }

    /// Parse `text` as a bytebeat expression.
    pub fn parse_bytebeat(text: &str) -> Result<Self, ParseError> {
        Expr::parse(text).map(Self::bytebeat)
    }

    pub fn stream(s: impl Into<Stream>) -> Self {
        Signal::Stream(s.into())
    }

    pub fn silence() -> Self {
        Self::function(|_| 0.0)
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::silence()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Function { mapping, .. } => f.debug_struct("Signal::Function").field("mapping", mapping).finish(),
            Signal::Stream(s) => f.debug_tuple("Signal::Stream").field(s).finish(),
        }
    }
}

impl From<Stream> for Signal {
    fn from(s: Stream) -> Self {
        Signal::Stream(s)
    }
}

/// Retired graphs waiting for the control side. When full, the engine drops in place.
const RETIRED_CAPACITY: usize = 16;

/// A signal the engine has stopped playing, with its live traversal if it had one.
/// Only ever dropped.
#[allow(dead_code)]
pub(crate) struct Retired {
    pub(crate) signal: Arc<Signal>,
    pub(crate) traversal: Option<Traversal>,
}

/// Cloneable handle to the active signal.
///
/// `swap` may be called from any thread at any time; readers pick up the new signal the
/// next time they sample the slot (for the scheduler, at the next refill).
#[derive(Clone)]
pub struct SignalSlot {
    current: Arc<ArcSwap<Signal>>,
    retired_tx: SyncSender<Retired>,
    retired_rx: Arc<Mutex<Receiver<Retired>>>,
}

impl SignalSlot {
    pub fn new(signal: Signal) -> Self {
        let (retired_tx, retired_rx) = mpsc::sync_channel(RETIRED_CAPACITY);
        Self {
            current: Arc::new(ArcSwap::from_pointee(signal)),
            retired_tx,
            retired_rx: Arc::new(Mutex::new(retired_rx)),
        }
    }

    /// Replace the active signal as one reference, then release graphs retired so far.
    pub fn swap(&self, signal: Signal) {
        debug!(?signal, "swapping active signal");
        self.current.store(Arc::new(signal));
        self.collect_retired();
    }

    /// Drop the graphs the engine has retired since the last call. Returns how many.
    /// Never blocks: if another thread is collecting, this returns 0.
    pub fn collect_retired(&self) -> usize {
        let Ok(rx) = self.retired_rx.try_lock() else { return 0 };
        rx.try_iter().count()
    }

    /// Audio side: hand a replaced graph to the control side without blocking.
    pub(crate) fn retire(&self, retired: Retired) {
        // a full or closed channel hands the value back and it drops here
        let _ = self.retired_tx.try_send(retired);
    }

    /// Snapshot of the active signal.
    #[inline]
    pub fn load(&self) -> Arc<Signal> {
        self.current.load_full()
    }
}

impl Default for SignalSlot {
    fn default() -> Self {
        Self::new(Signal::silence())
    }
}

impl fmt::Debug for SignalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSlot").field("current", &*self.current.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytewave_core::ops::constant;

    #[test]
    fn swap_replaces_the_whole_reference() {
        let slot = SignalSlot::default();
        let before = slot.load();
        let handle = slot.clone();
        handle.swap(Signal::stream(constant(0.5)));
        let after = slot.load();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(matches!(*after, Signal::Stream(_)));
        // the old snapshot is still intact for whoever holds it
        assert!(matches!(*before, Signal::Function { mapping: Mapping::Direct, .. }));
    }

    #[test]
    fn bytebeat_signals_parse() {
        let sig = Signal::parse_bytebeat("t*(t>>5|t>>8)").unwrap();
        match sig {
            Signal::Function { f, mapping } => {
                assert_eq!(mapping, Mapping::Bytebeat);
                assert_eq!(f(64), 64.0 * f64::from((64 >> 5) | (64 >> 8)));
            }
            Signal::Stream(_) => panic!("expected a function signal"),
        }
        assert!(Signal::parse_bytebeat("t +").is_err());
    }

    #[test]
    fn retired_graphs_drop_on_collect() {
        let slot = SignalSlot::default();
        let marker = Arc::new(());
        let held = Arc::clone(&marker);
        let signal = Signal::function(move |_| {
            let _ = &held;
            0.0
        });
        slot.retire(Retired { signal: Arc::new(signal), traversal: None });
        assert_eq!(Arc::strong_count(&marker), 2);
        assert_eq!(slot.clone().collect_retired(), 1);
        assert_eq!(Arc::strong_count(&marker), 1);
        assert_eq!(slot.collect_retired(), 0);
    }

    #[test]
    fn a_full_graveyard_drops_in_place() {
        let slot = SignalSlot::default();
        for _ in 0..RETIRED_CAPACITY + 4 {
            slot.retire(Retired { signal: slot.load(), traversal: Some(Box::new(std::iter::empty())) });
        }
        assert_eq!(slot.collect_retired(), RETIRED_CAPACITY);
    }

    #[test]
    fn swaps_from_another_thread_are_visible() {
        let slot = SignalSlot::default();
        let ui = slot.clone();
        std::thread::spawn(move || ui.swap(Signal::bytebeat_fn(|t| t as f64)))
            .join()
            .unwrap();
        assert!(matches!(*slot.load(), Signal::Function { mapping: Mapping::Bytebeat, .. }));
    }
}
