//! bytewave engine: signals, the atomic signal slot, and the gapless dual-buffer scheduler.
//!
//! Crate layout:
//! - [`signal`]    : `Signal` (pure function or stream graph) and the swappable `SignalSlot`
//! - [`engine`]    : pull engine over the never-reset logical sample clock
//! - [`scheduler`] : dual-buffer refill/schedule loop with underrun recovery
//! - [`sink`]      : `AudioSink` contract and `SampleBuffer`
//! - [`timeline`]  : frame-counting software sink, driven by pull-style hosts
//! - [`bytebeat`]  : expression language for live-coded signals
//! - [`patches`]   : named demo patches
//! - [`visual`]    : waveform side channel
//! - `realtime`    : `cpal` output glue (feature `realtime`)
//!
//! Refills never allocate except when a newly swapped stream graph is instantiated, once, at
//! the first refill after the swap.

pub mod bytebeat;
pub mod engine;
pub mod patches;
pub mod scheduler;
pub mod signal;
pub mod sink;
pub mod timeline;
pub mod visual;

#[cfg(feature = "realtime")]
pub mod realtime;

pub use bytebeat::{Expr, ParseError};
pub use engine::{Engine, FillReport};
pub use patches::Patch;
pub use scheduler::{ConfigError, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats};
pub use signal::{Signal, SignalSlot};
pub use sink::{AudioSink, PlaybackId, SampleBuffer, SinkError, SlotId};
pub use timeline::TimelineSink;
pub use visual::{VisualError, VisualSink};
