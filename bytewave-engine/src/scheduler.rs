//! Gapless dual-buffer scheduler.
//!
//! Two buffer slots alternate. Each is pre-filled, scheduled at the cursor, and, when the sink
//! reports it finished, refilled in place and scheduled again at the cursor. The cursor always
//! advances by exactly one buffer duration from the previously scheduled start, never from
//! "now", so callback latency cannot accumulate into drift. While one slot's completion handler
//! refills, the other slot is still playing, which hides the refill latency.
//!
//! The cursor is kept as a whole frame count on the sink clock. Anchors (start and underrun
//! recovery) round up to the next sample boundary, so every buffer start lands exactly on a
//! frame and consecutive buffers tile the timeline without rounding gaps.
//!
//! Slot lifecycle: `Idle` (pre-fill) → `Scheduled` → (sink plays, then `on_ended`) → refill →
//! `Scheduled` …

use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{contained, Engine};
use crate::signal::SignalSlot;
use crate::sink::{AudioSink, PlaybackId, SampleBuffer, SinkError, SlotId};
use crate::visual::VisualSink;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sample rate must be positive")]
    ZeroSampleRate,
    #[error("buffer length must be positive")]
    ZeroBufferLength,
    #[error("scheduling lead must be finite and non-negative, got {0}")]
    InvalidLead(f64),
}

#[derive(Debug, Error, PartialEq)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("slot {0:?} is not scheduled")]
    NotScheduled(SlotId),
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("sink created a {got}-sample buffer, expected {expected}")]
    BufferLength { got: usize, expected: usize },
}

/// Scheduler configuration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    pub sample_rate: u32,
    /// Quantum: samples per buffer.
    pub buffer_len: usize,
    /// Seconds between "now" and the first scheduled buffer (and after an underrun).
    pub lead: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { sample_rate: 48_000, buffer_len: 1600, lead: 0.1 }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.buffer_len == 0 {
            return Err(ConfigError::ZeroBufferLength);
        }
        if !self.lead.is_finite() || self.lead < 0.0 {
            return Err(ConfigError::InvalidLead(self.lead));
        }
        Ok(())
    }
}

/// Running counters, for the diagnostic collaborator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub buffers_scheduled: u64,
    pub refills: u64,
    pub faults: u64,
    pub underruns: u64,
    pub swaps: u64,
    pub visual_errors: u64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum SlotState {
    Idle,
    Scheduled { start: f64, playback: PlaybackId },
}

pub struct Scheduler<S: AudioSink> {
    sink: S,
    engine: Engine,
    config: SchedulerConfig,
    buffers: [SampleBuffer; 2],
    states: [SlotState; 2],
    /// Start frame of the next buffer.
    cursor: u64,
    started: bool,
    last_refilled: Option<SlotId>,
    stats: SchedulerStats,
    visual: Option<Box<dyn VisualSink + Send>>,
}

impl<S: AudioSink> Scheduler<S> {
    /// Create the scheduler and its two buffers (through the sink's buffer-creation call).
    pub fn new(mut sink: S, slot: SignalSlot, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let buffers = [
            sink.create_buffer(config.buffer_len, config.sample_rate),
            sink.create_buffer(config.buffer_len, config.sample_rate),
        ];
        for b in &buffers {
            if b.len() != config.buffer_len {
                return Err(SchedulerError::BufferLength { got: b.len(), expected: config.buffer_len });
            }
        }
        Ok(Self {
            sink,
            engine: Engine::new(slot, config.sample_rate),
            config,
            buffers,
            states: [SlotState::Idle; 2],
            cursor: 0,
            started: false,
            last_refilled: None,
            stats: SchedulerStats::default(),
            visual: None,
        })
    }

    /// Attach the waveform side channel, invoked once per refilled buffer.
    pub fn with_visual(mut self, visual: impl VisualSink + Send + 'static) -> Self {
        self.visual = Some(Box::new(visual));
        self
    }

    /// Pre-fill both buffers, anchor the cursor at the first frame at or after `now + lead`,
    /// and schedule A then B.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted);
        }
        for slot in SlotId::ALL {
            self.fill(slot);
        }
        self.cursor = self.frame_at_or_after(self.sink.current_time() + self.config.lead);
        self.started = true;
        debug!(cursor = self.cursor(), quantum = self.config.buffer_len, "scheduler started");
        for slot in SlotId::ALL {
            self.schedule(slot)?;
        }
        Ok(())
    }

    /// Completion handler for `slot`: refill in place, publish to the visual side channel,
    /// check for underrun, and schedule at the cursor. Runs to completion without suspending.
    pub fn on_ended(&mut self, slot: SlotId) -> Result<(), SchedulerError> {
        if !matches!(self.states[slot.index()], SlotState::Scheduled { .. }) {
            return Err(SchedulerError::NotScheduled(slot));
        }
        self.states[slot.index()] = SlotState::Idle;
        self.fill(slot);
        self.stats.refills += 1;
        self.render_visual(slot);
        self.check_underrun();
        self.schedule(slot)
    }

    /// Absolute time at which the next buffer will start.
    #[inline]
    pub fn cursor(&self) -> f64 {
        self.seconds(self.cursor)
    }

    #[allow(clippy::cast_precision_loss)]
    fn seconds(&self, frames: u64) -> f64 {
        frames as f64 / f64::from(self.config.sample_rate)
    }

    // Absorbs representation error so that a time already on a frame does not round up.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frame_at_or_after(&self, t: f64) -> u64 {
        (t * f64::from(self.config.sample_rate) - 1e-6).ceil().max(0.0) as u64
    }

    /// Duration of one quantum in seconds.
    #[inline]
    pub fn buffer_duration(&self) -> f64 {
        self.buffers[0].duration()
    }

    /// Logical sample counter of the next sample to be generated.
    #[inline]
    pub fn sample_clock(&self) -> u64 {
        self.engine.time()
    }

    #[inline]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Handle for swapping the active signal from another thread.
    #[inline]
    pub fn signal_slot(&self) -> &SignalSlot {
        self.engine.slot()
    }

    /// Start time of the playback currently scheduled in `slot`, if any.
    pub fn scheduled_start(&self, slot: SlotId) -> Option<f64> {
        match self.states[slot.index()] {
            SlotState::Scheduled { start, .. } => Some(start),
            SlotState::Idle => None,
        }
    }

    /// Sink identifier of the playback currently scheduled in `slot`, if any.
    pub fn playback(&self, slot: SlotId) -> Option<PlaybackId> {
        match self.states[slot.index()] {
            SlotState::Scheduled { playback, .. } => Some(playback),
            SlotState::Idle => None,
        }
    }

    /// Samples currently held by `slot`.
    #[inline]
    pub fn buffer(&self, slot: SlotId) -> &[f32] {
        self.buffers[slot.index()].as_slice()
    }

    /// The most recently refilled buffer, for pull-style visualisation.
    pub fn latest_buffer(&self) -> Option<&[f32]> {
        self.last_refilled.map(|slot| self.buffer(slot))
    }

    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn fill(&mut self, slot: SlotId) {
        let report = self.engine.fill(self.buffers[slot.index()].as_mut_slice());
        if report.swapped {
            self.stats.swaps += 1;
            debug!(?slot, t = self.engine.time(), "new signal picked up at quantum boundary");
        }
        if report.faults > 0 {
            self.stats.faults += report.faults as u64;
            warn!(?slot, faults = report.faults, first_at = report.first_fault_at, "generator faults replaced by silence");
        }
        self.last_refilled = Some(slot);
    }

    fn render_visual(&mut self, slot: SlotId) {
        let Some(visual) = self.visual.as_mut() else { return };
        let samples = self.buffers[slot.index()].as_slice();
        let outcome = contained(|| visual.render(samples));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.visual_errors += 1;
                debug!(error = %e, "visual sink failed");
            }
            Err(_) => {
                self.stats.visual_errors += 1;
                warn!("visual sink panicked");
            }
        }
    }

    fn check_underrun(&mut self) {
        let now = self.sink.current_time();
        let cursor = self.cursor();
        if cursor < now {
            let late = now - cursor;
            self.cursor = self.frame_at_or_after(now + self.config.lead);
            self.stats.underruns += 1;
            warn!(late_ms = late * 1e3, cursor = self.cursor(), "underrun: refill fell behind playback, re-anchoring");
        }
    }

    fn schedule(&mut self, slot: SlotId) -> Result<(), SchedulerError> {
        let start = self.cursor();
        let buffer = &self.buffers[slot.index()];
        let playback = self.sink.schedule(slot, buffer, start)?;
        self.states[slot.index()] = SlotState::Scheduled { start, playback };
        self.cursor += buffer.len() as u64;
        self.stats.buffers_scheduled += 1;
        Ok(())
    }
}

impl<S: AudioSink> core::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("cursor", &self.cursor())
            .field("states", &self.states)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
