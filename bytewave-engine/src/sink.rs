//! The hardware/platform side of the scheduler: sample buffers and the [`AudioSink`] contract.
//!
//! A sink exposes a clock, creates buffers, and accepts buffers for playback at an absolute
//! start time. When a scheduled buffer finishes, the sink's owner delivers the completion by
//! calling [`Scheduler::on_ended`](crate::scheduler::Scheduler::on_ended) for that slot.

use bytewave_core::dsp::samples_to_seconds;
use thiserror::Error;

/// One of the two alternating buffer slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub const ALL: [SlotId; 2] = [SlotId::A, SlotId::B];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }

    #[inline]
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }
}

/// Identifies one scheduled playback of a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

#[derive(Debug, Error, PartialEq)]
pub enum SinkError {
    #[error("start time {start:.6}s is before the sink clock {now:.6}s")]
    InPast { start: f64, now: f64 },
    #[error("slot {0:?} is still playing")]
    SlotBusy(SlotId),
    #[error("buffer of {len} samples exceeds sink capacity {capacity}")]
    Capacity { len: usize, capacity: usize },
    #[error("buffer sample rate {got} Hz does not match sink rate {expected} Hz")]
    SampleRate { got: u32, expected: u32 },
}

/// Fixed-length mono buffer of samples in [-1, 1] with a known playback duration.
///
/// Storage is allocated once and refilled in place for the life of the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer {
    samples: Box<[f32]>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(length: usize, sample_rate: u32) -> Self {
        Self { samples: vec![0.0; length].into_boxed_slice(), sample_rate }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Playback duration in seconds: `len / sample_rate`.
    #[inline]
    pub fn duration(&self) -> f64 {
        samples_to_seconds(self.len(), self.sample_rate)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }
}

/// Platform audio output as seen by the scheduler.
pub trait AudioSink {
    /// Hardware clock in seconds.
    fn current_time(&self) -> f64;

    /// Allocate a buffer the sink can play. Called once per slot at scheduler construction.
    fn create_buffer(&mut self, length: usize, sample_rate: u32) -> SampleBuffer {
        SampleBuffer::new(length, sample_rate)
    }

    /// Queue `buffer` to start playing at `start_time` (seconds on the sink clock).
    ///
    /// The sink must not retain the borrow; it copies or otherwise consumes the samples
    /// before returning. Completion is reported later, through the scheduler's `on_ended`.
    fn schedule(&mut self, slot: SlotId, buffer: &SampleBuffer, start_time: f64) -> Result<PlaybackId, SinkError>;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn create_buffer(&mut self, length: usize, sample_rate: u32) -> SampleBuffer {
        (**self).create_buffer(length, sample_rate)
    }

    fn schedule(&mut self, slot: SlotId, buffer: &SampleBuffer, start_time: f64) -> Result<PlaybackId, SinkError> {
        (**self).schedule(slot, buffer, start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_duration_is_length_over_rate() {
        let b = SampleBuffer::new(1600, 48_000);
        assert_eq!(b.len(), 1600);
        assert_eq!(b.duration(), 1600.0 / 48_000.0);
        assert!(b.as_slice().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn slots_alternate() {
        assert_eq!(SlotId::A.other(), SlotId::B);
        assert_eq!(SlotId::B.other().index(), 0);
    }
}
