//! Software [`AudioSink`]: a frame-counting clock that plays scheduled buffers sample by sample.
//!
//! The sink's clock is the number of frames ticked so far. Each [`TimelineSink::tick`] mixes
//! whatever is scheduled at the current frame and reports which slots just played their last
//! sample. Hosts that pull audio (a cpal callback, the FFI render call, tests) drive it through
//! [`Scheduler::render_interleaved`], which delivers those completions back to the scheduler
//! before the next frame is produced.

use tracing::trace;

use crate::scheduler::{Scheduler, SchedulerError};
use crate::sink::{AudioSink, PlaybackId, SampleBuffer, SinkError, SlotId};

/// Output of one clock tick.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub sample: f32,
    /// `ended[slot.index()]` is set when that slot's buffer finished on this frame.
    pub ended: [bool; 2],
}

#[derive(Debug, Default)]
struct Lane {
    storage: Box<[f32]>,
    len: usize,
    start: u64,
    active: bool,
}

#[derive(Debug)]
pub struct TimelineSink {
    sample_rate: u32,
    frame: u64,
    lanes: [Lane; 2],
    next_id: u64,
}

impl TimelineSink {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_capacity(sample_rate, 0)
    }

    /// Pre-size both lanes so `schedule` never allocates.
    pub fn with_capacity(sample_rate: u32, capacity: usize) -> Self {
        let lane = || Lane { storage: vec![0.0; capacity].into_boxed_slice(), ..Lane::default() };
        Self { sample_rate: sample_rate.max(1), frame: 0, lanes: [lane(), lane()], next_id: 0 }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames ticked so far.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Whether `slot` holds a buffer that has not finished playing.
    #[inline]
    pub fn is_busy(&self, slot: SlotId) -> bool {
        self.lanes[slot.index()].active
    }

    /// Advance the clock by one frame.
    pub fn tick(&mut self) -> Frame {
        let mut out = Frame::default();
        for (i, lane) in self.lanes.iter_mut().enumerate() {
            if !lane.active || self.frame < lane.start {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            let idx = (self.frame - lane.start) as usize;
            if idx < lane.len {
                out.sample += lane.storage[idx];
            }
            if idx + 1 >= lane.len {
                lane.active = false;
                out.ended[i] = true;
            }
        }
        self.frame += 1;
        out
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn to_frame(&self, seconds: f64) -> u64 {
        (seconds * f64::from(self.sample_rate)).round().max(0.0) as u64
    }
}

impl AudioSink for TimelineSink {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.frame as f64 / f64::from(self.sample_rate)
    }

    fn create_buffer(&mut self, length: usize, sample_rate: u32) -> SampleBuffer {
        for lane in &mut self.lanes {
            if lane.storage.len() < length {
                lane.storage = vec![0.0; length].into_boxed_slice();
            }
        }
        SampleBuffer::new(length, sample_rate)
    }

    fn schedule(&mut self, slot: SlotId, buffer: &SampleBuffer, start_time: f64) -> Result<PlaybackId, SinkError> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(SinkError::SampleRate { got: buffer.sample_rate(), expected: self.sample_rate });
        }
        let now = self.current_time();
        let start = self.to_frame(start_time);
        if start_time < now || start < self.frame {
            return Err(SinkError::InPast { start: start_time, now });
        }
        let lane = &mut self.lanes[slot.index()];
        if lane.active {
            return Err(SinkError::SlotBusy(slot));
        }
        if buffer.len() > lane.storage.len() {
            return Err(SinkError::Capacity { len: buffer.len(), capacity: lane.storage.len() });
        }
        lane.storage[..buffer.len()].copy_from_slice(buffer.as_slice());
        lane.len = buffer.len();
        lane.start = start;
        lane.active = true;
        self.next_id += 1;
        trace!(?slot, start, len = lane.len, "buffer queued");
        Ok(PlaybackId(self.next_id))
    }
}

impl Scheduler<TimelineSink> {
    /// Render `out.len() / channels` frames into an interleaved buffer, duplicating the mono
    /// signal to every channel through `map`. Completed slots are refilled and rescheduled
    /// between frames. Returns the number of frames written.
    pub fn render_interleaved<T: Copy>(
        &mut self,
        out: &mut [T],
        channels: usize,
        mut map: impl FnMut(f32) -> T,
    ) -> Result<usize, SchedulerError> {
        let channels = channels.max(1);
        let mut frames = 0;
        for frame in out.chunks_exact_mut(channels) {
            let tick = self.sink_mut().tick();
            frame.fill(map(tick.sample));
            for slot in SlotId::ALL {
                if tick.ended[slot.index()] {
                    self.on_ended(slot)?;
                }
            }
            frames += 1;
        }
        Ok(frames)
    }

    /// Mono convenience over [`render_interleaved`](Self::render_interleaved).
    pub fn render(&mut self, out: &mut [f32]) -> Result<usize, SchedulerError> {
        self.render_interleaved(out, 1, |s| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use crate::signal::{Signal, SignalSlot};
    use bytewave_core::dsp::bytebeat_sample;

    fn small(signal: Signal) -> Scheduler<TimelineSink> {
        let config = SchedulerConfig { sample_rate: 8, buffer_len: 4, lead: 0.5 };
        Scheduler::new(TimelineSink::new(8), SignalSlot::new(signal), config).unwrap()
    }

    #[test]
    fn playback_is_the_signal_delayed_by_the_lead() {
        let mut s = small(Signal::function(|t| t as f64 / 100.0));
        s.start().unwrap();
        let mut out = vec![1.0_f32; 4 + 40];
        assert_eq!(s.render(&mut out).unwrap(), 44);
        assert_eq!(&out[..4], &[0.0; 4]);
        for (t, v) in out[4..].iter().enumerate() {
            assert_eq!(*v, (t as f64 / 100.0) as f32, "t={t}");
        }
        assert_eq!(s.stats().underruns, 0);
        assert_eq!(s.stats().refills, 10);
    }

    #[test]
    fn default_quantum_plays_gapless_in_stereo() {
        let slot = SignalSlot::new(Signal::bytebeat_fn(|t| t as f64));
        let mut s = Scheduler::new(TimelineSink::new(48_000), slot, SchedulerConfig::default()).unwrap();
        s.start().unwrap();
        let lead = 4800;
        let frames = lead + 5 * 1600;
        let mut out = vec![0.0_f32; frames * 2];
        assert_eq!(s.render_interleaved(&mut out, 2, |v| v).unwrap(), frames);
        for (i, pair) in out.chunks_exact(2).enumerate().skip(lead) {
            let t = (i - lead) as f64;
            assert_eq!(pair[0], bytebeat_sample(t) as f32, "frame {i}");
            assert_eq!(pair[0], pair[1]);
        }
        assert_eq!(s.stats().underruns, 0);
    }

    #[test]
    fn lead_off_the_sample_grid_still_plays_gapless() {
        // 0.1 s at 11025 Hz is 1102.5 frames; playback starts on the next whole frame
        let slot = SignalSlot::new(Signal::function(|t| (t % 1000) as f64 / 1000.0));
        let config = SchedulerConfig { sample_rate: 11_025, ..SchedulerConfig::default() };
        let mut s = Scheduler::new(TimelineSink::new(11_025), slot, config).unwrap();
        s.start().unwrap();
        let lead = 1103;
        let mut out = vec![1.0_f32; lead + 48 * 1600];
        s.render(&mut out).unwrap();
        assert!(out[..lead].iter().all(|v| *v == 0.0));
        for (i, v) in out.iter().enumerate().skip(lead) {
            let t = (i - lead) % 1000;
            assert_eq!(*v, (t as f64 / 1000.0) as f32, "frame {i}");
        }
        assert_eq!(s.stats().underruns, 0);
        assert_eq!(s.stats().refills, 48);
    }

    #[test]
    fn frames_are_silent_before_start() {
        let mut s = small(Signal::function(|_| 0.5));
        let mut out = [1.0_f32; 6];
        s.render(&mut out).unwrap();
        assert_eq!(out, [0.0; 6]);
        assert_eq!(s.sink().frame(), 6);
    }

    #[test]
    fn sink_rejects_bad_requests() {
        let mut sink = TimelineSink::with_capacity(8, 4);
        let buf = SampleBuffer::new(4, 8);
        for _ in 0..8 {
            sink.tick();
        }
        assert!(matches!(sink.schedule(SlotId::A, &buf, 0.5), Err(SinkError::InPast { .. })));
        assert_eq!(sink.schedule(SlotId::A, &buf, 1.0), Ok(PlaybackId(1)));
        assert_eq!(sink.schedule(SlotId::A, &buf, 2.0), Err(SinkError::SlotBusy(SlotId::A)));
        assert_eq!(
            sink.schedule(SlotId::B, &SampleBuffer::new(4, 16), 2.0),
            Err(SinkError::SampleRate { got: 16, expected: 8 })
        );
        assert_eq!(
            sink.schedule(SlotId::B, &SampleBuffer::new(5, 8), 2.0),
            Err(SinkError::Capacity { len: 5, capacity: 4 })
        );
    }

    #[test]
    fn tick_reports_the_last_sample_of_a_buffer() {
        let mut sink = TimelineSink::with_capacity(8, 2);
        let mut buf = SampleBuffer::new(2, 8);
        buf.as_mut_slice().copy_from_slice(&[0.25, -0.25]);
        sink.schedule(SlotId::B, &buf, 0.125).unwrap();
        assert_eq!(sink.tick(), Frame { sample: 0.0, ended: [false; 2] });
        assert_eq!(sink.tick(), Frame { sample: 0.25, ended: [false; 2] });
        assert_eq!(sink.tick(), Frame { sample: -0.25, ended: [false, true] });
        assert!(!sink.is_busy(SlotId::B));
        assert_eq!(sink.current_time(), 3.0 / 8.0);
    }
}
