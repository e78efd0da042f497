//! Waveform side channel.
//!
//! Every refilled buffer is offered to an optional [`VisualSink`]. Rendering is best-effort:
//! errors and panics are counted by the scheduler and otherwise ignored, so a broken display
//! can never stall audio.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VisualError {
    #[error("visual consumer disconnected")]
    Disconnected,
    #[error("{0}")]
    Other(String),
}

/// Receives each refilled buffer. Must not block.
pub trait VisualSink {
    fn render(&mut self, samples: &[f32]) -> Result<(), VisualError>;
}

impl<F> VisualSink for F
where
    F: FnMut(&[f32]) -> Result<(), VisualError>,
{
    #[inline]
    fn render(&mut self, samples: &[f32]) -> Result<(), VisualError> {
        self(samples)
    }
}

/// Map samples in [-1, 1] to one grayscale byte each: `round((s + 1) / 2 * 255)`.
///
/// Writes `min(samples.len(), out.len())` bytes and returns that count.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn grayscale(samples: &[f32], out: &mut [u8]) -> usize {
    let n = samples.len().min(out.len());
    for (px, s) in out.iter_mut().zip(samples) {
        let level = ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * 255.0).round();
        *px = level as u8;
    }
    n
}

/// Largest absolute sample value (0 for an empty buffer).
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()))
}

/// Root mean square of the buffer (0 for an empty buffer).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    #[allow(clippy::cast_precision_loss)]
    let len = samples.len() as f32;
    (sum / len).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_levels() {
        let mut out = [0u8; 5];
        let n = grayscale(&[-1.0, 0.0, 1.0, 0.5, 7.0], &mut out);
        assert_eq!(n, 5);
        assert_eq!(out, [0, 128, 255, 191, 255]);
    }

    #[test]
    fn grayscale_stops_at_the_shorter_side() {
        let mut out = [9u8; 2];
        assert_eq!(grayscale(&[1.0; 4], &mut out), 2);
        assert_eq!(out, [255, 255]);
    }

    #[test]
    fn levels() {
        assert_eq!(peak(&[0.25, -0.75, 0.5]), 0.75);
        assert_eq!(peak(&[]), 0.0);
        assert_eq!(rms(&[0.5, -0.5]), 0.5);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = 0;
        let mut sink = |s: &[f32]| -> Result<(), VisualError> {
            seen += s.len();
            Ok(())
        };
        sink.render(&[0.0; 3]).unwrap();
        assert_eq!(seen, 3);
    }
}
