//! Named demo patches: small stream graphs and bytebeat functions ready to swap into a slot.
//!
//! Patches are descriptions; building one allocates the graph but does not start it. The engine
//! instantiates the traversal at the first refill after the swap.

use core::fmt;
use core::str::FromStr;

use bytewave_core::dsp::modulo;
use bytewave_core::ops::{add, cat, constant, count, cycle, map, mul, osc_at, rand, seconds_at, take};
use bytewave_core::stream::Stream;
use thiserror::Error;

use crate::signal::Signal;

/// Built-in patches, selectable by name from the CLI (`:drone`) and the C ABI.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Patch {
    /// Bytebeat `t`: a 187.5 Hz sawtooth at 48 kHz.
    Ramp,
    /// 120.1 Hz sine with a little noise on top.
    Drone,
    /// Sine swept ±120 Hz around 240 Hz every ten seconds, with slowly swelling noise.
    Siren,
    /// Noise gated by a looping 1 Hz / 4 Hz / silence envelope, half a second each.
    Gate,
    /// 30 Hz square wave.
    Pulse,
}

impl Patch {
    pub const ALL: [Patch; 5] = [Patch::Ramp, Patch::Drone, Patch::Siren, Patch::Gate, Patch::Pulse];

    pub fn name(self) -> &'static str {
        match self {
            Patch::Ramp => "ramp",
            Patch::Drone => "drone",
            Patch::Siren => "siren",
            Patch::Gate => "gate",
            Patch::Pulse => "pulse",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_name(name: &str) -> Option<Patch> {
        let name = name.trim();
        Self::ALL.into_iter().find(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Build the patch for a device running at `sample_rate`.
    pub fn signal(self, sample_rate: u32) -> Signal {
        match self {
            Patch::Ramp => Signal::bytebeat_fn(|t| t as f64),
            Patch::Drone => Signal::stream(drone(sample_rate)),
            Patch::Siren => Signal::stream(siren(sample_rate)),
            Patch::Gate => Signal::stream(gate(sample_rate)),
            Patch::Pulse => Signal::stream(pulse(sample_rate)),
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown patch `{0}` (expected one of: ramp, drone, siren, gate, pulse)")]
pub struct UnknownPatch(pub String);

impl FromStr for Patch {
    type Err = UnknownPatch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Patch::from_name(s).ok_or_else(|| UnknownPatch(s.to_owned()))
    }
}

pub fn drone(sample_rate: u32) -> Stream {
    mul(add(osc_at(120.1, sample_rate), mul(rand(), 0.1)), 0.5)
}

pub fn siren(sample_rate: u32) -> Stream {
    let sweep = osc_at(add(240.0, mul(osc_at(0.1, sample_rate), 120.0)), sample_rate);
    mul(add(sweep, mul(rand(), osc_at(0.05, sample_rate))), 0.5)
}

pub fn gate(sample_rate: u32) -> Stream {
    let half = seconds_at(0.5, sample_rate);
    let envelope = cycle(cat(
        cat(take(osc_at(1.0, sample_rate), half), take(osc_at(4.0, sample_rate), half)),
        take(constant(0.0), half),
    ));
    mul(rand(), envelope)
}

pub fn pulse(sample_rate: u32) -> Stream {
    let sr = f64::from(sample_rate);
    map(count(0), move |n: f64| {
        let t = n / sr;
        if modulo(t, 1.0 / 30.0) > 1.0 / 60.0 {
            1.0
        } else {
            -1.0
        }
    })
}
