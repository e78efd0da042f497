//! `cpal` output glue: device selection and an output stream whose callback drives a
//! [`Scheduler`] over a [`TimelineSink`].
//!
//! The callback pulls frames from the timeline; buffer completions (and so refills) happen
//! inside it, on the audio thread. The only state shared with other threads is the
//! [`SignalSlot`](crate::signal::SignalSlot) held by the scheduler.

use cpal::traits::{DeviceTrait, HostTrait};
use thiserror::Error;
use tracing::{error, info};

use crate::scheduler::{Scheduler, SchedulerError};
use crate::timeline::TimelineSink;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("no default output device")]
    NoDefaultDevice,
    #[error("requested device not found: {0}")]
    DeviceNotFound(String),
    #[error("device offers no supported output configs")]
    NoSupportedConfig,
    #[error("unsupported device sample format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Devices(#[from] cpal::DevicesError),
    #[error(transparent)]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Names of the default host's output devices.
pub fn output_device_names() -> Result<Vec<String>, RealtimeError> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for dev in host.output_devices()? {
        names.push(dev.name()?);
    }
    Ok(names)
}

/// The named output device, or the host default.
pub fn pick_device(name: Option<&str>) -> Result<cpal::Device, RealtimeError> {
    let host = cpal::default_host();
    if let Some(name) = name {
        for d in host.output_devices()? {
            if d.name()? == name {
                return Ok(d);
            }
        }
        return Err(RealtimeError::DeviceNotFound(name.to_owned()));
    }
    host.default_output_device().ok_or(RealtimeError::NoDefaultDevice)
}

/// Pick the supported config closest to the requested rate and channel count.
pub fn choose_config(
    device: &cpal::Device,
    req_sr: Option<u32>,
    req_ch: Option<u16>,
) -> Result<cpal::SupportedStreamConfig, RealtimeError> {
    if req_sr.is_none() && req_ch.is_none() {
        return Ok(device.default_output_config()?);
    }

    let mut best: Option<(u64, cpal::SupportedStreamConfigRange)> = None;
    for range in device.supported_output_configs()? {
        let ch = range.channels();
        let sr_min = range.min_sample_rate().0;
        let sr_max = range.max_sample_rate().0;

        let ch_pen = req_ch.map_or(0, |c| u64::from(ch.abs_diff(c)));
        let sr_pen = req_sr.map_or(0, |sr| {
            if (sr_min..=sr_max).contains(&sr) {
                0
            } else {
                u64::from(sr_min.abs_diff(sr).min(sr_max.abs_diff(sr)))
            }
        });

        let score = sr_pen.saturating_mul(1000) + ch_pen;
        if best.as_ref().map_or(true, |(s, _)| score < *s) {
            best = Some((score, range));
        }
    }

    let (_, range) = best.ok_or(RealtimeError::NoSupportedConfig)?;
    let pick_sr = match req_sr {
        Some(sr) => cpal::SampleRate(sr.clamp(range.min_sample_rate().0, range.max_sample_rate().0)),
        None => range.max_sample_rate(),
    };
    Ok(range.with_sample_rate(pick_sr))
}

/// Build (but do not start) an output stream that plays `scheduler` at `gain`, duplicating the
/// mono signal to every device channel.
pub fn build_output_stream(
    device: &cpal::Device,
    supported: &cpal::SupportedStreamConfig,
    scheduler: Scheduler<TimelineSink>,
    gain: f32,
) -> Result<cpal::Stream, RealtimeError> {
    let config = supported.config();
    info!(?config, format = ?supported.sample_format(), gain, "opening output stream");
    match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, scheduler, gain),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, scheduler, gain),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, &config, scheduler, gain),
        other => Err(RealtimeError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    cfg: &cpal::StreamConfig,
    mut scheduler: Scheduler<TimelineSink>,
    gain: f32,
) -> Result<cpal::Stream, RealtimeError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = usize::from(cfg.channels);
    if !scheduler.is_started() {
        scheduler.start()?;
    }
    let mut failed = false;

    let stream = device.build_output_stream(
        cfg,
        move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
            if failed {
                output.fill(T::EQUILIBRIUM);
                return;
            }
            let map = |s: f32| T::from_sample((s * gain).clamp(-1.0, 1.0));
            if let Err(e) = scheduler.render_interleaved(output, channels, map) {
                error!(error = %e, "scheduler stopped; output muted");
                output.fill(T::EQUILIBRIUM);
                failed = true;
            }
        },
        |e: cpal::StreamError| error!(error = %e, "audio stream error"),
        None,
    )?;

    Ok(stream)
}
