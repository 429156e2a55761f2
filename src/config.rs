// src/config.rs
//
// Output configuration.
//
// `OutputConfig` is the plain per-block snapshot the engine reads.
// `SharedConfig` is the control-thread side: one atomic per field, so the
// audio thread takes a consistent-enough snapshot with single-word loads
// and never touches a lock.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::emitter::OutputMode;
use crate::tempo::{DEFAULT_BPM, Resolution, sanitize_bpm};
use crate::timeline::SyncSource;

pub const DEFAULT_VELOCITY: u8 = 100;
pub const DEFAULT_CHANNEL: u8 = 1;
pub const DEFAULT_PULSE_WIDTH_MS: f32 = 22.0;
pub const MIN_PULSE_WIDTH_MS: f32 = 1.0;
pub const MAX_PULSE_WIDTH_MS: f32 = 100.0;
pub const MIN_MANUAL_BPM: f64 = 60.0;
pub const MAX_MANUAL_BPM: f64 = 200.0;

/// Everything the engine needs to know about its output for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputConfig {
    pub enabled: bool,
    /// 0..=127, also the audio-burst gain
    pub velocity: u8,
    /// 1..=16
    pub channel: u8,
    /// Audio-burst length
    pub pulse_width_ms: f32,
    pub resolution: Resolution,
    pub manual_bpm: f64,
    pub sync_source: SyncSource,
    /// 0..=127, 127 = all devices
    pub mmc_device_id: u8,
    pub send_clock_when_stopped: bool,
    pub send_mmc: bool,
    pub send_spp: bool,
    pub output_mode: OutputMode,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            velocity: DEFAULT_VELOCITY,
            channel: DEFAULT_CHANNEL,
            pulse_width_ms: DEFAULT_PULSE_WIDTH_MS,
            resolution: Resolution::Ppqn24,
            manual_bpm: DEFAULT_BPM,
            sync_source: SyncSource::Host,
            mmc_device_id: crate::event::MMC_ALL_DEVICES,
            send_clock_when_stopped: false,
            send_mmc: false,
            send_spp: false,
            output_mode: OutputMode::MidiClock,
        }
    }
}

impl OutputConfig {
    /// Clamp every field into its legal range.
    pub fn sanitized(mut self) -> Self {
        self.velocity = self.velocity.min(127);
        self.channel = self.channel.clamp(1, 16);
        self.pulse_width_ms = clamp_width(self.pulse_width_ms);
        self.manual_bpm = sanitize_bpm(self.manual_bpm);
        self.mmc_device_id = self.mmc_device_id.min(127);
        self
    }
}

#[inline]
fn clamp_width(ms: f32) -> f32 {
    if ms.is_finite() {
        ms.clamp(MIN_PULSE_WIDTH_MS, MAX_PULSE_WIDTH_MS)
    } else {
        DEFAULT_PULSE_WIDTH_MS
    }
}

/// Lock-free configuration written by the control thread.
///
/// Floats are stored as their bit patterns.
#[derive(Debug)]
pub struct SharedConfig {
    enabled: AtomicBool,
    velocity: AtomicU8,
    channel: AtomicU8,
    pulse_width_bits: AtomicU32,
    resolution: AtomicU32,
    manual_bpm_bits: AtomicU64,
    sync_source: AtomicU8,
    mmc_device_id: AtomicU8,
    send_clock_when_stopped: AtomicBool,
    send_mmc: AtomicBool,
    send_spp: AtomicBool,
    output_mode: AtomicU8,

    force_reset: AtomicBool,
    resync_requested: AtomicBool,
}

impl SharedConfig {
    pub fn new(initial: OutputConfig) -> Self {
        let c = initial.sanitized();
        Self {
            enabled: AtomicBool::new(c.enabled),
            velocity: AtomicU8::new(c.velocity),
            channel: AtomicU8::new(c.channel),
            pulse_width_bits: AtomicU32::new(c.pulse_width_ms.to_bits()),
            resolution: AtomicU32::new(c.resolution.ppqn()),
            manual_bpm_bits: AtomicU64::new(c.manual_bpm.to_bits()),
            sync_source: AtomicU8::new(c.sync_source as u8),
            mmc_device_id: AtomicU8::new(c.mmc_device_id),
            send_clock_when_stopped: AtomicBool::new(c.send_clock_when_stopped),
            send_mmc: AtomicBool::new(c.send_mmc),
            send_spp: AtomicBool::new(c.send_spp),
            output_mode: AtomicU8::new(c.output_mode as u8),
            force_reset: AtomicBool::new(false),
            resync_requested: AtomicBool::new(false),
        }
    }

    /// Read every field once. Audio-thread safe.
    pub fn snapshot(&self) -> OutputConfig {
        OutputConfig {
            enabled: self.enabled.load(Ordering::Relaxed),
            velocity: self.velocity.load(Ordering::Relaxed),
            channel: self.channel.load(Ordering::Relaxed),
            pulse_width_ms: f32::from_bits(self.pulse_width_bits.load(Ordering::Relaxed)),
            resolution: Resolution::try_from(self.resolution.load(Ordering::Relaxed))
                .unwrap_or_default(),
            manual_bpm: f64::from_bits(self.manual_bpm_bits.load(Ordering::Relaxed)),
            sync_source: SyncSource::from_index(self.sync_source.load(Ordering::Relaxed)),
            mmc_device_id: self.mmc_device_id.load(Ordering::Relaxed),
            send_clock_when_stopped: self.send_clock_when_stopped.load(Ordering::Relaxed),
            send_mmc: self.send_mmc.load(Ordering::Relaxed),
            send_spp: self.send_spp.load(Ordering::Relaxed),
            output_mode: OutputMode::from_index(self.output_mode.load(Ordering::Relaxed)),
        }
    }

    pub fn store(&self, config: OutputConfig) {
        let c = config.sanitized();
        self.set_enabled(c.enabled);
        self.set_velocity(c.velocity);
        self.set_channel(c.channel);
        self.set_pulse_width_ms(c.pulse_width_ms);
        self.set_resolution(c.resolution);
        self.set_manual_bpm(c.manual_bpm);
        self.set_sync_source(c.sync_source);
        self.set_mmc_device_id(c.mmc_device_id);
        self.set_send_clock_when_stopped(c.send_clock_when_stopped);
        self.set_send_mmc(c.send_mmc);
        self.set_send_spp(c.send_spp);
        self.set_output_mode(c.output_mode);
    }

    // -------------------------------
    // MARK: Setters (control thread)
    // -------------------------------

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_velocity(&self, velocity: u8) {
        self.velocity.store(velocity.min(127), Ordering::Relaxed);
    }

    pub fn set_channel(&self, channel: u8) {
        self.channel.store(channel.clamp(1, 16), Ordering::Relaxed);
    }

    pub fn set_pulse_width_ms(&self, ms: f32) {
        self.pulse_width_bits
            .store(clamp_width(ms).to_bits(), Ordering::Relaxed);
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        self.resolution.store(resolution.ppqn(), Ordering::Relaxed);
    }

    pub fn set_manual_bpm(&self, bpm: f64) {
        self.manual_bpm_bits
            .store(sanitize_bpm(bpm).to_bits(), Ordering::Relaxed);
    }

    pub fn set_sync_source(&self, source: SyncSource) {
        self.sync_source.store(source as u8, Ordering::Relaxed);
    }

    pub fn set_mmc_device_id(&self, id: u8) {
        self.mmc_device_id.store(id.min(127), Ordering::Relaxed);
    }

    pub fn set_send_clock_when_stopped(&self, send: bool) {
        self.send_clock_when_stopped.store(send, Ordering::Relaxed);
    }

    pub fn set_send_mmc(&self, send: bool) {
        self.send_mmc.store(send, Ordering::Relaxed);
    }

    pub fn set_send_spp(&self, send: bool) {
        self.send_spp.store(send, Ordering::Relaxed);
    }

    pub fn set_output_mode(&self, mode: OutputMode) {
        self.output_mode.store(mode as u8, Ordering::Relaxed);
    }

    // -------------------------------
    // MARK: Block-boundary requests
    // -------------------------------

    pub fn request_force_reset(&self) {
        self.force_reset.store(true, Ordering::Release);
    }

    pub fn request_resync(&self) {
        self.resync_requested.store(true, Ordering::Release);
    }

    /// Consume a pending force-reset request.
    #[inline]
    pub fn take_force_reset(&self) -> bool {
        self.force_reset.swap(false, Ordering::AcqRel)
    }

    /// Consume a pending resync request.
    #[inline]
    pub fn take_resync_request(&self) -> bool {
        self.resync_requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trips_store() {
        let shared = SharedConfig::default();
        let config = OutputConfig {
            velocity: 64,
            channel: 10,
            pulse_width_ms: 5.0,
            resolution: Resolution::Ppqn96,
            manual_bpm: 133.5,
            sync_source: SyncSource::Link,
            output_mode: OutputMode::NotePulse,
            send_mmc: true,
            ..OutputConfig::default()
        };
        shared.store(config);
        assert_eq!(shared.snapshot(), config);
    }

    #[test]
    fn test_setters_clamp() {
        let shared = SharedConfig::default();
        shared.set_channel(0);
        shared.set_velocity(200);
        shared.set_pulse_width_ms(1000.0);
        shared.set_manual_bpm(-3.0);
        shared.set_mmc_device_id(255);

        let snap = shared.snapshot();
        assert_eq!(snap.channel, 1);
        assert_eq!(snap.velocity, 127);
        assert_eq!(snap.pulse_width_ms, MAX_PULSE_WIDTH_MS);
        assert_eq!(snap.manual_bpm, DEFAULT_BPM);
        assert_eq!(snap.mmc_device_id, 127);
    }

    #[test]
    fn test_requests_are_consumed_once() {
        let shared = SharedConfig::default();
        assert!(!shared.take_resync_request());
        shared.request_resync();
        assert!(shared.take_resync_request());
        assert!(!shared.take_resync_request());

        shared.request_force_reset();
        assert!(shared.take_force_reset());
        assert!(!shared.take_force_reset());
    }
}
