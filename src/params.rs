// src/params.rs
//
// Parameter metadata and plain/normalized conversion for the control
// surfaces (C ABI, WebAssembly). Everything here runs off the audio thread.

use std::fmt;

use log::warn;

use crate::config::{
    DEFAULT_CHANNEL, DEFAULT_PULSE_WIDTH_MS, DEFAULT_VELOCITY, MAX_MANUAL_BPM,
    MAX_PULSE_WIDTH_MS, MIN_MANUAL_BPM, MIN_PULSE_WIDTH_MS, OutputConfig, SharedConfig,
};
use crate::emitter::OutputMode;
use crate::event::MMC_ALL_DEVICES;
use crate::tempo::{DEFAULT_BPM, Resolution};
use crate::timeline::SyncSource;

/// Stable identifier of a parameter. Never renumber.
pub type ParamId = u32;

pub mod ids {
    use super::ParamId;

    pub const ENABLED: ParamId = 0;
    pub const VELOCITY: ParamId = 1;
    pub const CHANNEL: ParamId = 2;
    pub const PULSE_WIDTH: ParamId = 3;
    /// Index into `Resolution::ALL`
    pub const RESOLUTION: ParamId = 4;
    pub const MANUAL_BPM: ParamId = 5;
    pub const SYNC_SOURCE: ParamId = 6;
    pub const MMC_DEVICE_ID: ParamId = 7;
    pub const SEND_CLOCK_WHEN_STOPPED: ParamId = 8;
    pub const SEND_MMC: ParamId = 9;
    pub const SEND_SPP: ParamId = 10;
    pub const OUTPUT_MODE: ParamId = 11;

    pub const COUNT: usize = 12;
}

/// Error from the parameter surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamError {
    /// No parameter with this id.
    UnknownParam(ParamId),

    /// NaN or infinite value.
    NotFinite { id: ParamId },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::UnknownParam(id) => write!(f, "Unknown parameter {}", id),
            ParamError::NotFinite { id } => {
                write!(f, "Parameter {} set to a non-finite value", id)
            }
        }
    }
}

impl std::error::Error for ParamError {}

pub type ParamResult<T> = Result<T, ParamError>;

/// Unit type for parameter display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ParamUnit {
    #[default]
    None,
    Ms,
    Bpm,
    /// On/off
    Toggle,
    /// Named choice, value is an index
    Choice,
}

impl fmt::Display for ParamUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamUnit::Ms => write!(f, "ms"),
            ParamUnit::Bpm => write!(f, "BPM"),
            ParamUnit::None | ParamUnit::Toggle | ParamUnit::Choice => Ok(()),
        }
    }
}

/// Metadata describing a parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub id: ParamId,
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub unit: ParamUnit,
    /// Step size for discrete parameters (0 = continuous)
    pub step: f32,
}

impl ParamInfo {
    const fn new(id: ParamId, name: &'static str) -> Self {
        Self {
            id,
            name,
            min: 0.0,
            max: 1.0,
            default: 0.0,
            unit: ParamUnit::None,
            step: 0.0,
        }
    }

    const fn range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    const fn default(mut self, value: f32) -> Self {
        self.default = value;
        self
    }

    const fn unit(mut self, unit: ParamUnit) -> Self {
        self.unit = unit;
        self
    }

    const fn stepped(mut self) -> Self {
        self.step = 1.0;
        self
    }

    const fn toggle(self, default: bool) -> Self {
        self.range(0.0, 1.0)
            .default(if default { 1.0 } else { 0.0 })
            .unit(ParamUnit::Toggle)
            .stepped()
    }

    /// Clamp (and snap, for discrete parameters) into range.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        if self.step > 0.0 {
            value.round()
        } else {
            value
        }
    }

    /// Normalize a value to 0..1 range.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        (self.clamp(value) - self.min) / (self.max - self.min)
    }

    /// Denormalize a 0..1 value to the parameter range.
    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.clamp(self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min))
    }

    /// Format a value for display.
    pub fn format(&self, value: f32) -> String {
        match self.unit {
            ParamUnit::Toggle => if value >= 0.5 { "On" } else { "Off" }.to_string(),
            ParamUnit::Choice => choice_label(self.id, value as usize).to_string(),
            ParamUnit::None => format!("{:.0}", value),
            unit => format!("{:.1} {}", value, unit),
        }
    }
}

const PARAMS: [ParamInfo; ids::COUNT] = [
    ParamInfo::new(ids::ENABLED, "Enabled").toggle(true),
    ParamInfo::new(ids::VELOCITY, "Velocity")
        .range(0.0, 127.0)
        .default(DEFAULT_VELOCITY as f32)
        .stepped(),
    ParamInfo::new(ids::CHANNEL, "MIDI Channel")
        .range(1.0, 16.0)
        .default(DEFAULT_CHANNEL as f32)
        .stepped(),
    ParamInfo::new(ids::PULSE_WIDTH, "Pulse Width")
        .range(MIN_PULSE_WIDTH_MS, MAX_PULSE_WIDTH_MS)
        .default(DEFAULT_PULSE_WIDTH_MS)
        .unit(ParamUnit::Ms),
    ParamInfo::new(ids::RESOLUTION, "Resolution")
        .range(0.0, (Resolution::ALL.len() - 1) as f32)
        .unit(ParamUnit::Choice)
        .stepped(),
    ParamInfo::new(ids::MANUAL_BPM, "Manual BPM")
        .range(MIN_MANUAL_BPM as f32, MAX_MANUAL_BPM as f32)
        .default(DEFAULT_BPM as f32)
        .unit(ParamUnit::Bpm),
    ParamInfo::new(ids::SYNC_SOURCE, "Sync Source")
        .range(0.0, 2.0)
        .unit(ParamUnit::Choice)
        .stepped(),
    ParamInfo::new(ids::MMC_DEVICE_ID, "MMC Device ID")
        .range(0.0, 127.0)
        .default(MMC_ALL_DEVICES as f32)
        .stepped(),
    ParamInfo::new(ids::SEND_CLOCK_WHEN_STOPPED, "Clock When Stopped").toggle(false),
    ParamInfo::new(ids::SEND_MMC, "Send MMC").toggle(false),
    ParamInfo::new(ids::SEND_SPP, "Send Song Position").toggle(false),
    ParamInfo::new(ids::OUTPUT_MODE, "Output Mode")
        .range(0.0, 2.0)
        .default(OutputMode::MidiClock as u8 as f32)
        .unit(ParamUnit::Choice)
        .stepped(),
];

fn choice_label(id: ParamId, index: usize) -> &'static str {
    match id {
        ids::RESOLUTION => ["24 PPQN", "48 PPQN", "96 PPQN", "192 PPQN", "480 PPQN"]
            .get(index)
            .copied()
            .unwrap_or("?"),
        ids::SYNC_SOURCE => ["Host", "Manual", "Link"].get(index).copied().unwrap_or("?"),
        ids::OUTPUT_MODE => ["Note Pulses", "MIDI Clock", "Audio Burst"]
            .get(index)
            .copied()
            .unwrap_or("?"),
        _ => "?",
    }
}

/// Metadata for one parameter.
pub fn param_info(id: ParamId) -> ParamResult<&'static ParamInfo> {
    PARAMS.get(id as usize).ok_or(ParamError::UnknownParam(id))
}

/// Every parameter, ordered by id.
pub fn all_params() -> &'static [ParamInfo] {
    &PARAMS
}

/// Write a plain value into the shared configuration.
///
/// Out-of-range values are clamped (and logged). Returns the value
/// actually applied.
pub fn apply(shared: &SharedConfig, id: ParamId, value: f32) -> ParamResult<f32> {
    let info = param_info(id)?;
    if !value.is_finite() {
        return Err(ParamError::NotFinite { id });
    }

    let plain = info.clamp(value);
    if plain != value && info.step == 0.0 {
        warn!("{} = {} out of range, clamped to {}", info.name, value, plain);
    }

    let on = plain >= 0.5;
    match id {
        ids::ENABLED => shared.set_enabled(on),
        ids::VELOCITY => shared.set_velocity(plain as u8),
        ids::CHANNEL => shared.set_channel(plain as u8),
        ids::PULSE_WIDTH => shared.set_pulse_width_ms(plain),
        ids::RESOLUTION => shared.set_resolution(Resolution::from_index(plain as usize)),
        ids::MANUAL_BPM => shared.set_manual_bpm(plain as f64),
        ids::SYNC_SOURCE => shared.set_sync_source(SyncSource::from_index(plain as u8)),
        ids::MMC_DEVICE_ID => shared.set_mmc_device_id(plain as u8),
        ids::SEND_CLOCK_WHEN_STOPPED => shared.set_send_clock_when_stopped(on),
        ids::SEND_MMC => shared.set_send_mmc(on),
        ids::SEND_SPP => shared.set_send_spp(on),
        ids::OUTPUT_MODE => shared.set_output_mode(OutputMode::from_index(plain as u8)),
        _ => return Err(ParamError::UnknownParam(id)),
    }
    Ok(plain)
}

/// Apply a normalized (0..1) value.
pub fn apply_normalized(shared: &SharedConfig, id: ParamId, normalized: f32) -> ParamResult<f32> {
    let info = param_info(id)?;
    if !normalized.is_finite() {
        return Err(ParamError::NotFinite { id });
    }
    apply(shared, id, info.denormalize(normalized))
}

/// Read a parameter's plain value out of a configuration snapshot.
pub fn read(config: &OutputConfig, id: ParamId) -> ParamResult<f32> {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let value = match id {
        ids::ENABLED => flag(config.enabled),
        ids::VELOCITY => config.velocity as f32,
        ids::CHANNEL => config.channel as f32,
        ids::PULSE_WIDTH => config.pulse_width_ms,
        ids::RESOLUTION => config.resolution.index() as f32,
        ids::MANUAL_BPM => config.manual_bpm as f32,
        ids::SYNC_SOURCE => config.sync_source as u8 as f32,
        ids::MMC_DEVICE_ID => config.mmc_device_id as f32,
        ids::SEND_CLOCK_WHEN_STOPPED => flag(config.send_clock_when_stopped),
        ids::SEND_MMC => flag(config.send_mmc),
        ids::SEND_SPP => flag(config.send_spp),
        ids::OUTPUT_MODE => config.output_mode as u8 as f32,
        _ => return Err(ParamError::UnknownParam(id)),
    };
    Ok(value)
}
