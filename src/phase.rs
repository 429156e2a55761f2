// src/phase.rs
//
// Sample-domain pulse state.

use crate::tempo::{Resolution, pulse_interval_samples, pulse_rate};

/// Where the engine is between pulses, in samples.
///
/// `next_pulse_time` only moves forward by whole intervals, except when
/// the resynchronizer realigns it.
#[derive(Debug, Clone)]
pub struct PulsePhaseModel {
    sample_rate: f64,
    /// Always > 0
    pulse_interval: f64,
    pulse_rate: f64,
    current_position: f64,
    next_pulse_time: f64,
}

impl PulsePhaseModel {
    pub fn new(sample_rate: f64) -> Self {
        let mut model = Self {
            sample_rate,
            pulse_interval: sample_rate.max(1.0),
            pulse_rate: 1.0,
            current_position: 0.0,
            next_pulse_time: 0.0,
        };
        model.update_rate(crate::tempo::DEFAULT_BPM, Resolution::default());
        model
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.reset();
    }

    /// Back to the first pulse, due immediately.
    pub fn reset(&mut self) {
        self.current_position = 0.0;
        self.next_pulse_time = 0.0;
    }

    /// Change sample rate, keeping the same fraction of the current interval.
    ///
    /// Both counters are rescaled so the time already elapsed since the last
    /// boundary stays the same in seconds.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        let old = self.sample_rate;
        self.sample_rate = sample_rate;
        if old > 0.0 && sample_rate > 0.0 {
            self.current_position = self.current_position * sample_rate / old;
            self.next_pulse_time = self.next_pulse_time * sample_rate / old;
            self.pulse_interval = self.pulse_interval * sample_rate / old;
        }
    }

    /// Recompute the interval. Returns `true` if it changed.
    #[inline]
    pub fn update_rate(&mut self, bpm: f64, resolution: Resolution) -> bool {
        let interval = pulse_interval_samples(self.sample_rate, bpm, resolution);
        self.pulse_rate = pulse_rate(bpm, resolution);
        let changed = interval != self.pulse_interval;
        self.pulse_interval = interval;
        changed
    }

    /// A pulse boundary has been reached.
    #[inline]
    pub fn is_due(&self) -> bool {
        self.current_position >= self.next_pulse_time
    }

    /// Schedule the next boundary one interval after the last one.
    #[inline]
    pub fn advance_pulse(&mut self) {
        self.next_pulse_time += self.pulse_interval;
    }

    #[inline]
    pub fn tick(&mut self) {
        self.current_position += 1.0;
    }

    /// Jump to an externally computed phase.
    pub fn realign(&mut self, current_position: f64, next_pulse_time: f64) {
        self.current_position = current_position.max(0.0);
        self.next_pulse_time = next_pulse_time;
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn pulse_interval(&self) -> f64 {
        self.pulse_interval
    }

    /// Pulses per second at the last rate update.
    #[inline]
    pub fn pulse_rate(&self) -> f64 {
        self.pulse_rate
    }

    #[inline]
    pub fn current_position(&self) -> f64 {
        self.current_position
    }

    #[inline]
    pub fn next_pulse_time(&self) -> f64 {
        self.next_pulse_time
    }
}

/// Progress through one enveloped audio burst.
///
/// `position < duration_samples` whenever `active`.
#[derive(Debug, Clone)]
pub struct AudioBurstState {
    duration_samples: u32,
    position: u32,
    active: bool,
}

impl AudioBurstState {
    pub fn new(sample_rate: f64, width_ms: f32) -> Self {
        let mut burst = Self {
            duration_samples: 1,
            position: 0,
            active: false,
        };
        burst.set_width_ms(width_ms, sample_rate);
        burst
    }

    pub fn set_width_ms(&mut self, width_ms: f32, sample_rate: f64) {
        let samples = (sample_rate * width_ms as f64 / 1000.0) as u32;
        self.duration_samples = samples.max(1);
        if self.active && self.position >= self.duration_samples {
            self.stop();
        }
    }

    pub fn start(&mut self) {
        self.active = true;
        self.position = 0;
    }

    /// Resume a burst that started `offset` samples ago.
    pub fn start_at(&mut self, offset: u32) {
        if offset < self.duration_samples {
            self.active = true;
            self.position = offset;
        } else {
            self.stop();
        }
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.position = 0;
    }

    #[inline]
    pub fn advance(&mut self) {
        self.position += 1;
        if self.position >= self.duration_samples {
            self.stop();
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn position(&self) -> u32 {
        self.position
    }

    #[inline]
    pub fn duration_samples(&self) -> u32 {
        self.duration_samples
    }
}
