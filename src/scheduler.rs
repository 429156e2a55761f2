// src/scheduler.rs

use crate::audio_buffer::AudioBuffer;
use crate::config::OutputConfig;
use crate::detector::Resynchronizer;
use crate::emitter::{MessageEmitter, OutputMode};
use crate::event::MidiSink;
use crate::phase::{AudioBurstState, PulsePhaseModel};
use crate::tempo::Resolution;

/// Walks a block sample by sample and fires pulse boundaries.
///
/// Owns the sample-domain state (phase, burst, owed note-off) so the
/// per-sample loop touches nothing outside this struct.
///
/// This struct is real-time safe: no allocation, no locks. Processing
/// N samples in one call or across many calls yields the same firings.
#[derive(Debug, Clone)]
pub struct PulseScheduler {
    phase: PulsePhaseModel,
    burst: AudioBurstState,
    emitter: MessageEmitter,

    /// Firings since the last reset
    pulse_count: u64,
}

impl PulseScheduler {
    pub fn new(sample_rate: f64, pulse_width_ms: f32) -> Self {
        Self {
            phase: PulsePhaseModel::new(sample_rate),
            burst: AudioBurstState::new(sample_rate, pulse_width_ms),
            emitter: MessageEmitter::new(),
            pulse_count: 0,
        }
    }

    pub fn prepare(&mut self, sample_rate: f64, pulse_width_ms: f32) {
        self.phase.prepare(sample_rate);
        self.burst.set_width_ms(pulse_width_ms, sample_rate);
        self.reset();
    }

    /// Back to the first pulse. Drops any owed note-off.
    pub fn reset(&mut self) {
        self.phase.reset();
        self.burst.stop();
        self.emitter.reset();
        self.pulse_count = 0;
    }

    /// Keep phase, re-derive everything sample-rate dependent.
    pub fn set_sample_rate(&mut self, sample_rate: f64, pulse_width_ms: f32) {
        self.phase.set_sample_rate(sample_rate);
        self.burst.set_width_ms(pulse_width_ms, sample_rate);
    }

    /// Recompute interval and burst length for this block.
    #[inline]
    pub fn update_rate(&mut self, bpm: f64, config: &OutputConfig) -> bool {
        let sample_rate = self.phase.sample_rate();
        self.burst.set_width_ms(config.pulse_width_ms, sample_rate);
        self.phase.update_rate(bpm, config.resolution)
    }

    /// Rebuild phase from absolute position.
    pub fn realign(
        &mut self,
        resync: &mut Resynchronizer,
        ppq: Option<f64>,
        resolution: Resolution,
        output_mode: OutputMode,
    ) {
        resync.realign(
            &mut self.phase,
            &mut self.burst,
            ppq,
            resolution,
            output_mode == OutputMode::AudioBurst,
        );
    }

    /// Run one block of `num_samples`. Returns the number of firings.
    ///
    /// Per sample: owed note-off, then firing, then burst audio. A note
    /// pulse due on the same sample as a note-off goes out one sample later;
    /// the grid itself does not move.
    pub fn run_block<M: MidiSink>(
        &mut self,
        config: &OutputConfig,
        num_samples: usize,
        midi: &mut M,
        mut audio: Option<&mut AudioBuffer>,
    ) -> u32 {
        let sample_rate = self.phase.sample_rate();
        let mut fired = 0u32;

        for s in 0..num_samples {
            let offset = s as u32;

            self.emitter.release_due(offset, midi);

            if self.phase.is_due() && !self.emitter.holds_note_on(offset, config) {
                self.emitter.fire(offset, config, &mut self.burst, midi);
                // Additive, never current + interval.
                self.phase.advance_pulse();
                fired += 1;
            }

            if self.burst.is_active() {
                match audio.as_deref_mut() {
                    Some(buffer) => MessageEmitter::render_burst(
                        &mut self.burst,
                        config,
                        sample_rate,
                        s,
                        buffer,
                    ),
                    None => self.burst.advance(),
                }
            }

            self.phase.tick();
        }

        self.emitter.end_block(num_samples as u32);
        self.pulse_count += fired as u64;
        fired
    }

    /// Emit a note-off carried over from an earlier block at offset 0.
    pub fn flush_note_off<M: MidiSink>(&mut self, midi: &mut M) {
        self.emitter.flush_pending(midi);
    }

    /// Close a block in which no samples run: release any owed note-off
    /// and keep phase where it is.
    pub fn idle_block<M: MidiSink>(&mut self, midi: &mut M) {
        self.emitter.flush_pending(midi);
        self.emitter.end_block(0);
    }

    // -------------------------------
    // MARK: Accessors
    // -------------------------------

    #[inline]
    pub fn phase(&self) -> &PulsePhaseModel {
        &self.phase
    }

    #[inline]
    pub fn burst(&self) -> &AudioBurstState {
        &self.burst
    }

    #[inline]
    pub fn has_pending_note_off(&self) -> bool {
        self.emitter.has_pending_note_off()
    }

    #[inline]
    pub fn pulse_count(&self) -> u64 {
        self.pulse_count
    }
}
