//! End-to-end timing tests for the pulse engine.
//!
//! Every test drives `PulseEngine::process` the way a host would: push a
//! playhead, run a block, inspect offset-tagged MIDI.

use pulse24sync::event::status;
use pulse24sync::{
    HostSnapshot, MidiEvent, MmcCommand, OutputConfig, OutputMode, PulseEngine, Resolution,
    SyncSource, TransportState, pulse_interval_samples, pulse_rate,
};

const SR: f64 = 48_000.0;

fn engine(sample_rate: f64, config: OutputConfig) -> PulseEngine {
    let mut engine = PulseEngine::new(sample_rate);
    engine.set_config(config);
    engine.prepare(sample_rate);
    engine
}

fn manual(bpm: f64) -> OutputConfig {
    OutputConfig {
        sync_source: SyncSource::Manual,
        manual_bpm: bpm,
        ..OutputConfig::default()
    }
}

/// Run `sizes` back to back and return every event with an absolute offset.
fn run_blocks(engine: &mut PulseEngine, sizes: &[usize]) -> Vec<(u64, Vec<u8>)> {
    let mut out = Vec::new();
    let mut start = 0u64;
    for &size in sizes {
        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(size, &mut midi, None);
        out.extend(
            midi.iter()
                .map(|e| (start + e.offset as u64, e.as_bytes().to_vec())),
        );
        start += size as u64;
    }
    out
}

/// Same as `run_blocks`, feeding a host playhead that advances with time.
fn run_host_blocks(engine: &mut PulseEngine, bpm: f64, sizes: &[usize]) -> Vec<u64> {
    let mut clocks = Vec::new();
    let mut start = 0u64;
    for &size in sizes {
        let ppq = start as f64 / SR * bpm / 60.0;
        engine.set_host_snapshot(HostSnapshot::playing(bpm, ppq));
        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(size, &mut midi, None);
        clocks.extend(
            midi.iter()
                .filter(|e| e.is_clock())
                .map(|e| start + e.offset as u64),
        );
        start += size as u64;
    }
    clocks
}

/// Deterministic irregular block sizes summing to `total`.
fn irregular_sizes(total: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut seed = 0x2545_f491u32;
    let mut left = total;
    while left > 0 {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let size = (1 + seed as usize % 1500).min(left);
        sizes.push(size);
        left -= size;
    }
    sizes
}

fn clock_offsets(events: &[(u64, Vec<u8>)]) -> Vec<u64> {
    events
        .iter()
        .filter(|(_, bytes)| bytes.as_slice() == [status::CLOCK])
        .map(|(offset, _)| *offset)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Rate
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_120_bpm_24_ppqn_at_48k_is_1000_samples() {
    assert_eq!(pulse_rate(120.0, Resolution::Ppqn24), 48.0);
    assert_eq!(pulse_interval_samples(SR, 120.0, Resolution::Ppqn24), 1000.0);

    let mut engine = engine(SR, manual(120.0));
    let events = run_blocks(&mut engine, &[48_000]);
    let clocks = clock_offsets(&events);

    assert_eq!(clocks.len(), 48);
    assert!(clocks.iter().enumerate().all(|(k, o)| *o == k as u64 * 1000));
    assert_eq!(engine.pulse_count(), 48);
}

#[test]
fn test_fractional_interval_at_44k1_never_drifts() {
    let interval = pulse_interval_samples(44_100.0, 120.0, Resolution::Ppqn24);
    assert_eq!(interval, 918.75);

    let mut engine = engine(44_100.0, manual(120.0));
    let events = run_blocks(&mut engine, &[44_100]);
    let clocks = clock_offsets(&events);

    // Boundary k fires on the first whole sample at or after k * 918.75.
    assert_eq!(clocks.len(), 48);
    for (k, offset) in clocks.iter().enumerate() {
        assert_eq!(*offset, (k as f64 * interval).ceil() as u64);
    }
    assert!(clocks.windows(2).all(|w| matches!(w[1] - w[0], 918 | 919)));
}

#[test]
fn test_resolution_scales_pulse_count() {
    for (resolution, expected) in [
        (Resolution::Ppqn24, 48),
        (Resolution::Ppqn48, 96),
        (Resolution::Ppqn96, 192),
    ] {
        let mut engine = engine(
            SR,
            OutputConfig {
                resolution,
                ..manual(120.0)
            },
        );
        let events = run_blocks(&mut engine, &[48_000]);
        assert_eq!(clock_offsets(&events).len(), expected, "{}", resolution);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Chunking
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_one_block_equals_many_blocks() {
    let mut whole = engine(SR, manual(120.0));
    let one = run_blocks(&mut whole, &[48_000]);

    let mut even = engine(SR, manual(120.0));
    let many = run_blocks(&mut even, &[1000; 48]);

    let mut odd = engine(SR, manual(120.0));
    let irregular = run_blocks(&mut odd, &irregular_sizes(48_000));

    assert_eq!(one, many);
    assert_eq!(one, irregular);
}

#[test]
fn test_host_playhead_chunking_keeps_grid() {
    let mut engine = engine(SR, OutputConfig::default());
    let clocks = run_host_blocks(&mut engine, 120.0, &irregular_sizes(48_000));

    assert_eq!(clocks.len(), 48);
    assert!(clocks.iter().enumerate().all(|(k, o)| *o == k as u64 * 1000));
    // Only the first position seen caused a realignment.
    assert_eq!(engine.resync_count(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Idle & gating
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_no_host_information_is_silent() {
    let mut engine = engine(SR, OutputConfig::default());
    let events = run_blocks(&mut engine, &[512; 100]);

    assert!(events.is_empty());
    assert_eq!(engine.current_bpm(), 120.0);
    assert_eq!(engine.transport_state(), TransportState::Stopped);
}

#[test]
fn test_clock_when_stopped_runs_without_transport() {
    let mut engine = engine(
        SR,
        OutputConfig {
            send_clock_when_stopped: true,
            ..OutputConfig::default()
        },
    );
    let events = run_blocks(&mut engine, &[512; 100]);
    let clocks = clock_offsets(&events);

    assert_eq!(clocks.len(), 52);
    // No transport edge while stopped.
    assert_eq!(clocks.len(), events.len());
}

#[test]
fn test_zero_sample_block_changes_nothing() {
    let mut engine = engine(SR, manual(120.0));
    run_blocks(&mut engine, &[300]);
    let position = engine.phase().current_position();
    let next = engine.phase().next_pulse_time();

    let mut midi: Vec<MidiEvent> = Vec::new();
    assert_eq!(engine.process(0, &mut midi, None), 0);
    assert!(midi.is_empty());
    assert_eq!(engine.phase().current_position(), position);
    assert_eq!(engine.phase().next_pulse_time(), next);
}

#[test]
fn test_disabled_engine_emits_nothing() {
    let mut engine = engine(
        SR,
        OutputConfig {
            enabled: false,
            ..manual(120.0)
        },
    );
    assert!(run_blocks(&mut engine, &[48_000]).is_empty());
    assert_eq!(engine.pulse_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Resynchronization
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_jump_back_to_whole_pulse_fires_immediately() {
    let mut engine = engine(SR, OutputConfig::default());
    let mut midi: Vec<MidiEvent> = Vec::new();

    engine.set_host_snapshot(HostSnapshot::playing(120.0, 10.0));
    engine.process(512, &mut midi, None);
    let before = engine.resync_count();

    midi.clear();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 4.0));
    engine.process(1, &mut midi, None);

    assert_eq!(engine.resync_count(), before + 1);
    // 4.0 quarters = pulse 96 exactly
    assert_eq!(midi.len(), 1);
    assert!(midi[0].is_clock());
    assert_eq!(midi[0].offset, 0);
    assert_eq!(engine.phase().current_position(), 1.0);
    assert_eq!(engine.phase().next_pulse_time(), 1000.0);
}

#[test]
fn test_jump_to_half_pulse_waits_half_an_interval() {
    let mut engine = engine(SR, OutputConfig::default());
    let mut midi: Vec<MidiEvent> = Vec::new();

    engine.set_host_snapshot(HostSnapshot::playing(120.0, 10.0));
    engine.process(512, &mut midi, None);

    midi.clear();
    // pulse 97.5
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 4.0625));
    engine.process(1000, &mut midi, None);

    let clocks: Vec<u32> = midi.iter().filter(|e| e.is_clock()).map(|e| e.offset).collect();
    assert_eq!(clocks, vec![500]);
}

#[test]
fn test_tempo_threshold() {
    let mut engine = engine(SR, OutputConfig::default());
    let mut midi: Vec<MidiEvent> = Vec::new();
    let block = 512usize;

    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(block, &mut midi, None);
    assert_eq!(engine.resync_count(), 1);

    // 0.05 BPM is below the threshold
    let ppq = block as f64 / SR * 120.0 / 60.0;
    engine.set_host_snapshot(HostSnapshot::playing(120.05, ppq));
    engine.process(block, &mut midi, None);
    assert_eq!(engine.resync_count(), 1);

    // 0.15 BPM above the last block is not
    let ppq = ppq + block as f64 / SR * 120.05 / 60.0;
    engine.set_host_snapshot(HostSnapshot::playing(120.2, ppq));
    engine.process(block, &mut midi, None);
    assert_eq!(engine.resync_count(), 2);
    assert_eq!(engine.current_bpm(), 120.2);
}

#[test]
fn test_switching_source_relocks_position() {
    let mut engine = engine(SR, manual(120.0));
    run_blocks(&mut engine, &[2048]);
    let before = engine.resync_count();

    engine.set_config(OutputConfig::default());
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 3.0));
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.process(256, &mut midi, None);

    assert_eq!(engine.resync_count(), before + 1);
    assert!(midi.iter().any(|e| e.is_clock() && e.offset == 0));
}

// ═══════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════

fn all_messages() -> OutputConfig {
    OutputConfig {
        send_mmc: true,
        send_spp: true,
        ..OutputConfig::default()
    }
}

#[test]
fn test_start_then_stop() {
    let mut engine = engine(SR, all_messages());
    let mut midi: Vec<MidiEvent> = Vec::new();

    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(100, &mut midi, None);
    assert_eq!(midi[0].as_bytes(), &[status::START]);
    assert_eq!(midi[1].mmc_command(), Some(MmcCommand::Play));
    assert!(midi[2].is_clock());
    assert!(midi.iter().all(|e| e.offset == 0));

    midi.clear();
    engine.set_host_snapshot(HostSnapshot {
        bpm: Some(120.0),
        is_playing: false,
        ppq_position: Some(100.0 / 24_000.0),
        ..Default::default()
    });
    engine.process(2000, &mut midi, None);
    assert_eq!(midi.len(), 2);
    assert_eq!(midi[0].as_bytes(), &[status::STOP]);
    assert_eq!(midi[1].mmc_command(), Some(MmcCommand::Stop));
    assert_eq!(engine.transport_state(), TransportState::Stopped);
}

#[test]
fn test_continue_from_position_locates_first() {
    let mut engine = engine(SR, all_messages());
    let mut midi: Vec<MidiEvent> = Vec::new();

    engine.set_host_snapshot(HostSnapshot::playing(120.0, 8.0));
    engine.process(256, &mut midi, None);

    assert_eq!(midi[0].song_position_value(), Some(32));
    assert_eq!(midi[1].as_bytes(), &[status::CONTINUE]);
    assert_eq!(midi[2].mmc_command(), Some(MmcCommand::DeferredPlay));
    assert!(midi[3].is_clock());
    // Continue already carried the position; no second SPP.
    assert_eq!(
        midi.iter().filter(|e| e.song_position_value().is_some()).count(),
        1
    );
    assert_eq!(engine.song_position(), 32);
}

#[test]
fn test_record_punch_in_and_out() {
    let mut engine = engine(SR, all_messages());
    let mut midi: Vec<MidiEvent> = Vec::new();
    let recording = |recording: bool, ppq: f64| HostSnapshot {
        is_recording: recording,
        ..HostSnapshot::playing(120.0, ppq)
    };

    engine.set_host_snapshot(recording(false, 0.0));
    engine.process(240, &mut midi, None);

    midi.clear();
    engine.set_host_snapshot(recording(true, 0.01));
    engine.process(240, &mut midi, None);
    assert_eq!(midi[0].mmc_command(), Some(MmcCommand::RecordStrobe));
    assert_eq!(engine.transport_state(), TransportState::Recording);

    midi.clear();
    engine.set_host_snapshot(recording(false, 0.02));
    engine.process(240, &mut midi, None);
    assert_eq!(midi[0].mmc_command(), Some(MmcCommand::RecordExit));
    assert_eq!(engine.transport_state(), TransportState::Playing);
}

#[test]
fn test_note_pulse_mode_has_no_realtime_bytes() {
    let mut engine = engine(
        SR,
        OutputConfig {
            output_mode: OutputMode::NotePulse,
            ..all_messages()
        },
    );
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(2000, &mut midi, None);

    assert!(midi.iter().all(|e| e.status() < 0xF8));
    assert_eq!(midi[0].mmc_command(), Some(MmcCommand::Play));
    assert!(midi[1].is_note_on());
    assert!(midi[2].is_note_off());
    assert_eq!(midi[2].offset, 1);
    assert_eq!(midi.iter().filter(|e| e.is_note_on()).count(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// Output forms
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_note_off_carried_to_next_block_start() {
    let mut engine = engine(
        SR,
        OutputConfig {
            output_mode: OutputMode::NotePulse,
            ..manual(120.0)
        },
    );
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.process(1000, &mut midi, None);

    // boundary at sample 1000 = offset 0 of this 1-sample block
    midi.clear();
    engine.process(1, &mut midi, None);
    assert_eq!(midi.len(), 1);
    assert!(midi[0].is_note_on());

    midi.clear();
    engine.process(64, &mut midi, None);
    assert_eq!(midi.len(), 1);
    assert!(midi[0].is_note_off());
    assert_eq!(midi[0].offset, 0);
}

fn note_pulse(config: OutputConfig) -> OutputConfig {
    OutputConfig {
        output_mode: OutputMode::NotePulse,
        ..config
    }
}

/// Note-off always reaches the receiver before the next note-on.
fn assert_off_before_on(midi: &[MidiEvent]) {
    let off = midi.iter().position(|e| e.is_note_off()).unwrap();
    let on = midi.iter().position(|e| e.is_note_on()).unwrap();
    assert!(off < on);
    assert!(midi[off].offset < midi[on].offset);
}

#[test]
fn test_jump_onto_boundary_with_owed_note_off() {
    let mut engine = engine(SR, note_pulse(OutputConfig::default()));
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(1000, &mut midi, None);

    // note-on on the last sample: its note-off is owed to the next block
    midi.clear();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 1000.0 / 24_000.0));
    engine.process(1, &mut midi, None);
    assert_eq!(midi.len(), 1);
    assert!(midi[0].is_note_on());

    midi.clear();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 4.0));
    engine.process(64, &mut midi, None);

    assert_off_before_on(&midi);
    let offsets: Vec<u32> = midi.iter().map(|e| e.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
    assert!(midi[2].is_note_off());
}

#[test]
fn test_force_reset_with_owed_note_off() {
    let mut engine = engine(SR, note_pulse(manual(120.0)));
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.process(1000, &mut midi, None);
    midi.clear();
    engine.process(1, &mut midi, None);
    assert!(midi[0].is_note_on());

    engine.force_reset();
    midi.clear();
    engine.process(64, &mut midi, None);

    assert_off_before_on(&midi);
    let offsets: Vec<u32> = midi.iter().map(|e| e.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
    assert_eq!(engine.pulse_count(), 1);
}

#[test]
fn test_force_reset_while_stopped_then_play() {
    let mut engine = engine(SR, note_pulse(OutputConfig::default()));
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(1000, &mut midi, None);
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 1000.0 / 24_000.0));
    engine.process(1, &mut midi, None);

    engine.force_reset();
    engine.set_host_snapshot(HostSnapshot {
        bpm: Some(120.0),
        is_playing: false,
        ..Default::default()
    });
    midi.clear();
    engine.process(64, &mut midi, None);
    assert_eq!(midi.len(), 1);
    assert!(midi[0].is_note_off());

    // nothing owed any more: the first pulse goes out on time
    midi.clear();
    engine.set_host_snapshot(HostSnapshot::playing(120.0, 0.0));
    engine.process(64, &mut midi, None);
    assert!(midi[0].is_note_on());
    assert_eq!(midi[0].offset, 0);
}

#[test]
fn test_sample_rate_change_keeps_manual_phase() {
    let mut engine = engine(SR, manual(120.0));
    let events = run_blocks(&mut engine, &[1500]);
    assert_eq!(clock_offsets(&events), vec![0, 1000]);

    // halfway to the next pulse at either rate
    engine.set_sample_rate(96_000.0);
    let events = run_blocks(&mut engine, &[3000]);
    assert_eq!(clock_offsets(&events), vec![1000]);
    assert_eq!(engine.pulse_interval(), 2000.0);
}

#[test]
fn test_audio_burst_width_follows_setting() {
    let mut engine = engine(
        SR,
        OutputConfig {
            output_mode: OutputMode::AudioBurst,
            pulse_width_ms: 5.0,
            velocity: 127,
            ..manual(120.0)
        },
    );
    let mut data = vec![0.0f32; 1000];
    let mut audio = pulse24sync::AudioBuffer::planar(&mut data, 1);
    let mut midi: Vec<MidiEvent> = Vec::new();
    engine.process(1000, &mut midi, Some(&mut audio));

    assert!(midi.is_empty());
    // 5 ms at 48 kHz
    assert!(data[1..240].iter().any(|s| *s != 0.0));
    assert!(data[240..].iter().all(|s| *s == 0.0));
    assert!(data.iter().all(|s| s.abs() <= 1.0));
}
