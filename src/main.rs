// src/main.rs
//
// Offline sanity run: manual tempo, a few blocks, firing offsets printed.

use pulse24sync::{
    HostSnapshot, MidiBuffer, OutputConfig, OutputMode, PulseEngine, Resolution, SyncSource,
};

const SAMPLE_RATE: f64 = 44_100.0;
const BLOCK_SIZE: usize = 512;

fn main() {
    println!("=== Pulse24Sync Manual Run ===\n");

    let mut engine = PulseEngine::new(SAMPLE_RATE);
    engine.prepare(SAMPLE_RATE);
    engine.set_config(OutputConfig {
        sync_source: SyncSource::Manual,
        manual_bpm: 120.0,
        resolution: Resolution::Ppqn24,
        output_mode: OutputMode::MidiClock,
        ..OutputConfig::default()
    });

    println!(
        "{} BPM @ {} Hz -> {:.2} pulses/s, {:.2} samples apart\n",
        engine.current_bpm(),
        SAMPLE_RATE,
        engine.pulse_rate(),
        engine.pulse_interval()
    );

    let mut midi = MidiBuffer::with_capacity(64);
    let mut absolute = 0usize;

    for block in 0..4 {
        midi.clear();
        let fired = engine.process(BLOCK_SIZE, &mut midi, None);

        println!("Block {}: {} pulse(s)", block, fired);
        for event in midi.iter() {
            println!(
                "  +{:4} (abs {:6})  {:02X?}",
                event.offset,
                absolute + event.offset as usize,
                event.as_bytes()
            );
        }
        absolute += BLOCK_SIZE;
    }

    // Host source: jump the playhead and watch the engine realign.
    println!("\n=== Host Reposition ===\n");

    engine.set_config(OutputConfig {
        sync_source: SyncSource::Host,
        send_spp: true,
        ..*engine.config()
    });

    for (block, ppq) in [(0, 0.0), (1, 8.25)] {
        midi.clear();
        engine.set_host_snapshot(HostSnapshot::playing(120.0, ppq));
        engine.process(BLOCK_SIZE, &mut midi, None);

        println!(
            "Block {} @ ppq {:.2}: resyncs {}, phase {:.1}/{:.1}",
            block,
            ppq,
            engine.resync_count(),
            engine.phase().current_position(),
            engine.pulse_interval()
        );
        for event in midi.iter() {
            println!("  +{:4}  {:02X?}", event.offset, event.as_bytes());
        }
    }

    println!("\n=== Done ===");
}
