use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use loop_engine::audio::AudioBuffer;
use loop_engine::midi::event::MidiEvent;
use loop_engine::midi::sync::SyncTicker;
use loop_engine::model::channel::SamplePlayMode;
use loop_engine::model::wave::Wave;
use loop_engine::model::Model;
use loop_engine::sequencer::clock::ClockStatus;
use loop_engine::sequencer::metronome::{Metronome, MetronomeShared};
use loop_engine::{Engine, EngineConfig, EngineParts, Sequencer};

const SAMPLE_RATE: u32 = 44100;

/// Engine with `channels` looping channels, all playing, transport running
fn running_engine(channels: usize) -> EngineParts {
    let mut parts = Engine::new(EngineConfig::default(), None).unwrap();
    parts.engine.start_rendering();
    let frames_in_loop = parts.engine.clock().frames_in_loop();

    for i in 0..channels {
        let samples: Vec<f32> = (0..frames_in_loop * 2)
            .map(|n| ((n + i) as f32 * 0.001).sin() * 0.1)
            .collect();
        let wave = Wave::new(
            format!("bench-{}", i),
            SAMPLE_RATE,
            AudioBuffer::from_interleaved(samples, 2),
        );
        let handler = parts.engine.mixer_handler();
        let id = handler.add_and_load_channel("bench", wave);
        handler.set_mode(id, SamplePlayMode::Loop).unwrap();
        parts.engine.press(id);
    }
    parts.engine.start();
    parts.dispatcher.process();
    parts
}

/// Benchmark a full render pass (the audio callback budget)
fn bench_mixer_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer_render");

    for channels in [1usize, 8, 32] {
        let mut parts = running_engine(channels);
        let info = parts.engine.render_info().load();
        let mut out = AudioBuffer::stereo(512);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_channels", channels)),
            &channels,
            |b, _| {
                b.iter(|| {
                    parts.mixer.render(&mut out, None, &info);
                    black_box(out.get(0, 0));
                });
            },
        );
    }
    group.finish();
}

/// Benchmark the per-frame sequencer scan with a dense action map
fn bench_sequencer_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequencer_advance");

    for buffer_size in [64usize, 512, 2048] {
        let mut model = Model::with_internal_channels();
        model.clock.status = ClockStatus::Running;
        model.clock.quantize = 4;
        model.clock.recompute(SAMPLE_RATE);

        let mut actions = loop_engine::actions::ActionMap::new();
        for (id, frame) in (0..model.clock.frames_in_loop).step_by(100).enumerate() {
            actions.insert(loop_engine::actions::Action::new(
                id as u32 + 1,
                4,
                frame,
                MidiEvent::note_on(0, 60, 100),
            ));
        }
        model.actions = Arc::new(actions);

        let metronome = Metronome::new(SAMPLE_RATE as f32, Arc::new(MetronomeShared::new(1.0)));
        let mut sequencer = Sequencer::new(
            Arc::clone(&model.clock.state),
            SyncTicker::disabled(),
            metronome,
        );

        group.bench_with_input(
            BenchmarkId::from_parameter(buffer_size),
            &buffer_size,
            |b, &size| {
                b.iter(|| {
                    black_box(sequencer.advance(&model, size).len());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_mixer_render, bench_sequencer_advance);
criterion_main!(benches);
