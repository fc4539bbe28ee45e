// Integration test: Action recording, consolidation and persistence

use std::collections::BTreeSet;
use std::sync::Arc;

use loop_engine::actions::serialization::{from_json, to_json};
use loop_engine::actions::{ActionRecorder, PatchAction, deserialize_actions, serialize_actions};
use loop_engine::audio::AudioBuffer;
use loop_engine::midi::event::MidiEvent;
use loop_engine::{ClockStatus, Engine, EngineConfig, EngineParts, Event, Model, SharedModel};

fn recorder() -> ActionRecorder {
    let model = Arc::new(SharedModel::new(Model::with_internal_channels()));
    ActionRecorder::new(model, 6)
}

fn engine() -> EngineParts {
    let parts = Engine::new(EngineConfig::default(), None).unwrap();
    parts.engine.start_rendering();
    parts
}

fn render(parts: &mut EngineParts, frames: usize) {
    let mut out = AudioBuffer::stereo(frames);
    let info = parts.engine.render_info().load();
    parts.mixer.render(&mut out, None, &info);
}

#[test]
fn test_consolidate_links_note_pair() {
    let rec = recorder();
    rec.live_rec(1, MidiEvent::note_on(0, 60, 100), 0);
    rec.live_rec(1, MidiEvent::note_off(0, 60, 0), 100);

    let touched = rec.consolidate();
    assert_eq!(touched, BTreeSet::from([1]));
    assert_eq!(rec.live_count(), 0);

    let actions = rec.actions_on_channel(1);
    assert_eq!(actions.len(), 2);
    let (first, second) = (actions[0], actions[1]);
    assert_eq!(first.frame, 0);
    assert_eq!(second.frame, 100);
    assert_eq!(first.next_id, Some(second.id));
    assert_eq!(second.prev_id, Some(first.id));
}

#[test]
fn test_consolidate_keeps_unpaired_events() {
    let rec = recorder();
    rec.live_rec(1, MidiEvent::note_on(0, 60, 100), 0);
    rec.live_rec(2, MidiEvent::note_off(0, 60, 0), 100);
    // Control changes never reach the scratch buffer
    rec.live_rec(1, MidiEvent::new(0xB0, 7, 100), 50);

    let touched = rec.consolidate();
    assert_eq!(touched, BTreeSet::from([1, 2]));
    let all: Vec<_> = rec.snapshot().iter().copied().collect();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|a| a.prev_id.is_none() && a.next_id.is_none()));
}

#[test]
fn test_identical_rec_inserts_once() {
    let rec = recorder();
    let event = MidiEvent::note_on(0, 60, 100);
    assert!(rec.rec(3, 480, event).is_some());
    assert!(rec.rec(3, 480, event).is_none());
    assert_eq!(rec.actions_on_channel(3).len(), 1);

    // Same event elsewhere is a different action
    assert!(rec.rec(3, 481, event).is_some());
    assert!(rec.rec(4, 480, event).is_some());
    assert_eq!(rec.snapshot().len(), 3);
}

#[test]
fn test_rescale_by_one_leaves_map_identical() {
    let rec = recorder();
    rec.rec_pair(
        1,
        7,
        12345,
        MidiEvent::note_on(0, 60, 100),
        MidiEvent::note_off(0, 60, 0),
    )
    .unwrap();
    rec.rec(2, 99, MidiEvent::note_on(0, 62, 90)).unwrap();

    let before = rec.snapshot();
    rec.update_bpm(1.0);
    let after = rec.snapshot();
    assert_eq!(*before, *after);
    assert_eq!(serialize_actions(&before), serialize_actions(&after));
}

fn sample_log() -> Vec<PatchAction> {
    let on = MidiEvent::note_on(0, 60, 100).raw();
    let off = MidiEvent::note_off(0, 60, 0).raw();
    vec![
        PatchAction {
            id: 1,
            channel_id: 4,
            frame: 0,
            event: on,
            prev_id: None,
            next_id: Some(2),
        },
        PatchAction {
            id: 3,
            channel_id: 5,
            frame: 500,
            event: on,
            prev_id: None,
            next_id: None,
        },
        PatchAction {
            id: 2,
            channel_id: 4,
            frame: 22050,
            event: off,
            prev_id: Some(1),
            next_id: None,
        },
        PatchAction {
            id: 7,
            channel_id: 4,
            frame: 30000,
            event: MidiEvent::new(0xB0, 1, 64).raw(),
            prev_id: None,
            next_id: None,
        },
    ]
}

#[test]
fn test_serialize_deserialize_round_trip() {
    let log = sample_log();
    let map = deserialize_actions(&log).unwrap();
    assert_eq!(serialize_actions(&map), log);

    let json = to_json(&log).unwrap();
    assert!(json.contains("\"channelId\""));
    assert_eq!(from_json(&json).unwrap(), log);
}

#[test]
fn test_load_replaces_actions_and_keeps_ids_fresh() {
    let rec = recorder();
    rec.rec(9, 1, MidiEvent::note_on(0, 1, 1)).unwrap();
    rec.load(&sample_log()).unwrap();

    assert!(rec.actions_on_channel(9).is_empty());
    assert_eq!(rec.serialize(), sample_log());
    assert!(rec.generate_id() > 7);
}

#[test]
fn test_bpm_change_keeps_musical_position() {
    let parts = engine();
    let rec = parts.engine.recorder();
    let ch = parts.engine.mixer_handler().add_channel("a");
    // Second beat at 120 bpm
    rec.rec(ch, 22050, MidiEvent::note_on(0, 60, 100)).unwrap();

    parts.engine.set_bpm(60.0);
    let actions = rec.actions_on_channel(ch);
    assert_eq!(actions[0].frame, 44100);
    assert_eq!(parts.engine.clock().frames_in_beat(), 44100);
}

#[test]
fn test_sample_rate_change_rescales_actions() {
    let parts = engine();
    let rec = parts.engine.recorder();
    rec.rec(4, 22050, MidiEvent::note_on(0, 60, 100)).unwrap();

    parts.engine.clock().set_sample_rate(48000);
    assert_eq!(rec.actions_on_channel(4)[0].frame, 24000);
    assert_eq!(parts.engine.clock().frames_in_beat(), 24000);
}

#[test]
fn test_live_performance_is_recorded() {
    let mut parts = engine();
    let ch = parts.engine.mixer_handler().add_channel("drums");

    parts.engine.toggle_action_rec();
    assert!(parts.engine.rec_manager().is_recording_action());
    // Recording actions starts the transport
    assert_eq!(parts.engine.status(), ClockStatus::Running);

    render(&mut parts, 1000);
    assert!(parts.engine.press(ch));
    parts.dispatcher.process();
    render(&mut parts, 500);
    assert!(parts.engine.send(Event::KeyRelease { channel: ch }));
    parts.dispatcher.process();
    assert_eq!(parts.engine.recorder().live_count(), 2);

    parts.engine.toggle_action_rec();
    let actions = parts.engine.recorder().actions_on_channel(ch);
    assert_eq!(actions.len(), 2);
    assert_eq!((actions[0].frame, actions[1].frame), (1000, 1500));
    assert_eq!(actions[0].next_id, Some(actions[1].id));

    let model = parts.engine.model().peek();
    assert!(model.channel(ch).unwrap().read_actions);
}

#[test]
fn test_stopping_the_transport_ends_action_recording() {
    let mut parts = engine();
    let ch = parts.engine.mixer_handler().add_channel("keys");

    parts.engine.toggle_action_rec();
    render(&mut parts, 256);
    parts.engine.press(ch);
    parts.dispatcher.process();

    parts.engine.stop();
    parts.dispatcher.process();
    assert!(!parts.engine.rec_manager().is_recording_action());
    assert_eq!(parts.engine.recorder().live_count(), 0);
    assert_eq!(parts.engine.recorder().actions_on_channel(ch).len(), 1);
}

#[test]
fn test_nothing_recorded_while_stopped() {
    let mut parts = engine();
    let ch = parts.engine.mixer_handler().add_channel("a");
    parts.engine.press(ch);
    parts.dispatcher.process();
    assert_eq!(parts.engine.recorder().live_count(), 0);
}

#[test]
fn test_channel_clone_and_delete_follow_actions() {
    let parts = engine();
    let handler = parts.engine.mixer_handler();
    let rec = parts.engine.recorder();
    let ch = handler.add_channel("a");
    rec.rec_pair(
        ch,
        0,
        100,
        MidiEvent::note_on(0, 60, 100),
        MidiEvent::note_off(0, 60, 0),
    )
    .unwrap();

    let copy = handler.clone_channel(ch).unwrap();
    let copied = rec.actions_on_channel(copy);
    assert_eq!(copied.len(), 2);
    assert_eq!(copied[0].next_id, Some(copied[1].id));

    handler.delete_channel(ch).unwrap();
    assert!(rec.actions_on_channel(ch).is_empty());
    assert_eq!(rec.actions_on_channel(copy).len(), 2);
}

#[test]
fn test_queries_and_deletes() {
    let rec = recorder();
    let (on, off) = rec
        .rec_pair(
            1,
            100,
            200,
            MidiEvent::note_on(0, 60, 100),
            MidiEvent::note_off(0, 60, 0),
        )
        .unwrap();
    let lone = rec.rec(2, 100, MidiEvent::note_on(0, 64, 100)).unwrap();

    assert_eq!(rec.actions_on_frame(100).len(), 2);
    assert!(rec.actions_on_frame(150).is_empty());
    let mut frames = Vec::new();
    rec.for_each_action(|a| frames.push(a.frame));
    assert_eq!(frames, vec![100, 100, 200]);

    assert!(rec.delete_action(lone.id));
    assert!(!rec.delete_action(lone.id));
    assert_eq!(rec.delete_action_pair(on.id, off.id), 2);
    assert!(rec.snapshot().is_empty());
}

#[test]
fn test_snap_tolerance_is_configurable() {
    let model = Arc::new(SharedModel::new(Model::with_internal_channels()));
    let rec = ActionRecorder::new(Arc::clone(&model), 6);
    model.mutate(loop_engine::SwapType::Hard, |m| {
        m.clock.quantize = 4;
        m.clock.recompute(44100);
    });
    // Step 5512: 2204 * 2.5 = 5510, two frames short of it
    rec.rec(1, 2204, MidiEvent::note_on(0, 60, 100)).unwrap();
    rec.update_bpm(2.5);
    assert_eq!(rec.actions_on_channel(1)[0].frame, 5512);

    rec.set_snap_tolerance(0);
    assert_eq!(rec.snap_tolerance(), 0);
    rec.rec(2, 2204, MidiEvent::note_on(0, 60, 100)).unwrap();
    rec.update_bpm(2.5);
    assert_eq!(rec.actions_on_channel(2)[0].frame, 5510);
}

#[test]
fn test_patch_sample_rate_conversion() {
    let rec = recorder();
    rec.load(&sample_log()).unwrap();
    rec.update_sample_rate(48000, 44100);
    let frames: Vec<usize> = rec.serialize().iter().map(|a| a.frame).collect();
    assert_eq!(frames, vec![0, 544, 24000, 32653]);
}
