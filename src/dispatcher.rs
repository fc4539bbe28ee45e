// Event dispatcher - Applies queued intents off the audio thread
//
// UI and MIDI threads push `Event`s, the mixer pushes `MixerEvent`s. The
// dispatcher drains all three queues at a fixed rate and performs the
// channel reactions, structural edits and transport changes they ask for.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Producer};

use crate::actions::recorder::ActionRecorder;
use crate::handlers::MixerHandler;
use crate::messaging::channels::{EventConsumer, MixerEventConsumer, NotificationProducer};
use crate::messaging::event::{Event, MixerEvent};
use crate::messaging::notification::{Notification, NotificationCategory};
use crate::midi::event::MidiEvent;
use crate::model::channel::{Channel, ChannelId, ChannelStatus, PlayRequest};
use crate::model::{Model, SharedModel};
use crate::sequencer::clock::Clock;
use crate::sequencer::transport::Transport;

/// Upper bound on sequencer intents collected per pass
const MAX_SEQUENCER_INTENTS: usize = 64;

/// Note number used for actions recorded from key presses
const KEY_ACTION_NOTE: u8 = 0;

pub struct EventDispatcher {
    ui_rx: EventConsumer,
    midi_rx: EventConsumer,
    mixer_rx: MixerEventConsumer,
    notifications: Option<NotificationProducer>,
    model: Arc<SharedModel<Model>>,
    clock: Arc<Clock>,
    transport: Arc<Transport>,
    recorder: Arc<ActionRecorder>,
    mixer_handler: Arc<MixerHandler>,
    sequencer_intents: Vec<Event>,
}

impl EventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ui_rx: EventConsumer,
        midi_rx: EventConsumer,
        mixer_rx: MixerEventConsumer,
        model: Arc<SharedModel<Model>>,
        clock: Arc<Clock>,
        transport: Arc<Transport>,
        recorder: Arc<ActionRecorder>,
        mixer_handler: Arc<MixerHandler>,
    ) -> Self {
        Self {
            ui_rx,
            midi_rx,
            mixer_rx,
            notifications: None,
            model,
            clock,
            transport,
            recorder,
            mixer_handler,
            sequencer_intents: Vec::with_capacity(MAX_SEQUENCER_INTENTS),
        }
    }

    /// Forward render-side events to the UI as notifications
    pub fn set_notifications(&mut self, tx: NotificationProducer) {
        self.notifications = Some(tx);
    }

    fn notify(&mut self, notification: Notification) {
        if let Some(tx) = self.notifications.as_mut() {
            let _ = tx.try_push(notification);
        }
    }

    /// Drain every queue once. Returns the number of events handled.
    pub fn process(&mut self) -> usize {
        let mut handled = 0;

        while let Some(event) = self.mixer_rx.try_pop() {
            self.on_mixer_event(event);
            handled += 1;
        }
        while let Some(event) = self.ui_rx.try_pop() {
            self.on_event(event);
            handled += 1;
        }
        while let Some(event) = self.midi_rx.try_pop() {
            self.on_event(event);
            handled += 1;
        }

        if !self.sequencer_intents.is_empty() {
            self.transport.react(&self.sequencer_intents);
            self.sequencer_intents.clear();
        }
        handled
    }

    fn on_mixer_event(&mut self, event: MixerEvent) {
        let mixer = Arc::clone(self.mixer_handler.mixer());
        match event {
            MixerEvent::SignalThresholdReached => {
                info!("[dispatcher] input signal over threshold");
                mixer.exec_signal_cb();
            }
            MixerEvent::EndOfRecording => {
                info!("[dispatcher] end of recording");
                mixer.exec_end_of_rec_cb();
            }
        }
        self.notify(Notification::from_mixer_event(event));
    }

    fn on_event(&mut self, event: Event) {
        if event.is_sequencer() {
            if self.sequencer_intents.len() < MAX_SEQUENCER_INTENTS {
                self.sequencer_intents.push(event);
            } else {
                warn!("[dispatcher] too many transport intents, dropping {:?}", event);
            }
            return;
        }

        let result = match event {
            Event::KeyPress { channel, velocity } => {
                self.key_press(channel, velocity);
                Ok(())
            }
            Event::KeyRelease { channel } => {
                self.key_release(channel);
                Ok(())
            }
            Event::KeyKill { channel } => {
                self.key_kill(channel);
                Ok(())
            }
            Event::SetMute { channel, mute } => self.mixer_handler.set_mute(channel, mute),
            Event::SetSolo { channel, solo } => self.mixer_handler.set_solo(channel, solo),
            Event::SetVolume { channel, volume } => self.mixer_handler.set_volume(channel, volume),
            Event::ToggleReadActions { channel } => self.mixer_handler.toggle_read_actions(channel),
            Event::ToggleArm { channel } => self.mixer_handler.toggle_arm(channel),
            Event::Midi(midi) => {
                self.on_midi(midi);
                Ok(())
            }
            Event::Function(f) => {
                f();
                Ok(())
            }
            Event::SequencerStart | Event::SequencerStop | Event::SequencerRewind => Ok(()),
        };
        if let Err(e) = result {
            warn!("[dispatcher] {}", e);
            self.notify(Notification::warning(NotificationCategory::Mixer, e.to_string()));
        }
    }

    fn with_channel(&self, id: ChannelId, f: impl FnOnce(&Channel)) {
        let model = self.model.peek();
        match model.channel(id) {
            Some(channel) if !channel.is_internal() => f(channel),
            _ => debug!("[dispatcher] no sample channel {}", id),
        }
    }

    fn recording_live(&self) -> bool {
        self.model.peek().rec.recording_actions && self.clock.is_running()
    }

    fn key_press(&self, id: ChannelId, velocity: u8) {
        self.with_channel(id, |channel| {
            let request = match (channel.status(), channel.mode.is_loop()) {
                (ChannelStatus::Off, _) => PlayRequest::Start,
                (ChannelStatus::Play, false) => PlayRequest::Start,
                (ChannelStatus::Play, true) => PlayRequest::Stop,
                (ChannelStatus::Wait, _) => PlayRequest::Kill,
            };
            channel.shared.request(request);
        });
        if self.recording_live() {
            let frame = self.clock.current_frame();
            self.recorder
                .live_rec(id, MidiEvent::note_on(0, KEY_ACTION_NOTE, velocity), frame);
        }
    }

    fn key_release(&self, id: ChannelId) {
        // Releases only matter to the action log
        if self.recording_live() {
            let frame = self.clock.current_frame();
            self.recorder
                .live_rec(id, MidiEvent::note_off(0, KEY_ACTION_NOTE, 0), frame);
        }
    }

    fn key_kill(&self, id: ChannelId) {
        self.with_channel(id, |channel| channel.shared.request(PlayRequest::Kill));
    }

    /// Route note messages to the channels bound to that key
    fn on_midi(&self, event: MidiEvent) {
        if !event.is_note_on_off() {
            return;
        }
        let targets: Vec<ChannelId> = self
            .model
            .peek()
            .user_channels()
            .filter(|c| c.midi_key == Some(event.note()))
            .map(|c| c.id)
            .collect();

        // A note on with zero velocity is a note off
        let is_on = event.is_note_on() && event.velocity() > 0;
        for id in targets {
            if is_on {
                self.key_press(id, event.velocity());
            } else {
                self.key_release(id);
            }
        }
    }

    /// Run `process` every `rate` on a dedicated thread
    pub fn spawn(mut self, rate: Duration) -> std::io::Result<DispatcherHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || {
                info!("[dispatcher] started ({} ms)", rate.as_millis());
                while flag.load(Ordering::Relaxed) {
                    self.process();
                    thread::sleep(rate);
                }
                // Apply whatever was queued before the stop
                self.process();
                info!("[dispatcher] stopped");
            })?;
        Ok(DispatcherHandle {
            running,
            handle: Some(handle),
        })
    }
}

pub struct DispatcherHandle {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
