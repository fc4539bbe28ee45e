// Engine - Builds every component once and exposes the control surface
//
// `Engine::new` returns the control-side `Engine` together with the two
// pieces that must be moved to their own threads: the `Mixer` (audio thread)
// and the `EventDispatcher`.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use ringbuf::traits::Producer;

use crate::actions::recorder::ActionRecorder;
use crate::conf::{ConfigError, EngineConfig, InputRecMode, RecTriggerMode, SyncMode};
use crate::dispatcher::EventDispatcher;
use crate::handlers::{HandlerError, MixerHandler, RecManager};
use crate::messaging::channels::{
    EVENT_QUEUE_CAPACITY, EventProducer, MIXER_EVENT_QUEUE_CAPACITY, SYNC_QUEUE_CAPACITY,
    create_event_channel, create_mixer_event_channel, create_sync_channel,
};
use crate::messaging::event::Event;
use crate::midi::sync::{MidiOutWorker, MidirSink, SyncControl, SyncTicker, shared_sink};
use crate::mixer::{Mixer, MixerShared, Peak, RenderInfo, RenderInfoCell};
use crate::model::channel::ChannelId;
use crate::model::{Model, SharedModel};
use crate::sequencer::clock::{Clock, ClockStatus};
use crate::sequencer::driver::{
    ExternalState, ExternalTransport, InternalDriver, SlaveDriver, TransportChange,
    TransportDriver, TransportReceiver,
};
use crate::sequencer::metronome::{Metronome, MetronomeShared};
use crate::sequencer::sequencer::Sequencer;
use crate::sequencer::transport::Transport;

/// Largest audio block the mixer accepts without reallocating
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Everything `Engine::new` builds
pub struct EngineParts {
    pub engine: Engine,
    pub mixer: Mixer,
    pub dispatcher: EventDispatcher,
}

pub struct Engine {
    config: EngineConfig,
    model: Arc<SharedModel<Model>>,
    recorder: Arc<ActionRecorder>,
    clock: Arc<Clock>,
    transport: Arc<Transport>,
    mixer: Arc<MixerShared>,
    mixer_handler: Arc<MixerHandler>,
    rec_manager: Arc<RecManager>,
    metronome: Arc<MetronomeShared>,
    render_info: Arc<RenderInfoCell>,
    receiver: Option<TransportReceiver>,
    ui_tx: Mutex<EventProducer>,
    midi_tx: Option<EventProducer>,
    midi_out: Option<MidiOutWorker>,
}

fn model_from_config(config: &EngineConfig) -> Model {
    let mut model = Model::with_internal_channels();
    model.mixer.input_enabled = config.input_enabled;
    model.mixer.limit_output = config.limit_output;
    model.mixer.rec_trigger_level = config.rec_trigger_level;
    model.rec.rec_trigger_mode = config.rec_trigger_mode;
    model.rec.input_rec_mode = config.input_rec_mode;
    model
}

impl Engine {
    /// `external` makes an external transport the master of start, stop,
    /// rewind and tempo.
    pub fn new(
        config: EngineConfig,
        external: Option<Arc<dyn ExternalTransport>>,
    ) -> Result<EngineParts, ConfigError> {
        config.validate()?;
        let sample_rate = config.sample_rate;

        let model = Arc::new(SharedModel::new(model_from_config(&config)));
        let recorder = Arc::new(ActionRecorder::new(
            Arc::clone(&model),
            config.rescale_snap_tolerance,
        ));

        // MIDI sync output
        let sink = match config.midi_sync {
            SyncMode::None => None,
            _ => MidirSink::connect(config.midi_out_port.as_deref()).map(shared_sink),
        };
        let sync_control = Arc::new(SyncControl::new(config.midi_sync, sink.clone()));
        let (ticker, midi_out) = match sink {
            Some(sink) => {
                let (sync_tx, sync_rx) = create_sync_channel(SYNC_QUEUE_CAPACITY);
                let ticker =
                    SyncTicker::new(config.midi_sync, config.midi_tc_fps, sample_rate, Some(sync_tx));
                let worker = match MidiOutWorker::spawn(sync_rx, sink) {
                    Ok(worker) => Some(worker),
                    Err(e) => {
                        warn!("[engine] cannot start MIDI sync output: {}", e);
                        None
                    }
                };
                (ticker, worker)
            }
            None => (SyncTicker::disabled(), None),
        };

        let driver: Arc<dyn TransportDriver> = match &external {
            Some(ext) => Arc::new(SlaveDriver::new(Arc::clone(ext))),
            None => Arc::new(InternalDriver),
        };
        info!("[engine] transport driver: {}", driver.name());

        let clock = Arc::new(Clock::new(
            Arc::clone(&model),
            Arc::clone(&recorder),
            Arc::clone(&driver),
            sync_control,
            sample_rate,
        ));

        let metronome = Arc::new(MetronomeShared::new(config.metronome_volume));
        let sequencer = Sequencer::new(
            Arc::clone(&model.peek().clock.state),
            ticker,
            Metronome::new(sample_rate as f32, Arc::clone(&metronome)),
        );
        let transport = Arc::new(Transport::new(
            Arc::clone(&model),
            Arc::clone(&clock),
            driver,
            sequencer.quantizer_handle(),
        ));
        let receiver = external
            .as_ref()
            .map(|_| TransportReceiver::new(Arc::clone(&transport), Arc::clone(&clock)));

        let mixer_shared = Arc::new(MixerShared::new());
        let (mixer_tx, mixer_rx) = create_mixer_event_channel(MIXER_EVENT_QUEUE_CAPACITY);
        let mixer = Mixer::new(
            Arc::clone(&model),
            Arc::clone(&mixer_shared),
            sequencer,
            mixer_tx,
            (config.buffer_size as usize).max(MAX_BLOCK_FRAMES),
        );

        let mixer_handler = Arc::new(MixerHandler::new(
            Arc::clone(&model),
            Arc::clone(&mixer_shared),
            Arc::clone(&recorder),
            Arc::clone(&clock),
            config.treat_recs_as_loops,
        ));
        let rec_manager = RecManager::new(
            Arc::clone(&model),
            Arc::clone(&clock),
            Arc::clone(&transport),
            Arc::clone(&recorder),
            Arc::clone(&mixer_handler),
        );

        let render_info = Arc::new(RenderInfoCell::new(RenderInfo::from_model(&model.peek())));
        {
            let cell = Arc::clone(&render_info);
            model.set_on_swap(move |m, _| cell.store(RenderInfo::from_model(m)));
        }

        Self::install_transport_hooks(
            &transport,
            Arc::downgrade(&rec_manager),
            Arc::downgrade(&mixer_handler),
            config.chans_stop_on_seq_halt,
        );

        let (ui_tx, ui_rx) = create_event_channel(EVENT_QUEUE_CAPACITY);
        let (midi_tx, midi_rx) = create_event_channel(EVENT_QUEUE_CAPACITY);
        let dispatcher = EventDispatcher::new(
            ui_rx,
            midi_rx,
            mixer_rx,
            Arc::clone(&model),
            Arc::clone(&clock),
            Arc::clone(&transport),
            Arc::clone(&recorder),
            Arc::clone(&mixer_handler),
        );

        info!(
            "[engine] ready: {} Hz, block {} frames, sync {:?}",
            sample_rate, config.buffer_size, config.midi_sync
        );

        let engine = Engine {
            config,
            model,
            recorder,
            clock,
            transport,
            mixer: mixer_shared,
            mixer_handler,
            rec_manager,
            metronome,
            render_info,
            receiver,
            ui_tx: Mutex::new(ui_tx),
            midi_tx: Some(midi_tx),
            midi_out,
        };
        Ok(EngineParts {
            engine,
            mixer,
            dispatcher,
        })
    }

    fn install_transport_hooks(
        transport: &Transport,
        rec_manager: Weak<RecManager>,
        mixer_handler: Weak<MixerHandler>,
        stop_channels: bool,
    ) {
        transport.set_on_about_start(|status| {
            debug!("[engine] transport about to start from {:?}", status);
        });
        transport.set_on_about_stop(move || {
            if let Some(rec) = rec_manager.upgrade() {
                rec.stop_all();
            }
            if stop_channels {
                if let Some(handler) = mixer_handler.upgrade() {
                    handler.stop_all_channels();
                }
            }
        });
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<SharedModel<Model>> {
        &self.model
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn recorder(&self) -> &Arc<ActionRecorder> {
        &self.recorder
    }

    pub fn mixer_handler(&self) -> &Arc<MixerHandler> {
        &self.mixer_handler
    }

    pub fn rec_manager(&self) -> &Arc<RecManager> {
        &self.rec_manager
    }

    pub fn mixer(&self) -> &Arc<MixerShared> {
        &self.mixer
    }

    pub fn metronome(&self) -> &Arc<MetronomeShared> {
        &self.metronome
    }

    /// Per-block parameters for the audio host
    pub fn render_info(&self) -> Arc<RenderInfoCell> {
        Arc::clone(&self.render_info)
    }

    /// Producer for the MIDI input thread. Available once.
    pub fn take_midi_producer(&mut self) -> Option<EventProducer> {
        self.midi_tx.take()
    }

    /// Queue an intent for the dispatcher. False when the queue is full.
    pub fn send(&self, event: Event) -> bool {
        match self.ui_tx.lock() {
            Ok(mut tx) => tx.try_push(event).is_ok(),
            Err(poisoned) => poisoned.into_inner().try_push(event).is_ok(),
        }
    }

    pub fn start(&self) -> bool {
        self.send(Event::SequencerStart)
    }

    pub fn stop(&self) -> bool {
        self.send(Event::SequencerStop)
    }

    pub fn rewind(&self) -> bool {
        self.send(Event::SequencerRewind)
    }

    pub fn toggle_play(&self) -> bool {
        if self.clock.is_running() {
            self.stop()
        } else {
            self.start()
        }
    }

    pub fn status(&self) -> ClockStatus {
        self.clock.status()
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.clock.set_bpm(bpm);
    }

    pub fn set_beats(&self, beats: u32, bars: u32) {
        self.clock.set_beats(beats, bars);
    }

    pub fn set_quantize(&self, quantize: u32) {
        self.clock.set_quantize(quantize);
    }

    pub fn toggle_metronome(&self) {
        self.metronome.toggle();
    }

    pub fn set_rec_trigger_mode(&self, mode: RecTriggerMode) {
        self.rec_manager.set_rec_trigger_mode(mode);
    }

    pub fn set_input_rec_mode(&self, mode: InputRecMode) {
        self.rec_manager.set_input_rec_mode(mode);
    }

    pub fn toggle_action_rec(&self) {
        self.rec_manager.toggle_action_rec();
    }

    pub fn toggle_input_rec(&self) -> Result<(), HandlerError> {
        self.rec_manager.toggle_input_rec()
    }

    pub fn set_mute(&self, channel: ChannelId, mute: bool) -> bool {
        self.send(Event::SetMute { channel, mute })
    }

    pub fn set_solo(&self, channel: ChannelId, solo: bool) -> bool {
        self.send(Event::SetSolo { channel, solo })
    }

    pub fn set_volume(&self, channel: ChannelId, volume: f32) -> bool {
        self.send(Event::SetVolume { channel, volume })
    }

    pub fn press(&self, channel: ChannelId) -> bool {
        self.send(Event::KeyPress {
            channel,
            velocity: 127,
        })
    }

    /// Feed the latest state of the external transport master
    pub fn recv_external(&self, state: ExternalState) -> Vec<TransportChange> {
        match &self.receiver {
            Some(receiver) => receiver.recv(state),
            None => Vec::new(),
        }
    }

    pub fn peak_out(&self) -> Peak {
        self.mixer.peak_out()
    }

    pub fn peak_in(&self) -> Peak {
        self.mixer.peak_in()
    }

    pub fn dispatcher_rate(&self) -> Duration {
        Duration::from_millis(self.config.dispatcher_rate_ms)
    }

    pub fn start_rendering(&self) {
        self.mixer_handler.start_rendering();
    }

    /// Stop rendering and the MIDI sync output
    pub fn shutdown(&mut self) {
        self.mixer_handler.stop_rendering();
        if let Some(mut worker) = self.midi_out.take() {
            worker.stop();
        }
        let retired = self.model.collect();
        debug!("[engine] shut down, {} retired snapshots reclaimed", retired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        starts: AtomicUsize,
    }

    impl ExternalTransport for CountingTransport {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn stop(&self) {}
        fn locate(&self, _frame: crate::model::Frame) {}
        fn set_bpm(&self, _bpm: f32) {}
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            buffer_size: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::new(config, None).is_err());
    }

    #[test]
    fn test_render_info_follows_publishes() {
        let parts = Engine::new(EngineConfig::default(), None).unwrap();
        let engine = parts.engine;
        assert!(!engine.render_info().load().in_to_out);
        engine.mixer_handler().set_in_to_out(true);
        assert!(engine.render_info().load().in_to_out);
    }

    #[test]
    fn test_transport_round_trip_through_dispatcher() {
        let EngineParts {
            engine,
            mut mixer,
            mut dispatcher,
        } = Engine::new(EngineConfig::default(), None).unwrap();
        engine.start_rendering();

        assert!(engine.start());
        dispatcher.process();
        assert_eq!(engine.status(), ClockStatus::Running);

        let mut out = AudioBuffer::stereo(512);
        let info = engine.render_info().load();
        mixer.render(&mut out, None, &info);
        assert_eq!(engine.clock().current_frame(), 512);

        assert!(engine.stop());
        dispatcher.process();
        assert_eq!(engine.status(), ClockStatus::Stopped);
    }

    #[test]
    fn test_external_transport_takes_over() {
        let external = Arc::new(CountingTransport::default());
        let parts = Engine::new(EngineConfig::default(), Some(external.clone())).unwrap();
        let mut dispatcher = parts.dispatcher;
        let engine = parts.engine;

        engine.start();
        dispatcher.process();
        assert_eq!(external.starts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(), ClockStatus::Stopped);

        let changes = engine.recv_external(ExternalState {
            frame: 0,
            bpm: 120.0,
            running: true,
        });
        assert!(changes.contains(&TransportChange::Start));
        assert_eq!(engine.status(), ClockStatus::Running);
    }
}
