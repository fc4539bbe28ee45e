// Rec manager - Action and input recording sessions
//
// Input recording can be armed on signal: the clock goes WAITING and the
// take starts when the mixer reports the input crossing the trigger level.
// Both callbacks handed to the mixer run on the dispatcher thread.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};

use super::{HandlerError, MixerHandler};
use crate::actions::recorder::ActionRecorder;
use crate::conf::{InputRecMode, RecTriggerMode};
use crate::mixer::MixerShared;
use crate::model::channel::ChannelId;
use crate::model::{Model, SharedModel, SwapType};
use crate::sequencer::clock::{Clock, ClockStatus};
use crate::sequencer::transport::Transport;

pub struct RecManager {
    me: Weak<RecManager>,
    model: Arc<SharedModel<Model>>,
    clock: Arc<Clock>,
    transport: Arc<Transport>,
    recorder: Arc<ActionRecorder>,
    mixer: Arc<MixerShared>,
    mixer_handler: Arc<MixerHandler>,
}

impl RecManager {
    pub fn new(
        model: Arc<SharedModel<Model>>,
        clock: Arc<Clock>,
        transport: Arc<Transport>,
        recorder: Arc<ActionRecorder>,
        mixer_handler: Arc<MixerHandler>,
    ) -> Arc<Self> {
        let mixer = Arc::clone(mixer_handler.mixer());
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            model,
            clock,
            transport,
            recorder,
            mixer,
            mixer_handler,
        })
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording_action() || self.is_recording_input()
    }

    pub fn is_recording_action(&self) -> bool {
        self.model.peek().rec.recording_actions
    }

    pub fn is_recording_input(&self) -> bool {
        self.model.peek().rec.recording_input
    }

    /// Armed for a signal-triggered take that has not started yet. This
    /// includes a threshold already crossed whose start callback is still
    /// queued for the dispatcher.
    pub fn is_waiting_for_signal(&self) -> bool {
        self.clock.status() == ClockStatus::Waiting
            && (self.mixer.is_signal_armed() || self.mixer.has_signal_callback())
    }

    pub fn set_rec_trigger_mode(&self, mode: RecTriggerMode) {
        self.model.mutate(SwapType::None, |m| m.rec.rec_trigger_mode = mode);
    }

    pub fn set_input_rec_mode(&self, mode: InputRecMode) {
        self.model.mutate(SwapType::None, |m| m.rec.input_rec_mode = mode);
    }

    pub fn start_action_rec(&self) {
        if self.is_recording_action() {
            return;
        }
        self.model.mutate(SwapType::Soft, |m| m.rec.recording_actions = true);
        if !self.clock.is_running() {
            self.transport.start();
        }
        info!("[recManager] action recording started");
    }

    /// Merge the performance into the action log. Returns the channels that
    /// received actions.
    pub fn stop_action_rec(&self) -> BTreeSet<ChannelId> {
        if !self.is_recording_action() {
            return BTreeSet::new();
        }
        self.model.mutate(SwapType::Soft, |m| m.rec.recording_actions = false);
        let touched = self.recorder.consolidate();
        if !touched.is_empty() {
            self.model.mutate(SwapType::Soft, |m| {
                for id in &touched {
                    if let Some(channel) = m.channel_mut(*id) {
                        channel.read_actions = true;
                    }
                }
            });
        }
        info!("[recManager] action recording stopped, {} channel(s) touched", touched.len());
        touched
    }

    pub fn toggle_action_rec(&self) {
        if self.is_recording_action() {
            self.stop_action_rec();
        } else {
            self.start_action_rec();
        }
    }

    /// Arm input recording on every armed channel
    pub fn start_input_rec(&self) -> Result<(), HandlerError> {
        if self.is_recording_input() || self.is_waiting_for_signal() {
            return Ok(());
        }
        let (trigger, mode, recordable) = {
            let model = self.model.peek();
            (
                model.rec.rec_trigger_mode,
                model.rec.input_rec_mode,
                model.has_input_recordable_channels(),
            )
        };
        if !recordable {
            return Err(HandlerError::NothingToRecord);
        }

        let max_frames = match mode {
            InputRecMode::Rigid => self.clock.frames_in_loop(),
            InputRecMode::Free => self.clock.max_frames_in_loop(),
        };
        self.mixer.alloc_rec_buffer(max_frames);
        self.model.mutate(SwapType::Soft, |m| m.rec.max_frames_to_rec = max_frames);

        if mode == InputRecMode::Free {
            let me = self.me.clone();
            self.mixer.set_end_of_rec_callback(move || {
                if let Some(manager) = me.upgrade() {
                    info!("[recManager] record buffer full");
                    if let Err(e) = manager.stop_input_rec() {
                        warn!("[recManager] {}", e);
                    }
                }
            });
        }

        match trigger {
            RecTriggerMode::Signal => {
                self.transport.rewind();
                self.clock.set_status(ClockStatus::Waiting);
                let me = self.me.clone();
                self.mixer.set_signal_callback(move || {
                    if let Some(manager) = me.upgrade() {
                        manager.begin_take(mode);
                        manager.clock.set_status(ClockStatus::Running);
                    }
                });
                info!("[recManager] input recording armed, waiting for signal");
            }
            RecTriggerMode::Normal => {
                if mode == InputRecMode::Free {
                    self.transport.rewind();
                }
                self.begin_take(mode);
                if !self.clock.is_running() {
                    self.transport.start();
                }
                info!("[recManager] input recording started ({:?})", mode);
            }
        }
        Ok(())
    }

    fn begin_take(&self, mode: InputRecMode) {
        let from = match mode {
            InputRecMode::Rigid => self.clock.current_frame(),
            InputRecMode::Free => 0,
        };
        self.mixer.start_input_rec(from);
        self.model.mutate(SwapType::Soft, |m| m.rec.recording_input = true);
        debug!("[recManager] take started at frame {}", from);
    }

    /// Stop the take and write it into the armed channels. A take still
    /// waiting for signal is cancelled without committing anything.
    pub fn stop_input_rec(&self) -> Result<Vec<ChannelId>, HandlerError> {
        if self.is_waiting_for_signal() {
            self.mixer.clear_signal_callback();
            self.mixer.clear_end_of_rec_callback();
            self.clock.set_status(ClockStatus::Stopped);
            self.mixer.clear_rec_buffer();
            info!("[recManager] signal wait cancelled");
            return Ok(Vec::new());
        }
        if !self.is_recording_input() {
            return Ok(Vec::new());
        }

        let recorded = self.mixer.stop_input_rec();
        let (mode, max_frames) = {
            let model = self.model.peek();
            (model.rec.input_rec_mode, model.rec.max_frames_to_rec)
        };
        self.model.mutate(SwapType::Soft, |m| m.rec.recording_input = false);

        let frames = match mode {
            // Rigid takes wrap over the loop: keep the whole loop
            InputRecMode::Rigid => max_frames,
            InputRecMode::Free => {
                let frames = recorded.min(max_frames);
                if frames > 0 {
                    let bpm = self.clock.calc_bpm_from_rec(frames);
                    self.clock.set_bpm(bpm);
                    self.transport.rewind();
                }
                frames
            }
        };
        info!("[recManager] input recording stopped, {} frames", frames);
        self.mixer_handler.finalize_input_rec(frames)
    }

    pub fn toggle_input_rec(&self) -> Result<(), HandlerError> {
        if self.is_recording_input() || self.is_waiting_for_signal() {
            self.stop_input_rec().map(|_| ())
        } else {
            self.start_input_rec()
        }
    }

    /// Stop whatever is recording; used when the sequencer halts
    pub fn stop_all(&self) {
        if self.is_recording_action() {
            self.stop_action_rec();
        }
        if self.is_recording_input() || self.is_waiting_for_signal() {
            if let Err(e) = self.stop_input_rec() {
                warn!("[recManager] {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::recorder::DEFAULT_SNAP_TOLERANCE;
    use crate::midi::event::MidiEvent;
    use crate::midi::sync::SyncControl;
    use crate::sequencer::driver::{InternalDriver, TransportDriver};
    use crate::sequencer::quantizer::Quantizer;

    struct Fixture {
        model: Arc<SharedModel<Model>>,
        clock: Arc<Clock>,
        recorder: Arc<ActionRecorder>,
        mixer_handler: Arc<MixerHandler>,
        rec: Arc<RecManager>,
    }

    fn fixture() -> Fixture {
        let model = Arc::new(SharedModel::new(Model::with_internal_channels()));
        let recorder = Arc::new(ActionRecorder::new(Arc::clone(&model), DEFAULT_SNAP_TOLERANCE));
        let driver: Arc<dyn TransportDriver> = Arc::new(InternalDriver);
        let clock = Arc::new(Clock::new(
            Arc::clone(&model),
            Arc::clone(&recorder),
            Arc::clone(&driver),
            Arc::new(SyncControl::disabled()),
            44100,
        ));
        let transport = Arc::new(Transport::new(
            Arc::clone(&model),
            Arc::clone(&clock),
            driver,
            Quantizer::<()>::new().handle(),
        ));
        let mixer_handler = Arc::new(MixerHandler::new(
            Arc::clone(&model),
            Arc::new(MixerShared::new()),
            Arc::clone(&recorder),
            Arc::clone(&clock),
            true,
        ));
        let rec = RecManager::new(
            Arc::clone(&model),
            Arc::clone(&clock),
            transport,
            Arc::clone(&recorder),
            Arc::clone(&mixer_handler),
        );
        Fixture {
            model,
            clock,
            recorder,
            mixer_handler,
            rec,
        }
    }

    #[test]
    fn test_action_rec_consolidates_on_stop() {
        let f = fixture();
        let ch = f.mixer_handler.add_channel("keys");
        f.rec.start_action_rec();
        assert!(f.clock.is_running());
        assert!(f.rec.is_recording_action());
        assert!(f.rec.is_recording());

        f.recorder.live_rec(ch, MidiEvent::note_on(0, 60, 100), 0);
        f.recorder.live_rec(ch, MidiEvent::note_off(0, 60, 0), 100);
        let touched = f.rec.stop_action_rec();

        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![ch]);
        assert_eq!(f.recorder.actions_on_channel(ch).len(), 2);
        assert!(f.model.peek().channel(ch).unwrap().has_actions);
        assert!(!f.rec.is_recording());
    }

    #[test]
    fn test_input_rec_needs_armed_channel() {
        let f = fixture();
        f.mixer_handler.add_channel("a");
        assert_eq!(f.rec.start_input_rec(), Err(HandlerError::NothingToRecord));
    }

    #[test]
    fn test_signal_wait_can_be_cancelled() {
        let f = fixture();
        let ch = f.mixer_handler.add_channel("a");
        f.mixer_handler.toggle_arm(ch).unwrap();
        f.rec.set_rec_trigger_mode(RecTriggerMode::Signal);

        f.rec.start_input_rec().unwrap();
        assert_eq!(f.clock.status(), ClockStatus::Waiting);
        assert!(f.rec.is_waiting_for_signal());
        assert!(!f.rec.is_recording_input());

        let committed = f.rec.stop_input_rec().unwrap();
        assert!(committed.is_empty());
        assert_eq!(f.clock.status(), ClockStatus::Stopped);
        assert!(f.model.peek().channel(ch).unwrap().wave.is_none());
    }

    #[test]
    fn test_signal_callback_starts_take() {
        let f = fixture();
        let ch = f.mixer_handler.add_channel("a");
        f.mixer_handler.toggle_arm(ch).unwrap();
        f.rec.set_rec_trigger_mode(RecTriggerMode::Signal);
        f.rec.start_input_rec().unwrap();

        f.mixer_handler.mixer().exec_signal_cb();
        assert!(f.rec.is_recording_input());
        assert_eq!(f.clock.status(), ClockStatus::Running);
    }

    #[test]
    fn test_rigid_take_fills_loop() {
        let f = fixture();
        let ch = f.mixer_handler.add_channel("a");
        f.mixer_handler.toggle_arm(ch).unwrap();
        f.rec.start_input_rec().unwrap();
        assert!(f.rec.is_recording_input());
        let loop_len = f.clock.frames_in_loop();
        assert_eq!(f.model.peek().rec.max_frames_to_rec, loop_len);

        let channels = f.rec.stop_input_rec().unwrap();
        assert_eq!(channels, vec![ch]);
        let snapshot = f.model.peek();
        let channel = snapshot.channel(ch).unwrap();
        assert_eq!(channel.wave.as_ref().unwrap().count_frames(), loop_len);
        // Takes are treated as loops in this fixture
        assert!(channel.mode.is_loop());
    }

    #[test]
    fn test_free_take_sets_bpm() {
        let f = fixture();
        let ch = f.mixer_handler.add_channel("a");
        f.mixer_handler.toggle_arm(ch).unwrap();
        f.rec.set_input_rec_mode(InputRecMode::Free);
        f.rec.start_input_rec().unwrap();

        // Three seconds recorded over 4 beats: 80 bpm
        f.mixer_handler.mixer().start_input_rec(132300);
        f.rec.stop_input_rec().unwrap();
        assert!((f.clock.bpm() - 80.0).abs() < 0.01);
        assert_eq!(
            f.model.peek().channel(ch).unwrap().wave.as_ref().unwrap().count_frames(),
            132300
        );
    }
}
