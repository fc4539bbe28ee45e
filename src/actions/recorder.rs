// Action recorder - Edits of the recorded action log
//
// Every edit runs under the model data lock: the renderer reads the action
// map while sequencing, so the map is copied on write (`Arc::make_mut`) and
// republished HARD when the lock drops. Live performance capture goes to a
// scratch vector first and is merged by `consolidate`.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use super::serialization::{PatchAction, deserialize_actions, serialize_actions};
use super::{Action, ActionError, ActionId, ActionMap};
use crate::midi::event::MidiEvent;
use crate::model::channel::ChannelId;
use crate::model::{Frame, Model, SharedModel};

/// Scratch capacity grows by this many actions at a time
pub const MAX_LIVE_RECS_CHUNK: usize = 128;

/// Default snap tolerance for tempo rescaling, in frames
pub const DEFAULT_SNAP_TOLERANCE: Frame = 6;

pub struct ActionRecorder {
    model: Arc<SharedModel<Model>>,
    last_id: AtomicU32,
    live: Mutex<Vec<Action>>,
    snap_tolerance: AtomicUsize,
}

impl ActionRecorder {
    pub fn new(model: Arc<SharedModel<Model>>, snap_tolerance: Frame) -> Self {
        Self {
            model,
            last_id: AtomicU32::new(0),
            live: Mutex::new(Vec::with_capacity(MAX_LIVE_RECS_CHUNK)),
            snap_tolerance: AtomicUsize::new(snap_tolerance),
        }
    }

    pub fn snap_tolerance(&self) -> Frame {
        self.snap_tolerance.load(Ordering::Relaxed)
    }

    pub fn set_snap_tolerance(&self, frames: Frame) {
        self.snap_tolerance.store(frames, Ordering::Relaxed);
    }

    /// Forget every action and restart id generation
    pub fn reset(&self) {
        self.last_id.store(0, Ordering::Relaxed);
        self.live_actions().clear();
        self.clear_all();
    }

    pub fn generate_id(&self) -> ActionId {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register_id(&self, id: ActionId) {
        self.last_id.fetch_max(id, Ordering::Relaxed);
    }

    pub fn make_action(&self, channel_id: ChannelId, frame: Frame, event: MidiEvent) -> Action {
        Action::new(self.generate_id(), channel_id, frame, event)
    }

    fn live_actions(&self) -> MutexGuard<'_, Vec<Action>> {
        self.live.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` on the action map under the data lock, then refresh the
    /// per-channel `has_actions` flags.
    fn edit<R>(&self, f: impl FnOnce(&mut ActionMap) -> R) -> R {
        let mut model = self.model.data_lock();
        let out = f(Arc::make_mut(&mut model.actions));
        refresh_channel_flags(&mut model);
        out
    }

    /// Current map (shared, read-only)
    pub fn snapshot(&self) -> Arc<ActionMap> {
        Arc::clone(&self.model.peek().actions)
    }

    pub fn clear_all(&self) {
        self.edit(|map| map.clear());
    }

    pub fn clear_channel(&self, channel_id: ChannelId) -> usize {
        self.edit(|map| map.remove_if(|a| a.channel_id == channel_id).len())
    }

    /// Remove actions of one status (e.g. NOTE_ON) on a channel
    pub fn clear_actions(&self, channel_id: ChannelId, status: u8) -> usize {
        self.edit(|map| {
            map.remove_if(|a| a.channel_id == channel_id && a.event.status() == status)
                .len()
        })
    }

    pub fn delete_action(&self, id: ActionId) -> bool {
        self.edit(|map| !map.remove_if(|a| a.id == id).is_empty())
    }

    /// Delete both halves of a pair
    pub fn delete_action_pair(&self, id: ActionId, next_id: ActionId) -> usize {
        self.edit(|map| map.remove_if(|a| a.id == id || a.id == next_id).len())
    }

    /// Remap every frame through `f`
    pub fn update_key_frames(&self, f: impl FnMut(Frame) -> Frame) {
        self.edit(|map| map.update_key_frames(f));
    }

    pub fn update_event(&self, id: ActionId, event: MidiEvent) -> Result<(), ActionError> {
        self.edit(|map| map.update_event(id, event))
    }

    pub fn update_siblings(
        &self,
        id: ActionId,
        prev_id: Option<ActionId>,
        next_id: Option<ActionId>,
    ) -> Result<(), ActionError> {
        self.edit(|map| map.update_siblings(id, prev_id, next_id))
    }

    /// Any action on the channel, optionally restricted to one status
    pub fn has_actions(&self, channel_id: ChannelId, status: Option<u8>) -> bool {
        self.snapshot().iter().any(|a| {
            a.channel_id == channel_id && status.is_none_or(|s| a.event.status() == s)
        })
    }

    /// Record one action. Exact duplicates are skipped (`None`).
    pub fn rec(&self, channel_id: ChannelId, frame: Frame, event: MidiEvent) -> Option<Action> {
        if self.snapshot().exists(channel_id, frame, event) {
            return None;
        }
        let action = self.make_action(channel_id, frame, event);
        self.edit(|map| map.insert(action)).then_some(action)
    }

    /// Bulk insert, skipping duplicates. Returns how many were inserted.
    pub fn rec_many(&self, actions: &[Action]) -> usize {
        if actions.is_empty() {
            return 0;
        }
        for action in actions {
            self.register_id(action.id);
        }
        self.edit(|map| insert_all(map, actions))
    }

    /// Record a linked pair `e1 @ f1 -> e2 @ f2`
    pub fn rec_pair(
        &self,
        channel_id: ChannelId,
        f1: Frame,
        f2: Frame,
        e1: MidiEvent,
        e2: MidiEvent,
    ) -> Option<(Action, Action)> {
        let mut first = self.make_action(channel_id, f1, e1);
        let mut second = self.make_action(channel_id, f2, e2);
        first.next_id = Some(second.id);
        second.prev_id = Some(first.id);

        let inserted = self.edit(|map| {
            if map.exists(channel_id, f1, e1) || map.exists(channel_id, f2, e2) {
                return false;
            }
            map.insert(first) && map.insert(second)
        });
        inserted.then_some((first, second))
    }

    pub fn actions_on_frame(&self, frame: Frame) -> Vec<Action> {
        self.snapshot()
            .on_frame(frame)
            .map(|a| a.to_vec())
            .unwrap_or_default()
    }

    /// Latest action of `status` on the channel at or before `frame`; the
    /// first one found when none precedes it.
    pub fn closest_action(&self, channel_id: ChannelId, frame: Frame, status: u8) -> Option<Action> {
        let map = self.snapshot();
        let mut out: Option<Action> = None;
        for a in map.iter() {
            if a.channel_id != channel_id || a.event.status() != status {
                continue;
            }
            match out {
                None => out = Some(*a),
                Some(current) if a.frame <= frame && a.frame > current.frame => out = Some(*a),
                _ => {}
            }
        }
        out
    }

    pub fn actions_on_channel(&self, channel_id: ChannelId) -> Vec<Action> {
        self.snapshot()
            .iter()
            .filter(|a| a.channel_id == channel_id)
            .copied()
            .collect()
    }

    pub fn for_each_action(&self, mut f: impl FnMut(&Action)) {
        for action in self.snapshot().iter() {
            f(action);
        }
    }

    /// Capture a note on/off during live performance. Goes to the scratch
    /// buffer until `consolidate`.
    pub fn live_rec(&self, channel_id: ChannelId, event: MidiEvent, frame: Frame) {
        if !event.is_note_on_off() {
            return;
        }
        let action = self.make_action(channel_id, frame, event);
        let mut live = self.live_actions();
        if live.len() >= live.capacity() {
            live.reserve(MAX_LIVE_RECS_CHUNK);
        }
        live.push(action);
    }

    pub fn live_count(&self) -> usize {
        self.live_actions().len()
    }

    /// Pair note on/off entries of the scratch buffer, merge it into the map
    /// and clear it. Returns the channels that received actions.
    pub fn consolidate(&self) -> BTreeSet<ChannelId> {
        let mut live = self.live_actions();
        pair_live_actions(&mut live);

        let touched: BTreeSet<ChannelId> = live.iter().map(|a| a.channel_id).collect();
        if !live.is_empty() {
            let inserted = self.edit(|map| insert_all(map, &live));
            debug!("[actionRecorder] consolidated {} of {} live actions", inserted, live.len());
        }
        live.clear();
        touched
    }

    /// Copy every action of `channel_id` to `new_channel_id` with fresh ids
    pub fn clone_actions(&self, channel_id: ChannelId, new_channel_id: ChannelId) -> bool {
        let mut id_map: HashMap<ActionId, ActionId> = HashMap::new();
        let mut clones: Vec<Action> = Vec::new();

        for a in self.actions_on_channel(channel_id) {
            let new_id = self.generate_id();
            id_map.insert(a.id, new_id);
            clones.push(Action {
                id: new_id,
                channel_id: new_channel_id,
                ..a
            });
        }
        if clones.is_empty() {
            return false;
        }
        for clone in clones.iter_mut() {
            clone.prev_id = clone.prev_id.and_then(|id| id_map.get(&id).copied());
            clone.next_id = clone.next_id.and_then(|id| id_map.get(&id).copied());
        }
        self.rec_many(&clones);
        true
    }

    /// Rescale after a tempo change, inside a data lock the caller holds.
    /// `ratio` is old bpm / new bpm.
    pub(crate) fn update_bpm_locked(&self, model: &mut Model, ratio: f32) {
        if ratio == 1.0 {
            return;
        }
        let step = model.clock.quantizer_step;
        let frames_in_loop = model.clock.frames_in_loop;
        let tolerance = self.snap_tolerance();
        Arc::make_mut(&mut model.actions).rescale_bpm(ratio, step, tolerance, frames_in_loop);
    }

    pub(crate) fn update_sample_rate_locked(&self, model: &mut Model, system_rate: u32, patch_rate: u32) {
        if system_rate == patch_rate {
            return;
        }
        Arc::make_mut(&mut model.actions).rescale_sample_rate(system_rate, patch_rate);
    }

    /// Rescale recorded frames by a tempo ratio (old / new)
    pub fn update_bpm(&self, ratio: f32) {
        if ratio == 1.0 {
            return;
        }
        let mut model = self.model.data_lock();
        self.update_bpm_locked(&mut model, ratio);
    }

    /// Rescale recorded frames saved at `patch_rate` to `system_rate`
    pub fn update_sample_rate(&self, system_rate: u32, patch_rate: u32) {
        let mut model = self.model.data_lock();
        self.update_sample_rate_locked(&mut model, system_rate, patch_rate);
    }

    /// Replace the whole map with a persisted log
    pub fn load(&self, patch: &[PatchAction]) -> Result<(), ActionError> {
        let map = deserialize_actions(patch)?;
        if let Some(max) = patch.iter().map(|a| a.id).max() {
            self.register_id(max);
        }
        let count = map.len();
        {
            let mut model = self.model.data_lock();
            model.actions = Arc::new(map);
            refresh_channel_flags(&mut model);
        }
        info!("[actionRecorder] loaded {} actions", count);
        Ok(())
    }

    pub fn serialize(&self) -> Vec<PatchAction> {
        serialize_actions(&self.snapshot())
    }
}

/// Link each note on with the first unpaired note off of the same channel
/// and pitch that follows it. Only forward: entries are in recording order.
pub fn pair_live_actions(actions: &mut [Action]) {
    for i in 0..actions.len() {
        if !actions[i].event.is_note_on() || actions[i].next_id.is_some() {
            continue;
        }
        for j in (i + 1)..actions.len() {
            if actions[j].prev_id.is_none() && actions[i].pairs_with(&actions[j]) {
                let (first, second) = (actions[i].id, actions[j].id);
                actions[i].next_id = Some(second);
                actions[j].prev_id = Some(first);
                break;
            }
        }
    }
}

/// Insert `actions`, then drop links to anything that did not make it in
fn insert_all(map: &mut ActionMap, actions: &[Action]) -> usize {
    let inserted = actions.iter().filter(|a| map.insert(**a)).count();
    if inserted != actions.len() {
        for a in actions {
            let Some(stored) = map.get(a.id).copied() else {
                continue;
            };
            let prev = stored.prev_id.filter(|id| map.contains_id(*id));
            let next = stored.next_id.filter(|id| map.contains_id(*id));
            map.set_links(a.id, prev, next);
        }
    }
    inserted
}

fn refresh_channel_flags(model: &mut Model) {
    let owners = model.actions.channels();
    for channel in model.channels.iter_mut() {
        channel.has_actions = owners.contains(&channel.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::event::NOTE_ON;

    fn recorder() -> ActionRecorder {
        let model = Arc::new(SharedModel::new(Model::with_internal_channels()));
        ActionRecorder::new(model, DEFAULT_SNAP_TOLERANCE)
    }

    #[test]
    fn test_rec_skips_duplicates() {
        let rec = recorder();
        let event = MidiEvent::note_on(0, 60, 100);
        assert!(rec.rec(4, 100, event).is_some());
        assert!(rec.rec(4, 100, event).is_none());
        assert_eq!(rec.snapshot().len(), 1);
    }

    #[test]
    fn test_consolidate_links_pair() {
        let rec = recorder();
        rec.live_rec(1, MidiEvent::note_on(0, 60, 100), 0);
        rec.live_rec(1, MidiEvent::note_off(0, 60, 0), 100);

        let touched = rec.consolidate();
        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(rec.live_count(), 0);

        let actions = rec.actions_on_channel(1);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].next_id, Some(actions[1].id));
        assert_eq!(actions[1].prev_id, Some(actions[0].id));
    }

    #[test]
    fn test_pairing_is_forward_only() {
        let rec = recorder();
        let mut live = vec![
            rec.make_action(1, 0, MidiEvent::note_off(0, 60, 0)),
            rec.make_action(1, 10, MidiEvent::note_on(0, 60, 100)),
            rec.make_action(1, 20, MidiEvent::note_on(0, 60, 100)),
            rec.make_action(1, 30, MidiEvent::note_off(0, 60, 0)),
            rec.make_action(1, 40, MidiEvent::note_off(0, 60, 0)),
        ];
        pair_live_actions(&mut live);
        // The leading note off has nothing before it
        assert_eq!(live[0].prev_id, None);
        assert_eq!(live[1].next_id, Some(live[3].id));
        assert_eq!(live[2].next_id, Some(live[4].id));
    }

    #[test]
    fn test_live_rec_ignores_other_events() {
        let rec = recorder();
        rec.live_rec(1, MidiEvent::new(0xB0, 7, 100), 0);
        assert_eq!(rec.live_count(), 0);
    }

    #[test]
    fn test_clone_actions_remaps_links() {
        let rec = recorder();
        let (a, b) = rec
            .rec_pair(4, 0, 100, MidiEvent::note_on(0, 60, 100), MidiEvent::note_off(0, 60, 0))
            .unwrap();
        assert!(rec.clone_actions(4, 5));

        let clones = rec.actions_on_channel(5);
        assert_eq!(clones.len(), 2);
        assert_ne!(clones[0].id, a.id);
        assert_ne!(clones[1].id, b.id);
        assert_eq!(clones[0].next_id, Some(clones[1].id));
        assert_eq!(clones[1].prev_id, Some(clones[0].id));
        assert!(!rec.clone_actions(99, 100));
    }

    #[test]
    fn test_clear_and_query() {
        let rec = recorder();
        rec.rec(4, 10, MidiEvent::note_on(0, 60, 100));
        rec.rec(4, 20, MidiEvent::note_off(0, 60, 0));
        rec.rec(5, 30, MidiEvent::note_on(0, 62, 100));

        assert!(rec.has_actions(4, Some(NOTE_ON)));
        assert_eq!(rec.closest_action(4, 15, NOTE_ON).map(|a| a.frame), Some(10));

        assert_eq!(rec.clear_actions(4, NOTE_ON), 1);
        assert!(!rec.has_actions(4, Some(NOTE_ON)));
        assert!(rec.has_actions(4, None));

        assert_eq!(rec.clear_channel(4), 1);
        assert_eq!(rec.snapshot().len(), 1);
    }

    #[test]
    fn test_update_bpm_ratio_one_is_noop() {
        let rec = recorder();
        rec.rec_pair(4, 123, 4567, MidiEvent::note_on(0, 60, 1), MidiEvent::note_off(0, 60, 0));
        let before = rec.snapshot();
        rec.update_bpm(1.0);
        assert_eq!(*rec.snapshot(), *before);
    }

    #[test]
    fn test_load_registers_ids() {
        let rec = recorder();
        let patch = vec![PatchAction {
            id: 41,
            channel_id: 4,
            frame: 0,
            event: MidiEvent::note_on(0, 60, 100).raw(),
            prev_id: None,
            next_id: None,
        }];
        rec.load(&patch).unwrap();
        assert_eq!(rec.generate_id(), 42);
        assert_eq!(rec.serialize(), patch);
    }
}
