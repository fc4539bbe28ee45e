// Actions - Timestamped MIDI events bound to channels
//
// Actions live in an `ActionMap` ordered by frame. Pairs (note on/off) are
// linked through optional ids instead of pointers; the map keeps an id index
// so partners resolve in constant time after any copy of the map.

pub mod recorder;
pub mod serialization;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;

use crate::midi::event::MidiEvent;
use crate::model::Frame;
use crate::model::channel::ChannelId;

pub use recorder::ActionRecorder;
pub use serialization::{PatchAction, deserialize_actions, serialize_actions};

pub type ActionId = u32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("Unknown action {0}")]
    UnknownAction(ActionId),

    #[error("Action {id} links to missing action {missing}")]
    DanglingLink { id: ActionId, missing: ActionId },

    #[error("Duplicate action id {0}")]
    DuplicateId(ActionId),

    #[error("Actions {first} and {second} are not a linked note on/off pair")]
    BadPair { first: ActionId, second: ActionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub id: ActionId,
    pub channel_id: ChannelId,
    pub frame: Frame,
    pub event: MidiEvent,
    pub prev_id: Option<ActionId>,
    pub next_id: Option<ActionId>,
}

impl Action {
    pub fn new(id: ActionId, channel_id: ChannelId, frame: Frame, event: MidiEvent) -> Self {
        Self {
            id,
            channel_id,
            frame,
            event,
            prev_id: None,
            next_id: None,
        }
    }

    /// Same channel, frame and raw event
    pub fn is_duplicate_of(&self, other: &Action) -> bool {
        self.channel_id == other.channel_id
            && self.frame == other.frame
            && self.event.raw() == other.event.raw()
    }

    /// `self` is a note on and `other` the matching note off
    pub fn pairs_with(&self, other: &Action) -> bool {
        self.event.is_note_on()
            && other.event.is_note_off()
            && self.event.note() == other.event.note()
            && self.channel_id == other.channel_id
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMap {
    frames: BTreeMap<Frame, Vec<Action>>,
    index: HashMap<ActionId, Frame>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Actions stored at `frame`, if any
    #[inline]
    pub fn on_frame(&self, frame: Frame) -> Option<&[Action]> {
        self.frames.get(&frame).map(|v| v.as_slice())
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        let frame = self.index.get(&id)?;
        self.frames.get(frame)?.iter().find(|a| a.id == id)
    }

    fn get_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        let frame = self.index.get(&id)?;
        self.frames.get_mut(frame)?.iter_mut().find(|a| a.id == id)
    }

    pub fn contains_id(&self, id: ActionId) -> bool {
        self.index.contains_key(&id)
    }

    /// Resolve the previous sibling of `action`
    pub fn prev_of(&self, action: &Action) -> Option<&Action> {
        action.prev_id.and_then(|id| self.get(id))
    }

    /// Resolve the next sibling of `action`
    pub fn next_of(&self, action: &Action) -> Option<&Action> {
        action.next_id.and_then(|id| self.get(id))
    }

    /// Frame-ascending iteration
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.frames.values().flat_map(|actions| actions.iter())
    }

    pub fn exists(&self, channel_id: ChannelId, frame: Frame, event: MidiEvent) -> bool {
        let probe = Action::new(0, channel_id, frame, event);
        self.frames
            .get(&frame)
            .is_some_and(|actions| actions.iter().any(|a| a.is_duplicate_of(&probe)))
    }

    /// Insert unless an identical action (channel, frame, raw event) is
    /// already there. Returns whether it was inserted.
    pub fn insert(&mut self, action: Action) -> bool {
        if self.exists(action.channel_id, action.frame, action.event)
            || self.index.contains_key(&action.id)
        {
            return false;
        }
        self.index.insert(action.id, action.frame);
        self.frames.entry(action.frame).or_default().push(action);
        true
    }

    /// Link `first -> second` as a pair
    pub fn link(&mut self, first: ActionId, second: ActionId) -> Result<(), ActionError> {
        if !self.contains_id(second) {
            return Err(ActionError::UnknownAction(second));
        }
        let a = self.get_mut(first).ok_or(ActionError::UnknownAction(first))?;
        a.next_id = Some(second);
        if let Some(b) = self.get_mut(second) {
            b.prev_id = Some(first);
        }
        Ok(())
    }

    pub fn update_event(&mut self, id: ActionId, event: MidiEvent) -> Result<(), ActionError> {
        let action = self.get_mut(id).ok_or(ActionError::UnknownAction(id))?;
        action.event = event;
        Ok(())
    }

    /// Set both siblings of `id`, updating the back links of the siblings
    pub fn update_siblings(
        &mut self,
        id: ActionId,
        prev_id: Option<ActionId>,
        next_id: Option<ActionId>,
    ) -> Result<(), ActionError> {
        for sibling in [prev_id, next_id].into_iter().flatten() {
            if !self.contains_id(sibling) {
                return Err(ActionError::DanglingLink { id, missing: sibling });
            }
        }
        let current = self.get_mut(id).ok_or(ActionError::UnknownAction(id))?;
        current.prev_id = prev_id;
        current.next_id = next_id;

        if let Some(prev) = prev_id.and_then(|p| self.get_mut(p)) {
            prev.next_id = Some(id);
        }
        if let Some(next) = next_id.and_then(|n| self.get_mut(n)) {
            next.prev_id = Some(id);
        }
        Ok(())
    }

    /// Overwrite the links of one action only. Used when loading a log
    /// where both sides of every pair are stored.
    pub(crate) fn set_links(&mut self, id: ActionId, prev_id: Option<ActionId>, next_id: Option<ActionId>) {
        if let Some(action) = self.get_mut(id) {
            action.prev_id = prev_id;
            action.next_id = next_id;
        }
    }

    /// Remove every action matching `pred`. Partners of removed actions are
    /// unlinked. Returns the removed actions.
    pub fn remove_if(&mut self, mut pred: impl FnMut(&Action) -> bool) -> Vec<Action> {
        let mut removed = Vec::new();
        for actions in self.frames.values_mut() {
            actions.retain(|a| {
                if pred(a) {
                    removed.push(*a);
                    false
                } else {
                    true
                }
            });
        }
        self.frames.retain(|_, actions| !actions.is_empty());

        for action in &removed {
            self.index.remove(&action.id);
        }
        for action in &removed {
            if let Some(prev) = action.prev_id.and_then(|id| self.get_mut(id)) {
                if prev.next_id == Some(action.id) {
                    prev.next_id = None;
                }
            }
            if let Some(next) = action.next_id.and_then(|id| self.get_mut(id)) {
                if next.prev_id == Some(action.id) {
                    next.prev_id = None;
                }
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.index.clear();
    }

    /// Move every action through `f`. Relative order within a frame is kept;
    /// actions landing on the same frame are concatenated in source order.
    pub fn update_key_frames(&mut self, mut f: impl FnMut(Frame) -> Frame) {
        let old = std::mem::take(&mut self.frames);
        self.index.clear();
        for (old_frame, actions) in old {
            let new_frame = f(old_frame);
            for mut action in actions {
                action.frame = new_frame;
                self.index.insert(action.id, new_frame);
                self.frames.entry(new_frame).or_default().push(action);
            }
        }
    }

    /// Rescale frames after a tempo change.
    ///
    /// `ratio` is old bpm / new bpm. A rescaled frame that falls at most
    /// `snap_tolerance` frames before a quantizer step boundary is moved onto
    /// that boundary. Frames are wrapped into the loop when `frames_in_loop`
    /// is non-zero. A ratio of exactly 1.0 leaves the map untouched.
    pub fn rescale_bpm(
        &mut self,
        ratio: f32,
        quantizer_step: Frame,
        snap_tolerance: Frame,
        frames_in_loop: Frame,
    ) {
        if ratio == 1.0 {
            return;
        }
        self.update_key_frames(|old| {
            let mut frame = (old as f64 * ratio as f64) as Frame;
            if frame != 0 && quantizer_step != 0 {
                let remainder = frame % quantizer_step;
                let to_boundary = quantizer_step - remainder;
                if remainder != 0 && to_boundary <= snap_tolerance {
                    frame += to_boundary;
                }
            }
            if frames_in_loop != 0 {
                frame %= frames_in_loop;
            }
            frame
        });
    }

    /// Rescale frames from the rate a patch was saved with to the system rate
    pub fn rescale_sample_rate(&mut self, system_rate: u32, patch_rate: u32) {
        if system_rate == patch_rate || patch_rate == 0 {
            return;
        }
        // Integer math keeps the floor exact
        self.update_key_frames(|old| {
            (old as u64 * system_rate as u64 / patch_rate as u64) as Frame
        });
    }

    /// Ids of every channel owning at least one action
    pub fn channels(&self) -> BTreeSet<ChannelId> {
        self.iter().map(|a| a.channel_id).collect()
    }

    /// Check that every link points to an existing action, that links are
    /// mutual, and that each linked pair is a note on followed by its note
    /// off on the same channel.
    pub fn validate_links(&self) -> Result<(), ActionError> {
        for action in self.iter() {
            for linked in [action.prev_id, action.next_id].into_iter().flatten() {
                if !self.contains_id(linked) {
                    return Err(ActionError::DanglingLink {
                        id: action.id,
                        missing: linked,
                    });
                }
            }
            if let Some(next) = self.next_of(action) {
                if next.prev_id != Some(action.id) || !action.pairs_with(next) {
                    return Err(ActionError::BadPair {
                        first: action.id,
                        second: next.id,
                    });
                }
            }
            if let Some(prev) = self.prev_of(action) {
                if prev.next_id != Some(action.id) {
                    return Err(ActionError::BadPair {
                        first: prev.id,
                        second: action.id,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(id: ActionId, frame: Frame) -> Action {
        Action::new(id, 1, frame, MidiEvent::note_on(0, 60, 100))
    }

    fn note_off(id: ActionId, frame: Frame) -> Action {
        Action::new(id, 1, frame, MidiEvent::note_off(0, 60, 0))
    }

    #[test]
    fn test_iteration_is_frame_ascending() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 300));
        map.insert(note_on(2, 10));
        map.insert(note_off(3, 150));
        let frames: Vec<Frame> = map.iter().map(|a| a.frame).collect();
        assert_eq!(frames, vec![10, 150, 300]);
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut map = ActionMap::new();
        assert!(map.insert(note_on(1, 0)));
        assert!(!map.insert(note_on(2, 0)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_remove_unlinks_partner() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 0));
        map.insert(note_off(2, 100));
        map.link(1, 2).unwrap();

        let removed = map.remove_if(|a| a.id == 2);
        assert_eq!(removed.len(), 1);
        assert_eq!(map.get(1).unwrap().next_id, None);
        assert!(map.on_frame(100).is_none());
        assert!(map.validate_links().is_ok());
    }

    #[test]
    fn test_update_siblings() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 0));
        map.insert(note_off(2, 50));
        map.update_siblings(2, Some(1), None).unwrap();
        assert_eq!(map.get(1).unwrap().next_id, Some(2));
        assert_eq!(map.get(2).unwrap().prev_id, Some(1));
        let first = *map.get(1).unwrap();
        let second = *map.get(2).unwrap();
        assert_eq!(map.next_of(&first).map(|a| a.id), Some(2));
        assert_eq!(map.prev_of(&second).map(|a| a.id), Some(1));
        assert!(map.prev_of(&first).is_none());

        assert_eq!(
            map.update_siblings(2, Some(9), None),
            Err(ActionError::DanglingLink { id: 2, missing: 9 })
        );
    }

    #[test]
    fn test_rescale_ratio_one_is_noop() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 1234));
        map.insert(note_off(2, 5678));
        map.link(1, 2).unwrap();
        let before = map.clone();
        map.rescale_bpm(1.0, 100, 6, 10_000);
        assert_eq!(map, before);
    }

    #[test]
    fn test_rescale_snaps_to_step() {
        let mut map = ActionMap::new();
        // 1000 * 0.4996 = 499.6 -> 499, one frame before the 500 boundary
        map.insert(note_on(1, 1000));
        map.rescale_bpm(0.4996, 100, 6, 0);
        assert_eq!(map.get(1).unwrap().frame, 500);

        let mut far = ActionMap::new();
        far.insert(note_on(1, 1000));
        far.rescale_bpm(0.25, 100, 6, 0);
        assert_eq!(far.get(1).unwrap().frame, 250);
    }

    #[test]
    fn test_rescale_sample_rate() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 44100));
        map.rescale_sample_rate(48000, 44100);
        assert_eq!(map.get(1).unwrap().frame, 48000);
        assert_eq!(map.on_frame(48000).map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_channels_set() {
        let mut map = ActionMap::new();
        map.insert(note_on(1, 0));
        map.insert(Action::new(2, 7, 0, MidiEvent::note_on(0, 61, 1)));
        assert_eq!(map.channels().into_iter().collect::<Vec<_>>(), vec![1, 7]);
    }
}
