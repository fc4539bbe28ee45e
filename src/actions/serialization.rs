// Persisted action log
//
// Each action is stored flat as {id, channelId, frame, event, prevId, nextId}
// with the MIDI event as its packed 32-bit word. Links are plain ids; loading
// rebuilds the map and rejects links to missing actions, one-sided links and
// linked actions that are not a note on/off pair on one channel.

use serde::{Deserialize, Serialize};

use super::{Action, ActionError, ActionId, ActionMap};
use crate::midi::event::MidiEvent;
use crate::model::Frame;
use crate::model::channel::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAction {
    pub id: ActionId,
    pub channel_id: ChannelId,
    pub frame: Frame,
    pub event: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_id: Option<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<ActionId>,
}

impl From<&Action> for PatchAction {
    fn from(a: &Action) -> Self {
        Self {
            id: a.id,
            channel_id: a.channel_id,
            frame: a.frame,
            event: a.event.raw(),
            prev_id: a.prev_id,
            next_id: a.next_id,
        }
    }
}

/// Flatten a map, frame-ascending
pub fn serialize_actions(map: &ActionMap) -> Vec<PatchAction> {
    map.iter().map(PatchAction::from).collect()
}

/// Rebuild a map from its flat form
pub fn deserialize_actions(patch: &[PatchAction]) -> Result<ActionMap, ActionError> {
    let mut map = ActionMap::new();

    // First pass: plain actions, no links yet
    for pa in patch {
        if map.contains_id(pa.id) {
            return Err(ActionError::DuplicateId(pa.id));
        }
        map.insert(Action::new(
            pa.id,
            pa.channel_id,
            pa.frame,
            MidiEvent::from_raw(pa.event),
        ));
    }

    // Second pass: links exactly as stored
    for pa in patch {
        if pa.prev_id.is_none() && pa.next_id.is_none() {
            continue;
        }
        for linked in [pa.prev_id, pa.next_id].into_iter().flatten() {
            if !map.contains_id(linked) {
                return Err(ActionError::DanglingLink {
                    id: pa.id,
                    missing: linked,
                });
            }
        }
        if !map.contains_id(pa.id) {
            // Exact duplicate event dropped by the first pass
            return Err(ActionError::UnknownAction(pa.id));
        }
        map.set_links(pa.id, pa.prev_id, pa.next_id);
    }

    map.validate_links()?;
    Ok(map)
}

pub fn to_json(actions: &[PatchAction]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(actions)
}

pub fn from_json(json: &str) -> serde_json::Result<Vec<PatchAction>> {
    serde_json::from_str(json)
}
