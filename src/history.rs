//! Merge of authoritative remote history with locally captured voice notes.

use std::collections::HashSet;

use crate::attachment::LocalVoiceNote;
use crate::message::ChatMessage;

/// Render cached voice notes as history messages.
pub fn local_voice_note_messages(notes: &[LocalVoiceNote]) -> Vec<ChatMessage> {
    notes.iter().map(LocalVoiceNote::to_message).collect()
}

/// Combine remote history with local voice-note messages.
///
/// Remote order is kept as is. Local messages whose marker id already
/// appears in `remote` are dropped, duplicates among the local messages
/// collapse to the first, and the rest are appended in ascending timestamp
/// order (stable for equal timestamps). Merging the result again with the
/// same local list returns it unchanged.
pub fn merge_history(remote: Vec<ChatMessage>, local: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut seen: HashSet<String> = remote
        .iter()
        .filter_map(|m| m.marker_id().map(str::to_owned))
        .collect();

    let mut extra: Vec<&ChatMessage> = local
        .iter()
        .filter(|m| match m.marker_id() {
            Some(id) => seen.insert(id.to_owned()),
            None => false,
        })
        .collect();
    extra.sort_by_key(|m| m.timestamp);

    let mut merged = remote;
    merged.extend(extra.into_iter().cloned());
    merged
}
