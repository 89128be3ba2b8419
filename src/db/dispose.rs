// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! §4.4.4: disposal handling for participants, writers, and readers, plus
//! `update_change_and_unmatch`, the common "replace this record's change
//! and reset its ack map" step shared by update and disposal.

use super::DdbState;
use crate::ack::AckMap;
use crate::change::{ChangePtr, ptr_already_in};
use crate::guid::{Guid, GuidPrefix};
use tracing::debug;

/// §4.4.4 shared step: push the old change to the release list, then reset
/// every peer to unacked except this server and the new change's
/// originator (backpropagation suppression, invariant 3).
pub(super) fn update_change_and_unmatch(
    ack_map: &mut AckMap,
    changes_to_release: &mut Vec<ChangePtr>,
    old_change: ChangePtr,
    new_writer_prefix: GuidPrefix,
    server_prefix: GuidPrefix,
) {
    changes_to_release.push(old_change);
    ack_map.reset_unacked_except(&[server_prefix, new_writer_prefix]);
}

/// §4.4.4 `process_dispose_participant`.
pub(super) fn process_dispose_participant(state: &mut DdbState, server_prefix: GuidPrefix, change: ChangePtr) {
    let prefix = change.instance_handle.prefix;
    let Some(existing) = state.participants.get(&prefix) else {
        debug!(guid_prefix = %prefix, "dispose of unknown participant dropped (UNKNOWN_TARGET)");
        return;
    };
    let old_change = existing.change.clone();
    let child_writers: Vec<Guid> = existing.writers.iter().copied().collect();
    let child_readers: Vec<Guid> = existing.readers.iter().copied().collect();
    let new_writer_prefix = change.writer_guid.prefix;

    let participant = state.participants.get_mut(&prefix).expect("checked above");
    participant.change = change.clone();
    update_change_and_unmatch(
        &mut participant.ack_map,
        &mut state.changes_to_release,
        old_change,
        new_writer_prefix,
        server_prefix,
    );

    for guid in child_writers {
        if let Some(record) = state.writers.remove(&guid) {
            state.writers_by_topic.entry(record.topic.clone()).and_modify(|s| {
                s.remove(&guid);
            });
            state.changes_to_release.push(record.change);
        }
    }
    for guid in child_readers {
        if let Some(record) = state.readers.remove(&guid) {
            state.readers_by_topic.entry(record.topic.clone()).and_modify(|s| {
                s.remove(&guid);
            });
            state.changes_to_release.push(record.change);
        }
    }

    // Unmatch the participant itself: no other record owes it anything.
    for (other_prefix, other) in state.participants.iter_mut() {
        if *other_prefix != prefix {
            other.ack_map.remove(&prefix);
        }
    }
    for writer in state.writers.values_mut() {
        writer.ack_map.remove(&prefix);
    }
    for reader in state.readers.values_mut() {
        reader.ack_map.remove(&prefix);
    }

    if !ptr_already_in(&state.disposals, &change) {
        state.disposals.push(change);
    }
}


/// §4.4.4 `process_dispose_writer`.
pub(super) fn process_dispose_writer(state: &mut DdbState, server_prefix: GuidPrefix, change: ChangePtr) {
    dispose_endpoint(state, server_prefix, change, true);
}

/// §4.4.4 `process_dispose_reader`.
pub(super) fn process_dispose_reader(state: &mut DdbState, server_prefix: GuidPrefix, change: ChangePtr) {
    dispose_endpoint(state, server_prefix, change, false);
}

fn dispose_endpoint(state: &mut DdbState, server_prefix: GuidPrefix, change: ChangePtr, is_writer: bool) {
    let guid = change.instance_handle;
    let new_writer_prefix = change.writer_guid.prefix;

    let existing_change = if is_writer {
        state.writers.get(&guid).map(|w| w.change.clone())
    } else {
        state.readers.get(&guid).map(|r| r.change.clone())
    };
    let Some(old_change) = existing_change else {
        debug!(guid = %guid, "dispose of unknown endpoint dropped (UNKNOWN_TARGET)");
        return;
    };

    let topic = if is_writer {
        let record = state.writers.get_mut(&guid).expect("checked above");
        record.change = change.clone();
        update_change_and_unmatch(
            &mut record.ack_map,
            &mut state.changes_to_release,
            old_change,
            new_writer_prefix,
            server_prefix,
        );
        record.topic.clone()
    } else {
        let record = state.readers.get_mut(&guid).expect("checked above");
        record.change = change.clone();
        update_change_and_unmatch(
            &mut record.ack_map,
            &mut state.changes_to_release,
            old_change,
            new_writer_prefix,
            server_prefix,
        );
        record.topic.clone()
    };

    if is_writer {
        state.writers_by_topic.entry(topic).and_modify(|s| {
            s.remove(&guid);
        });
    } else {
        state.readers_by_topic.entry(topic).and_modify(|s| {
            s.remove(&guid);
        });
    }

    if !ptr_already_in(&state.disposals, &change) {
        state.disposals.push(change);
    }
}
