// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! §4.4.1-4.4.3: drain the inbound queues, create or update participant
//! and endpoint records, and establish the ack-map matching edges that
//! drive dirty-topic reconciliation.

use super::dispose::{process_dispose_participant, process_dispose_reader, process_dispose_writer};
use super::{DdbState, DiscoveryDatabase};
use crate::ack::AckStatus;
use crate::change::{ChangeKind, ChangePtr, ptr_already_in};
use crate::endpoint::EndpointRecord;
use crate::error::DdbError;
use crate::guid::{EntityKind, Guid, GuidPrefix, VIRTUAL_TOPIC};
use crate::participant::{ParticipantChangeData, ParticipantRecord};
use tracing::{error, warn};

pub(super) fn process_pdp_queue(db: &DiscoveryDatabase) {
    db.pdp_queue.swap_in();
    let items = db.pdp_queue.drain_front();
    if items.is_empty() {
        return;
    }
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    let server_prefix = db.server_guid_prefix();
    for item in items {
        if !register_known_change(&mut state, &item.change) {
            state.changes_to_release.push(item.change);
            continue;
        }
        match item.change.kind {
            ChangeKind::Alive => {
                create_or_update_participant(&mut state, server_prefix, item.change, item.change_data)
            }
            ChangeKind::Disposed => process_dispose_participant(&mut state, server_prefix, item.change),
        }
    }
}

pub(super) fn process_edp_queue(db: &DiscoveryDatabase) {
    db.edp_queue.swap_in();
    let items = db.edp_queue.drain_front();
    if items.is_empty() {
        return;
    }
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    let server_prefix = db.server_guid_prefix();
    for item in items {
        if !register_known_change(&mut state, &item.change) {
            state.changes_to_release.push(item.change);
            continue;
        }
        let is_writer = matches!(
            item.change.instance_handle.kind(),
            EntityKind::Writer | EntityKind::VirtualWriter
        );
        match item.change.kind {
            ChangeKind::Alive => {
                let result = create_endpoint(&mut state, server_prefix, item.change, item.topic_name, is_writer);
                if let Err(e) = result {
                    warn!(error = %e, "endpoint creation rejected");
                }
            }
            ChangeKind::Disposed => {
                if is_writer {
                    process_dispose_writer(&mut state, server_prefix, item.change);
                } else {
                    process_dispose_reader(&mut state, server_prefix, item.change);
                }
            }
        }
    }
}

/// §4.4.1 dedup gate: the original's `data_queue_` lookup, carried forward
/// as `known_changes` (SPEC_FULL.md §3). Returns `false` if this exact
/// `(writer_guid, sequence_number)` was already processed once before, in
/// which case the caller must not reprocess it — just route the duplicate
/// `CacheChange` straight to release.
fn register_known_change(state: &mut DdbState, change: &ChangePtr) -> bool {
    use std::collections::hash_map::Entry;
    match state.known_changes.entry(change.sample_identity) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(change.instance_handle);
            true
        }
    }
}

/// §4.4.2.
fn create_or_update_participant(
    state: &mut DdbState,
    server_prefix: GuidPrefix,
    change: ChangePtr,
    data: ParticipantChangeData,
) {
    let prefix = change.instance_handle.prefix;
    let originator = change.writer_guid.prefix;

    if let Some(existing) = state.participants.get(&prefix) {
        if change.sample_identity.sequence_number > existing.change.sample_identity.sequence_number {
            let old_change = existing.change.clone();
            let participant = state.participants.get_mut(&prefix).expect("checked above");
            participant.change = change.clone();
            participant.ack_map.reset_unacked_except(&[server_prefix, originator]);
            state.changes_to_release.push(old_change);
        } else {
            // §8 P6 / §7 SUPERSEDED: silently accepted, routed to release.
            state.changes_to_release.push(change);
        }
        return;
    }

    let is_local_server = prefix == server_prefix;
    let mut record = ParticipantRecord::new(prefix, change.clone(), &data, is_local_server);
    record.ack_map.set(originator, AckStatus::RelevantAcked);
    state.participants.insert(prefix, record);

    if is_local_server {
        if !ptr_already_in(&state.pdp_to_send, &change) {
            state.pdp_to_send.push(change);
        }
    } else if let Some(own) = state.participants.get_mut(&server_prefix) {
        // §4.4.2 "Else: set server_acked_by_all := false": a freshly-seen
        // remote participant starts out unacked on this server's own
        // ack map, so `server_acked_by_all()` correctly flips false until
        // a PDP ack round-trip matches it.
        own.ack_map.set_if_absent(prefix, AckStatus::RelevantUnacked);
    }

    if is_local_server {
        let writer_change = crate::change::CacheChange::virtual_marker(Guid::virtual_writer(prefix));
        let reader_change = crate::change::CacheChange::virtual_marker(Guid::virtual_reader(prefix));
        if let Err(e) = create_endpoint(state, server_prefix, writer_change, VIRTUAL_TOPIC.to_string(), true) {
            error!(error = %e, "failed to materialize virtual writer");
        }
        if let Err(e) = create_endpoint(state, server_prefix, reader_change, VIRTUAL_TOPIC.to_string(), false) {
            error!(error = %e, "failed to materialize virtual reader");
        }
    }
}

/// True iff `prefix`'s participant is only known indirectly, through
/// another server relaying it (§4.4.3 "external participant" case): not a
/// direct client of this server, and not this server's own participant.
fn is_external(state: &DdbState, prefix: GuidPrefix, server_prefix: GuidPrefix) -> bool {
    match state.participants.get(&prefix) {
        Some(p) => p.is_client && !p.is_my_client && prefix != server_prefix,
        None => false,
    }
}

/// §4.4.3: insert a writer or reader record, link it to its owning
/// participant, establish matching ack-map edges against the
/// opposite-direction topic peers (including cross-matching against the
/// virtual topic), and mark the relevant topics dirty.
fn create_endpoint(
    state: &mut DdbState,
    server_prefix: GuidPrefix,
    change: ChangePtr,
    topic: String,
    is_writer: bool,
) -> Result<(), DdbError> {
    let guid = change.instance_handle;
    let owner_prefix = guid.prefix;
    let is_virtual = guid.entity_id.is_virtual();
    let originator = change.writer_guid.prefix;

    if !state.participants.contains_key(&owner_prefix) {
        return Err(DdbError::OrphanEndpoint(guid.to_string()));
    }

    let mut record = EndpointRecord::new(change, topic.clone(), is_virtual);
    record.ack_map.set(originator, AckStatus::RelevantAcked);

    if is_writer {
        state.writers.insert(guid, record);
        state.participants.get_mut(&owner_prefix).unwrap().writers.insert(guid);
    } else {
        state.readers.insert(guid, record);
        state.participants.get_mut(&owner_prefix).unwrap().readers.insert(guid);
    }

    if is_virtual {
        let real_topics: Vec<String> = if is_writer {
            state.readers_by_topic.keys().filter(|t| t.as_str() != VIRTUAL_TOPIC).cloned().collect()
        } else {
            state.writers_by_topic.keys().filter(|t| t.as_str() != VIRTUAL_TOPIC).cloned().collect()
        };
        for real_topic in real_topics {
            let peers: Vec<Guid> = peer_guids(state, &real_topic, is_writer);
            for peer in peers {
                match_virtual_against_real(state, server_prefix, owner_prefix, peer, !is_writer, &real_topic);
            }
        }
    } else {
        let peers_in_topic = peer_guids(state, &topic, is_writer);
        for peer in peers_in_topic {
            match_real_pair(state, server_prefix, guid, owner_prefix, peer, is_writer);
        }
        let virtual_peers = peer_guids(state, VIRTUAL_TOPIC, is_writer);
        for vpeer in virtual_peers {
            let vpeer_owner = vpeer.prefix;
            match_virtual_against_real(state, server_prefix, vpeer_owner, guid, is_writer, &topic);
        }
    }

    if is_writer {
        state.writers_by_topic.entry(topic.clone()).or_default().insert(guid);
    } else {
        state.readers_by_topic.entry(topic.clone()).or_default().insert(guid);
    }
    state.dirty_topics.insert(topic);

    Ok(())
}

fn peer_guids(state: &DdbState, topic: &str, new_is_writer: bool) -> Vec<Guid> {
    if new_is_writer {
        state.readers_by_topic.get(topic).map(|s| s.iter().copied().collect()).unwrap_or_default()
    } else {
        state.writers_by_topic.get(topic).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }
}

/// §4.4.3 bullets 1 and 3: two real (non-virtual) endpoints in the same
/// topic. Participants always get a symmetric unacked edge; endpoint
/// records get one too unless either side is only known via another
/// server (the "external participant" case — cross-participant edges
/// only, no direct endpoint matching).
fn match_real_pair(
    state: &mut DdbState,
    server_prefix: GuidPrefix,
    new_guid: Guid,
    new_owner: GuidPrefix,
    peer_guid: Guid,
    new_is_writer: bool,
) {
    let peer_owner = peer_guid.prefix;
    if new_owner == peer_owner {
        return;
    }

    if let Some(p) = state.participants.get_mut(&new_owner) {
        p.ack_map.set_if_absent(peer_owner, AckStatus::RelevantUnacked);
    }
    if let Some(p) = state.participants.get_mut(&peer_owner) {
        p.ack_map.set_if_absent(new_owner, AckStatus::RelevantUnacked);
    }

    let direct = !is_external(state, new_owner, server_prefix) && !is_external(state, peer_owner, server_prefix);
    if !direct {
        return;
    }

    if new_is_writer {
        if let Some(w) = state.writers.get_mut(&new_guid) {
            w.ack_map.set_if_absent(peer_owner, AckStatus::RelevantUnacked);
        }
        if let Some(r) = state.readers.get_mut(&peer_guid) {
            r.ack_map.set_if_absent(new_owner, AckStatus::RelevantUnacked);
        }
    } else {
        if let Some(r) = state.readers.get_mut(&new_guid) {
            r.ack_map.set_if_absent(peer_owner, AckStatus::RelevantUnacked);
        }
        if let Some(w) = state.writers.get_mut(&peer_guid) {
            w.ack_map.set_if_absent(new_owner, AckStatus::RelevantUnacked);
        }
    }
}

/// §4.4.3 bullet 2: one side is a virtual endpoint owned by `virtual_owner`
/// (this server), the other is the real endpoint `real_guid` in
/// `real_topic`. Only the real side's participant and record are updated;
/// the virtual side carries no real ack state. The real side's topic is
/// marked dirty so it gets reconsidered.
fn match_virtual_against_real(
    state: &mut DdbState,
    _server_prefix: GuidPrefix,
    virtual_owner: GuidPrefix,
    real_guid: Guid,
    real_is_writer: bool,
    real_topic: &str,
) {
    if let Some(p) = state.participants.get_mut(&real_guid.prefix) {
        p.ack_map.set_if_absent(virtual_owner, AckStatus::RelevantUnacked);
    }
    if real_is_writer {
        if let Some(w) = state.writers.get_mut(&real_guid) {
            w.ack_map.set_if_absent(virtual_owner, AckStatus::RelevantUnacked);
        }
    } else if let Some(r) = state.readers.get_mut(&real_guid) {
        r.ack_map.set_if_absent(virtual_owner, AckStatus::RelevantUnacked);
    }
    state.dirty_topics.insert(real_topic.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::db::DiscoveryDatabase;
    use crate::guid::EntityId;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    fn add_participant(db: &DiscoveryDatabase, peer: GuidPrefix, seq: i64) {
        let guid = Guid::participant(peer);
        let change = CacheChange::new(guid, guid, ChangeKind::Alive, seq, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_participant(change, ParticipantChangeData::default()));
        db.process_pdp_data_queue();
    }

    #[test]
    fn matching_writer_and_reader_in_same_topic_get_unacked_edges() {
        let server = prefix(1);
        let writer_owner = prefix(2);
        let reader_owner = prefix(3);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));
        add_participant(&db, writer_owner, 1);
        add_participant(&db, reader_owner, 1);

        let writer_guid = Guid::new(writer_owner, EntityId([0, 0, 1, crate::guid::entity_kind_byte::WRITER_WITH_KEY]));
        let writer_change =
            CacheChange::new(writer_guid, writer_guid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_endpoint(writer_change, "topic-a".into()));
        db.process_edp_data_queue();

        let reader_guid = Guid::new(reader_owner, EntityId([0, 0, 1, crate::guid::entity_kind_byte::READER_WITH_KEY]));
        let reader_change =
            CacheChange::new(reader_guid, reader_guid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_endpoint(reader_change, "topic-a".into()));
        db.process_edp_data_queue();

        let guard = db.state.lock();
        let state = guard.borrow();
        assert!(state.writers.get(&writer_guid).unwrap().ack_map.is_unacked(&reader_owner));
        assert!(state.readers.get(&reader_guid).unwrap().ack_map.is_unacked(&writer_owner));
    }

    #[test]
    fn endpoint_with_no_owning_participant_is_rejected() {
        let server = prefix(1);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));
        let owner = prefix(9);
        let guid = Guid::new(owner, EntityId([0, 0, 1, crate::guid::entity_kind_byte::WRITER_WITH_KEY]));
        let change = CacheChange::new(guid, guid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_endpoint(change, "topic-a".into()));
        db.process_edp_data_queue();

        let guard = db.state.lock();
        assert!(!guard.borrow().writers.contains_key(&guid));
    }

    #[test]
    fn superseded_participant_update_is_routed_to_release() {
        let server = prefix(1);
        let peer = prefix(2);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));
        add_participant(&db, peer, 5);

        let guid = Guid::participant(peer);
        let stale = CacheChange::new(guid, guid, ChangeKind::Alive, 3, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_participant(stale, ParticipantChangeData::default()));
        db.process_pdp_data_queue();

        let guard = db.state.lock();
        let state = guard.borrow();
        assert_eq!(state.participants.get(&peer).unwrap().change.sample_identity.sequence_number, 5);
        assert!(state.changes_to_release.iter().any(|c| c.sample_identity.sequence_number == 3));
    }
}
