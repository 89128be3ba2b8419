// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! §4.2 relevance predicates and §4.3's `record_ack` (the ack functor's
//! one piece of write access into the DDB).

use super::{DdbState, DiscoveryDatabase};
use crate::ack::AckStatus;
use crate::change::{ChangeKind, ChangePtr, SampleIdentity};
use crate::guid::{EntityKind, Guid, GuidPrefix};
use tracing::debug;

/// §4.2: a DATA(p) this server itself originated is always relevant to
/// every PDP reader; otherwise relevance is just whether the participant's
/// own ack map still shows the reader's host as unacked. Unlike
/// `edp_is_relevant`, there is only the one ack map here, so "matched" and
/// "unacked" are mutually exclusive outcomes of the same lookup, not two
/// separate gates.
pub(super) fn pdp_is_relevant(db: &DiscoveryDatabase, change: &ChangePtr, reader_guid: &Guid) -> bool {
    if change.writer_guid.prefix == db.server_guid_prefix() {
        return true;
    }
    let prefix = change.instance_handle.prefix;
    let guard = db.state.lock();
    let state = guard.borrow();
    let Some(participant) = state.participants.get(&prefix) else {
        return false;
    };
    participant.ack_map.is_unacked(&reader_guid.prefix)
}

fn edp_is_relevant(
    db: &DiscoveryDatabase,
    endpoint_guid: Guid,
    reader_guid: &Guid,
    lookup: impl Fn(&super::DdbState) -> Option<&crate::endpoint::EndpointRecord>,
) -> bool {
    let guard = db.state.lock();
    let state = guard.borrow();
    let Some(participant) = state.participants.get(&endpoint_guid.prefix) else {
        return false;
    };
    if !participant.ack_map.is_matched(&reader_guid.prefix) {
        return false;
    }
    let Some(record) = lookup(&state) else {
        return false;
    };
    record.ack_map.is_unacked(&reader_guid.prefix)
}

pub(super) fn edp_pub_is_relevant(db: &DiscoveryDatabase, change: &ChangePtr, reader_guid: &Guid) -> bool {
    let writer_guid = change.instance_handle;
    edp_is_relevant(db, writer_guid, reader_guid, move |state| state.writers.get(&writer_guid))
}

pub(super) fn edp_sub_is_relevant(db: &DiscoveryDatabase, change: &ChangePtr, reader_guid: &Guid) -> bool {
    let reader_record_guid = change.instance_handle;
    edp_is_relevant(db, reader_record_guid, reader_guid, move |state| {
        state.readers.get(&reader_record_guid)
    })
}

/// §4.3 step 2: a ReaderProxy reports `change` acked by `peer_prefix`. If
/// the record's current change still matches `sample_identity`, mark the
/// peer acked; otherwise the record was already superseded and the ack is
/// discarded. Per §3 Lifecycle / §4.5: once a DISPOSING record's ack map is
/// fully matched, the record is erased and its change released.
pub(super) fn record_ack(
    db: &DiscoveryDatabase,
    instance_handle: Guid,
    sample_identity: SampleIdentity,
    peer_prefix: GuidPrefix,
) {
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    let current_matches = match instance_handle.kind() {
        EntityKind::Participant => state
            .participants
            .get_mut(&instance_handle.prefix)
            .map(|p| (p.change.sample_identity == sample_identity).then(|| &mut p.ack_map)),
        EntityKind::Writer => state
            .writers
            .get_mut(&instance_handle)
            .map(|w| (w.change.sample_identity == sample_identity).then(|| &mut w.ack_map)),
        EntityKind::Reader => state
            .readers
            .get_mut(&instance_handle)
            .map(|r| (r.change.sample_identity == sample_identity).then(|| &mut r.ack_map)),
        _ => None,
    };
    match current_matches.flatten() {
        Some(ack_map) => ack_map.set(peer_prefix, AckStatus::RelevantAcked),
        None => {
            debug!(
                guid = %instance_handle,
                "ack discarded: record already superseded or absent"
            );
            return;
        }
    }
    erase_if_disposed_and_matched(&mut state, instance_handle);
}

/// Erase `instance_handle`'s record if it is in the DISPOSING state (its
/// current change is a disposal) and every peer has now matched it. The
/// record's change joins `changes_to_release` for §4.4.7 to hand back to
/// the transport pool.
fn erase_if_disposed_and_matched(state: &mut DdbState, instance_handle: Guid) {
    match instance_handle.kind() {
        EntityKind::Participant => {
            let done = state
                .participants
                .get(&instance_handle.prefix)
                .is_some_and(|p| p.change.kind == ChangeKind::Disposed && p.ack_map.all_matched());
            if done {
                if let Some(p) = state.participants.remove(&instance_handle.prefix) {
                    state.changes_to_release.push(p.change);
                }
            }
        }
        EntityKind::Writer => {
            let done = state
                .writers
                .get(&instance_handle)
                .is_some_and(|w| w.change.kind == ChangeKind::Disposed && w.ack_map.all_matched());
            if done {
                if let Some(w) = state.writers.remove(&instance_handle) {
                    state
                        .writers_by_topic
                        .entry(w.topic.clone())
                        .and_modify(|s| {
                            s.remove(&instance_handle);
                        });
                    state.changes_to_release.push(w.change);
                }
            }
        }
        EntityKind::Reader => {
            let done = state
                .readers
                .get(&instance_handle)
                .is_some_and(|r| r.change.kind == ChangeKind::Disposed && r.ack_map.all_matched());
            if done {
                if let Some(r) = state.readers.remove(&instance_handle) {
                    state
                        .readers_by_topic
                        .entry(r.topic.clone())
                        .and_modify(|s| {
                            s.remove(&instance_handle);
                        });
                    state.changes_to_release.push(r.change);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::guid::GuidPrefix;
    use crate::participant::ParticipantChangeData;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    #[test]
    fn disposed_participant_erased_once_every_peer_acks() {
        let server = prefix(1);
        let peer = prefix(2);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));

        let alive = CacheChange::new(
            Guid::participant(peer),
            Guid::participant(peer),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::Remote,
        );
        assert!(db.update_participant(alive, ParticipantChangeData::default()));
        db.process_pdp_data_queue();

        let disposal = CacheChange::new(
            Guid::participant(peer),
            Guid::participant(peer),
            ChangeKind::Disposed,
            2,
            vec![],
            ChangeOrigin::Remote,
        );
        assert!(db.update_participant(disposal.clone(), ParticipantChangeData::default()));
        db.process_pdp_data_queue();

        // The dispose step already forces {server, originator} to ACKED
        // (backpropagation suppression), so with no other peer ever added
        // to this record's ack map it is already fully matched; the next
        // ack delivery (even a redundant one for the originator) observes
        // that and erases the record.
        db.record_ack(Guid::participant(peer), disposal.sample_identity, peer);
        let guard = db.state.lock();
        assert!(!guard.borrow().participants.contains_key(&peer));
        assert!(guard.borrow().changes_to_release.iter().any(|c| c.sample_identity == disposal.sample_identity));
    }

    #[test]
    fn disposed_participant_survives_while_a_peer_remains_unacked() {
        let server = prefix(1);
        let origin = prefix(2);
        let other_peer = prefix(3);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));

        let alive = CacheChange::new(
            Guid::participant(origin),
            Guid::participant(origin),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::Remote,
        );
        assert!(db.update_participant(alive, ParticipantChangeData::default()));
        db.process_pdp_data_queue();
        {
            let guard = db.state.lock();
            guard
                .borrow_mut()
                .participants
                .get_mut(&origin)
                .unwrap()
                .ack_map
                .set(other_peer, AckStatus::RelevantUnacked);
        }

        let disposal = CacheChange::new(
            Guid::participant(origin),
            Guid::participant(origin),
            ChangeKind::Disposed,
            2,
            vec![],
            ChangeOrigin::Remote,
        );
        assert!(db.update_participant(disposal.clone(), ParticipantChangeData::default()));
        db.process_pdp_data_queue();

        // `other_peer` is still unacked, so the record must survive.
        let guard = db.state.lock();
        assert!(guard.borrow().participants.contains_key(&origin));
    }
}
