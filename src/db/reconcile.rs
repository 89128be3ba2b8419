// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! §4.4.5: dirty-topic reconciliation. Walks every dirty topic once,
//! deciding for each (writer, reader) pair whether PDP knowledge must
//! propagate first, or whether the EDP announcement itself can go out.

use super::DiscoveryDatabase;
use crate::ack::AckStatus;
use crate::change::ptr_already_in;

/// §4.4.5 / §6 `process_dirty_topics() -> bool`: returns whether any topic
/// remains dirty after this pass.
pub(super) fn process_dirty_topics(db: &DiscoveryDatabase) -> bool {
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();

    let topics: Vec<String> = state.dirty_topics.iter().cloned().collect();
    let mut still_dirty = Vec::new();

    for topic in topics {
        let writers: Vec<_> = state
            .writers_by_topic
            .get(&topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let readers: Vec<_> = state
            .readers_by_topic
            .get(&topic)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        let mut clearable = true;

        for &writer in &writers {
            for &reader in &readers {
                let writer_prefix = writer.prefix;
                let reader_prefix = reader.prefix;

                // (1) PDP path, reader -> writer direction.
                let reader_knows_writer_host = state
                    .participants
                    .get(&reader_prefix)
                    .and_then(|p| p.ack_map.get(&writer_prefix))
                    == Some(AckStatus::RelevantAcked);

                if reader_knows_writer_host {
                    // (2) EDP readers path.
                    let writer_unacked_on_reader = state
                        .readers
                        .get(&reader)
                        .map(|r| r.ack_map.is_unacked(&writer_prefix))
                        .unwrap_or(false);
                    if writer_unacked_on_reader {
                        if let Some(reader_change) = state.readers.get(&reader).map(|r| r.change.clone()) {
                            if !ptr_already_in(&state.edp_sub_to_send, &reader_change) {
                                state.edp_sub_to_send.push(reader_change);
                            }
                        }
                    }
                } else {
                    if let Some(reader_participant_change) =
                        state.participants.get(&reader_prefix).map(|p| p.change.clone())
                    {
                        if !ptr_already_in(&state.pdp_to_send, &reader_participant_change) {
                            state.pdp_to_send.push(reader_participant_change);
                        }
                    }
                    clearable = false;
                }

                // (3) PDP path, writer -> reader direction.
                let writer_knows_reader_host = state
                    .participants
                    .get(&writer_prefix)
                    .and_then(|p| p.ack_map.get(&reader_prefix))
                    == Some(AckStatus::RelevantAcked);

                if writer_knows_reader_host {
                    // (4) EDP writers path.
                    let reader_unacked_on_writer = state
                        .writers
                        .get(&writer)
                        .map(|w| w.ack_map.is_unacked(&reader_prefix))
                        .unwrap_or(false);
                    if reader_unacked_on_writer {
                        if let Some(writer_change) = state.writers.get(&writer).map(|w| w.change.clone()) {
                            if !ptr_already_in(&state.edp_pub_to_send, &writer_change) {
                                state.edp_pub_to_send.push(writer_change);
                            }
                        }
                    }
                } else {
                    if let Some(writer_participant_change) =
                        state.participants.get(&writer_prefix).map(|p| p.change.clone())
                    {
                        if !ptr_already_in(&state.pdp_to_send, &writer_participant_change) {
                            state.pdp_to_send.push(writer_participant_change);
                        }
                    }
                    clearable = false;
                }
            }
        }

        if !clearable {
            still_dirty.push(topic);
        }
    }

    state.dirty_topics = still_dirty.into_iter().collect();
    !state.dirty_topics.is_empty()
}

#[cfg(test)]
mod tests {
    use crate::change::{CacheChange, ChangeKind, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::db::DiscoveryDatabase;
    use crate::guid::{entity_kind_byte, EntityId, Guid, GuidPrefix};
    use crate::participant::ParticipantChangeData;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    fn add_participant(db: &DiscoveryDatabase, peer: GuidPrefix) {
        let guid = Guid::participant(peer);
        let change = CacheChange::new(guid, guid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_participant(change, ParticipantChangeData::default()));
        db.process_pdp_data_queue();
    }

    #[test]
    fn topic_stays_dirty_until_both_hosts_know_each_other_via_pdp() {
        let server = prefix(1);
        let writer_owner = prefix(2);
        let reader_owner = prefix(3);
        let db = DiscoveryDatabase::new(ServerConfig::for_server(server));
        add_participant(&db, writer_owner);
        add_participant(&db, reader_owner);

        let wguid = Guid::new(writer_owner, EntityId([0, 0, 1, entity_kind_byte::WRITER_WITH_KEY]));
        let wchange = CacheChange::new(wguid, wguid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_endpoint(wchange, "t".into()));
        db.process_edp_data_queue();

        let rguid = Guid::new(reader_owner, EntityId([0, 0, 1, entity_kind_byte::READER_WITH_KEY]));
        let rchange = CacheChange::new(rguid, rguid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::Remote);
        assert!(db.update_endpoint(rchange, "t".into()));
        db.process_edp_data_queue();

        // Neither participant has acked the other's PDP record yet, so the
        // topic must remain dirty and both hosts' DATA(p) must be queued.
        assert!(db.process_dirty_topics());
        assert!(!db.pdp_to_send().is_empty());
    }
}
