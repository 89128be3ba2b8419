// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end scenarios driving the whole update loop through
//! `InboundListener` for inbound delivery and direct `DiscoveryDatabase`
//! phase calls for inspection, with `ServerRoutine::run_once` used only
//! where a real ack round-trip (ack-processing -> reconciliation) is
//! needed to converge a topic.

use rtps_discovery_db::ack::AckStatus;
use rtps_discovery_db::change::{CacheChange, ChangeKind, ChangeOrigin};
use rtps_discovery_db::config::ServerConfig;
use rtps_discovery_db::db::DiscoveryDatabase;
use rtps_discovery_db::guid::{entity_kind_byte, EntityId, Guid, GuidPrefix};
use rtps_discovery_db::listener::InboundListener;
use rtps_discovery_db::participant::ParticipantChangeData;
use rtps_discovery_db::routine::ServerRoutine;
use rtps_discovery_db::transport::StubTransport;
use std::sync::Arc;

fn prefix(b: u8) -> GuidPrefix {
    let mut p = [0u8; 12];
    p[0] = b;
    GuidPrefix(p)
}

fn writer_guid(owner: GuidPrefix, n: u8) -> Guid {
    Guid::new(owner, EntityId([0, 0, n, entity_kind_byte::WRITER_WITH_KEY]))
}

fn reader_guid(owner: GuidPrefix, n: u8) -> Guid {
    Guid::new(owner, EntityId([0, 0, n, entity_kind_byte::READER_WITH_KEY]))
}

struct Harness {
    db: Arc<DiscoveryDatabase>,
    listener: InboundListener,
    routine: ServerRoutine,
}

impl Harness {
    fn new(server: GuidPrefix) -> Self {
        let config = ServerConfig::for_server(server);
        let db = Arc::new(DiscoveryDatabase::new(config));
        let transport = Arc::new(StubTransport::new());
        let routine = ServerRoutine::new(db.clone(), transport.clone(), transport.clone(), transport.clone());
        let listener = InboundListener::new(db.clone(), routine.clone(), transport.clone(), transport);
        Self { db, listener, routine }
    }

    fn announce_server(&self) {
        let guid = Guid::participant(self.db.server_guid_prefix());
        let change = CacheChange::new(guid, guid, ChangeKind::Alive, 1, Vec::new(), ChangeOrigin::ThisServer);
        assert!(self.db.update_participant(change, ParticipantChangeData::default()));
        self.db.process_pdp_data_queue();
        self.db.process_to_send_lists();
    }

    fn announce_participant(&self, peer: GuidPrefix, seq: i64, kind: ChangeKind, data: ParticipantChangeData) {
        let guid = Guid::participant(peer);
        let change = CacheChange::new(guid, guid, kind, seq, Vec::new(), ChangeOrigin::Remote);
        self.listener.on_pdp_change(change, data);
    }

    fn announce_endpoint(&self, guid: Guid, seq: i64, kind: ChangeKind, topic: &str) {
        let change = CacheChange::new(guid, guid, kind, seq, Vec::new(), ChangeOrigin::Remote);
        self.listener.on_edp_change(change, topic.to_string());
    }

    /// Establish mutual PDP acknowledgement between `a` and `b`: dispatch
    /// every builtin-writer-history entry to both, then run one full
    /// routine iteration so the ack-processing phase records it.
    fn mutually_ack(&self, a: GuidPrefix, b: GuidPrefix) {
        self.routine.dispatch_to_send_lists(&[Guid::participant(a), Guid::participant(b)], &[]);
        self.routine.run_once();
    }
}

/// A single client joins: its record is created with itself as the sole
/// acked peer (the originator), and it is recognized as a direct client.
#[test]
fn single_client_joins() {
    let server = prefix(1);
    let harness = Harness::new(server);

    let client = prefix(2);
    harness.announce_participant(
        client,
        1,
        ChangeKind::Alive,
        ParticipantChangeData { is_my_client: true, ..Default::default() },
    );
    harness.db.process_pdp_data_queue();

    assert!(harness.db.participant_exists(&client));
    assert_eq!(harness.db.participant_ack_status(&client, &client), Some(AckStatus::RelevantAcked));
    assert!(harness.db.direct_clients_and_servers().contains(&client));
}

/// A writer announced before its owning participant is known is rejected:
/// no writer record is created and the queue drains cleanly.
#[test]
fn endpoint_before_participant_is_rejected() {
    let harness = Harness::new(prefix(1));

    let orphan_owner = prefix(5);
    let guid = writer_guid(orphan_owner, 1);
    harness.announce_endpoint(guid, 1, ChangeKind::Alive, "topic-a");
    harness.db.process_edp_data_queue();

    assert!(!harness.db.writer_exists(&guid));
}

/// Two clients in the same topic: before either acks the other's DATA(p),
/// the topic stays dirty and PDP propagation is queued ahead of the EDP
/// announcements. Once mutual PDP acks land, the topic converges and both
/// EDP announcements are dispatched to the builtin writer histories.
#[test]
fn two_clients_same_topic_converge_after_mutual_pdp_ack() {
    let server = prefix(1);
    let harness = Harness::new(server);
    harness.announce_server();

    let c1 = prefix(2);
    let c2 = prefix(3);
    harness.announce_participant(c1, 1, ChangeKind::Alive, ParticipantChangeData::default());
    harness.announce_participant(c2, 1, ChangeKind::Alive, ParticipantChangeData::default());
    harness.db.process_pdp_data_queue();

    let w = writer_guid(c1, 1);
    let r = reader_guid(c2, 1);
    harness.announce_endpoint(w, 1, ChangeKind::Alive, "topic-a");
    harness.announce_endpoint(r, 1, ChangeKind::Alive, "topic-a");
    harness.db.process_edp_data_queue();

    // First pass: neither host has acked the other's PDP record yet.
    assert!(harness.db.process_dirty_topics());
    assert!(!harness.db.pdp_to_send().is_empty());
    assert!(harness.db.edp_publications_to_send().is_empty());
    harness.db.process_to_send_lists();

    harness.mutually_ack(c1, c2);

    // Second pass: both directions are now acked, so the topic converges.
    assert!(!harness.db.process_dirty_topics());
    let history = harness.db.builtin_writer_changes();
    assert!(history.iter().any(|c| c.instance_handle == w));
    assert!(history.iter().any(|c| c.instance_handle == r));
}

/// A client leaving disposes its participant record; its child writer is
/// released without a separate DATA(Uw), and the other client's ack map
/// no longer references the departed peer.
#[test]
fn client_leave_releases_children_and_unmatches_peers() {
    let server = prefix(1);
    let harness = Harness::new(server);
    harness.announce_server();

    let c1 = prefix(2);
    let c2 = prefix(3);
    harness.announce_participant(c1, 1, ChangeKind::Alive, ParticipantChangeData::default());
    harness.announce_participant(c2, 1, ChangeKind::Alive, ParticipantChangeData::default());
    harness.db.process_pdp_data_queue();

    let w = writer_guid(c1, 1);
    let r = reader_guid(c2, 1);
    harness.announce_endpoint(w, 1, ChangeKind::Alive, "topic-a");
    harness.announce_endpoint(r, 1, ChangeKind::Alive, "topic-a");
    harness.db.process_edp_data_queue();
    harness.db.process_to_send_lists();
    harness.mutually_ack(c1, c2);

    harness.announce_participant(c1, 2, ChangeKind::Disposed, ParticipantChangeData::default());
    harness.db.process_pdp_data_queue();

    assert!(!harness.db.writer_exists(&w));
    assert_eq!(harness.db.participant_ack_status(&c2, &c1), None);
    assert!(!harness.db.changes_to_dispose().is_empty());
}

/// A superseded participant update (lower sequence number arriving after a
/// higher one) never replaces the stored record and is routed to release.
#[test]
fn superseded_participant_update_is_dropped() {
    let server = prefix(1);
    let harness = Harness::new(server);

    let client = prefix(2);
    harness.announce_participant(client, 5, ChangeKind::Alive, ParticipantChangeData::default());
    harness.db.process_pdp_data_queue();
    harness.announce_participant(client, 3, ChangeKind::Alive, ParticipantChangeData::default());
    harness.db.process_pdp_data_queue();

    let released = harness.db.changes_to_release();
    assert!(released.iter().any(|c| c.sample_identity.sequence_number == 3));
}
