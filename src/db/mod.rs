// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `DiscoveryDatabase` (C4): owns every record, every topic index, the
//! dirty-topic set, and the four outbound lists. This module holds the
//! struct, construction, `update()`, and lifecycle (`enable`/`disable`/
//! `clear`); the reconciliation algorithm itself lives in the sibling
//! `queues`, `dispose`, `reconcile`, `release`, and `relevance` modules.

mod dispose;
mod queues;
mod reconcile;
mod relevance;
mod release;

pub use release::BuiltinWriterHistory;

use crate::ack::AckStatus;
use crate::change::{ChangeOrigin, ChangePtr, SampleIdentity};
use crate::config::ServerConfig;
use crate::endpoint::EndpointRecord;
use crate::error::DdbError;
use crate::guid::{Guid, GuidPrefix};
use crate::participant::{ParticipantChangeData, ParticipantRecord};
use crate::queue::DoubleBufferedQueue;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// An item queued by the listener glue for the PDP queue (§4.1).
pub struct PdpQueueItem {
    pub change: ChangePtr,
    pub change_data: ParticipantChangeData,
}

/// An item queued by the listener glue for the EDP queue (§4.1).
pub struct EdpQueueItem {
    pub change: ChangePtr,
    pub topic_name: String,
}

/// All of the DDB's mutable state, guarded by a single re-entrant lock
/// (§5). A `RefCell` provides the interior mutability `ReentrantMutex`
/// needs (it hands out a non-exclusive guard that still only ever admits
/// one logical owner at a time, by re-entrant-lock discipline rather than
/// borrow-checking).
pub(crate) struct DdbState {
    pub participants: HashMap<GuidPrefix, ParticipantRecord>,
    pub writers: HashMap<Guid, EndpointRecord>,
    pub readers: HashMap<Guid, EndpointRecord>,
    pub writers_by_topic: HashMap<String, BTreeSet<Guid>>,
    pub readers_by_topic: HashMap<String, BTreeSet<Guid>>,
    pub dirty_topics: HashSet<String>,
    pub pdp_to_send: Vec<ChangePtr>,
    pub edp_pub_to_send: Vec<ChangePtr>,
    pub edp_sub_to_send: Vec<ChangePtr>,
    pub disposals: Vec<ChangePtr>,
    pub changes_to_release: Vec<ChangePtr>,
    pub known_changes: HashMap<SampleIdentity, Guid>,
    pub pdp_history: BuiltinWriterHistory,
    pub edp_pub_history: BuiltinWriterHistory,
    pub edp_sub_history: BuiltinWriterHistory,
}

impl DdbState {
    pub(crate) fn new() -> Self {
        Self {
            participants: HashMap::new(),
            writers: HashMap::new(),
            readers: HashMap::new(),
            writers_by_topic: HashMap::new(),
            readers_by_topic: HashMap::new(),
            dirty_topics: HashSet::new(),
            pdp_to_send: Vec::new(),
            edp_pub_to_send: Vec::new(),
            edp_sub_to_send: Vec::new(),
            disposals: Vec::new(),
            changes_to_release: Vec::new(),
            known_changes: HashMap::new(),
            pdp_history: BuiltinWriterHistory::new(),
            edp_pub_history: BuiltinWriterHistory::new(),
            edp_sub_history: BuiltinWriterHistory::new(),
        }
    }
}

/// The discovery database core (C4).
pub struct DiscoveryDatabase {
    pub(crate) config: ServerConfig,
    pub(crate) enabled: AtomicBool,
    pub(crate) state: ReentrantMutex<RefCell<DdbState>>,
    pub(crate) pdp_queue: DoubleBufferedQueue<PdpQueueItem>,
    pub(crate) edp_queue: DoubleBufferedQueue<EdpQueueItem>,
}

impl DiscoveryDatabase {
    pub fn new(config: ServerConfig) -> Self {
        let db = Self {
            config,
            enabled: AtomicBool::new(false),
            state: ReentrantMutex::new(RefCell::new(DdbState::new())),
            pdp_queue: DoubleBufferedQueue::new(),
            edp_queue: DoubleBufferedQueue::new(),
        };
        db.enable();
        db
    }

    pub fn server_guid_prefix(&self) -> GuidPrefix {
        self.config.server_guid_prefix
    }

    pub fn server_config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Disable the database. Per §5, this transition happens exactly once
    /// before destruction.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Return ownership of every CacheChange the DDB still holds, for
    /// teardown (§5). Errors if still enabled (§7 `CLEAR_WHILE_ENABLED`).
    pub fn clear(&self) -> Result<Vec<ChangePtr>, DdbError> {
        if self.is_enabled() {
            error!("clear() called while discovery database is still enabled");
            return Err(DdbError::ClearWhileEnabled);
        }
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let mut out = Vec::new();
        out.extend(state.participants.drain().map(|(_, r)| r.change));
        out.extend(state.writers.drain().map(|(_, r)| r.change));
        out.extend(state.readers.drain().map(|(_, r)| r.change));
        out.append(&mut state.pdp_to_send);
        out.append(&mut state.edp_pub_to_send);
        out.append(&mut state.edp_sub_to_send);
        out.append(&mut state.disposals);
        out.append(&mut state.changes_to_release);
        state.writers_by_topic.clear();
        state.readers_by_topic.clear();
        state.dirty_topics.clear();
        state.known_changes.clear();
        Ok(out)
    }

    /// §4.1: enqueue a PDP (participant) change. Returns `false` on
    /// `DISABLED` or `BAD_KIND`; caller keeps ownership in that case.
    pub fn update_participant(
        &self,
        change: ChangePtr,
        change_data: ParticipantChangeData,
    ) -> bool {
        if !self.is_enabled() {
            warn!("update() on disabled discovery database");
            return false;
        }
        if change.instance_handle.kind() != crate::guid::EntityKind::Participant {
            error!(guid = %change.instance_handle, "BAD_KIND: expected participant change on PDP queue");
            return false;
        }
        self.pdp_queue.push(PdpQueueItem { change, change_data });
        true
    }

    /// §4.1: enqueue an EDP (writer/reader) change.
    pub fn update_endpoint(&self, change: ChangePtr, topic_name: String) -> bool {
        if !self.is_enabled() {
            warn!("update() on disabled discovery database");
            return false;
        }
        use crate::guid::EntityKind;
        match change.instance_handle.kind() {
            EntityKind::Writer | EntityKind::Reader => {}
            _ => {
                error!(guid = %change.instance_handle, "BAD_KIND: expected writer/reader change on EDP queue");
                return false;
            }
        }
        self.edp_queue.push(EdpQueueItem { change, topic_name });
        true
    }

    pub fn data_queue_empty(&self) -> bool {
        self.pdp_queue.is_empty() && self.edp_queue.is_empty()
    }

    /// §4.4.1.
    pub fn process_pdp_data_queue(&self) {
        queues::process_pdp_queue(self);
    }

    /// §4.4.1.
    pub fn process_edp_data_queue(&self) {
        queues::process_edp_queue(self);
    }

    /// §4.4.5. Returns whether any topic remains dirty.
    pub fn process_dirty_topics(&self) -> bool {
        reconcile::process_dirty_topics(self)
    }

    /// §4.4.6, disposal half: push disposals into the matching builtin
    /// writer history. Returns whether any disposal was processed.
    pub fn process_disposals(&self) -> bool {
        release::process_disposals(self)
    }

    /// §4.4.7.
    pub fn process_changes_release(&self, pool: &dyn crate::transport::CacheChangePool) {
        release::process_changes_release(self, pool)
    }

    /// §4.4.6, send-list half.
    pub fn process_to_send_lists(&self) {
        release::process_to_send_lists(self)
    }

    pub fn pdp_to_send(&self) -> Vec<ChangePtr> {
        self.state.lock().borrow().pdp_to_send.clone()
    }

    pub fn edp_publications_to_send(&self) -> Vec<ChangePtr> {
        self.state.lock().borrow().edp_pub_to_send.clone()
    }

    pub fn edp_subscriptions_to_send(&self) -> Vec<ChangePtr> {
        self.state.lock().borrow().edp_sub_to_send.clone()
    }

    pub fn clear_pdp_to_send(&self) {
        self.state.lock().borrow_mut().pdp_to_send.clear();
    }

    pub fn clear_edp_publications_to_send(&self) {
        self.state.lock().borrow_mut().edp_pub_to_send.clear();
    }

    pub fn clear_edp_subscriptions_to_send(&self) {
        self.state.lock().borrow_mut().edp_sub_to_send.clear();
    }

    pub fn changes_to_dispose(&self) -> Vec<ChangePtr> {
        self.state.lock().borrow().disposals.clone()
    }

    pub fn clear_changes_to_dispose(&self) {
        self.state.lock().borrow_mut().disposals.clear();
    }

    pub fn changes_to_release(&self) -> Vec<ChangePtr> {
        self.state.lock().borrow().changes_to_release.clone()
    }

    pub fn clear_changes_to_release(&self) {
        self.state.lock().borrow_mut().changes_to_release.clear();
    }

    /// §6: participants with `is_my_client | is_my_server`.
    pub fn direct_clients_and_servers(&self) -> Vec<GuidPrefix> {
        self.state
            .lock()
            .borrow()
            .participants
            .values()
            .filter(|p| p.is_direct_peer())
            .map(|p| p.guid_prefix)
            .collect()
    }

    /// §4.4.8 / §8 P3: true iff the own participant's ack map has every
    /// peer acked.
    pub fn server_acked_by_all(&self) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        match state.participants.get(&self.server_guid_prefix()) {
            Some(p) => p.ack_map.all_matched(),
            None => false,
        }
    }

    /// True iff every configured upstream server has acked our DATA(p).
    pub fn server_acked_by_my_servers(&self) -> bool {
        self.ack_pending_servers().is_empty()
    }

    /// Upstream servers that have not yet acked our own DATA(p) (used by
    /// the ping routine, §4.6).
    pub fn ack_pending_servers(&self) -> Vec<GuidPrefix> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let Some(own) = state.participants.get(&self.server_guid_prefix()) else {
            return self
                .config
                .upstream_servers
                .iter()
                .map(|u| u.guid_prefix)
                .collect();
        };
        self.config
            .upstream_servers
            .iter()
            .map(|u| u.guid_prefix)
            .filter(|prefix| !own.ack_map.is_matched(prefix))
            .collect()
    }

    /// §4.4.8: pending work remains if our own DATA(p) isn't fully acked,
    /// or any builtin writer history holds more than its steady-state
    /// floor (0 for EDP, 1 for PDP — our own DATA(p)).
    pub fn pending_ack(&self) -> bool {
        if !self.server_acked_by_all() {
            return true;
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        state.pdp_history.len() > 1 || state.edp_pub_history.len() > 0 || state.edp_sub_history.len() > 0
    }

    /// Re-queue this server's own current DATA(p) onto `pdp_to_send` (the
    /// ping routine, §4.6): used to re-send to upstream servers that have
    /// not yet acked it, without touching the stored record or its acks.
    pub fn requeue_own_dap(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Some(p) = state.participants.get(&self.server_guid_prefix()) {
            let change = p.change.clone();
            if !crate::change::ptr_already_in(&state.pdp_to_send, &change) {
                state.pdp_to_send.push(change);
            }
        }
    }

    /// The current contents of the three builtin writer histories (§4.6
    /// step 1: "walks each builtin writer's history"), used by the server
    /// routine to construct one ack functor per outstanding change.
    pub fn builtin_writer_changes(&self) -> Vec<ChangePtr> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state
            .pdp_history
            .iter()
            .chain(state.edp_pub_history.iter())
            .chain(state.edp_sub_history.iter())
            .cloned()
            .collect()
    }

    /// Test/demo introspection: the ack status `peer` currently has in
    /// `target` participant's ack map, if `target` is known.
    pub fn participant_ack_status(&self, target: &GuidPrefix, peer: &GuidPrefix) -> Option<AckStatus> {
        self.state.lock().borrow().participants.get(target).and_then(|p| p.ack_map.get(peer))
    }

    pub fn participant_exists(&self, prefix: &GuidPrefix) -> bool {
        self.state.lock().borrow().participants.contains_key(prefix)
    }

    pub fn writer_exists(&self, guid: &Guid) -> bool {
        self.state.lock().borrow().writers.contains_key(guid)
    }

    pub fn reader_exists(&self, guid: &Guid) -> bool {
        self.state.lock().borrow().readers.contains_key(guid)
    }

    pub fn participant_metatraffic_locators(&self, prefix: &GuidPrefix) -> Vec<SocketAddr> {
        self.state
            .lock()
            .borrow()
            .participants
            .get(prefix)
            .map(|p| p.metatraffic_locators.clone())
            .unwrap_or_default()
    }

    /// Construct an ack-recording functor for `change` (§4.3, C5). Exposed
    /// as a free function in `ack_functor` rather than a method here to
    /// avoid a cyclic `Arc<Self>` requirement on every call site; see
    /// `crate::ack_functor::AckFunctor::new`.
    pub(crate) fn record_ack(
        &self,
        instance_handle: Guid,
        sample_identity: SampleIdentity,
        peer_prefix: GuidPrefix,
    ) {
        relevance::record_ack(self, instance_handle, sample_identity, peer_prefix)
    }

    pub fn pdp_is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        relevance::pdp_is_relevant(self, change, reader_guid)
    }

    pub fn edp_pub_is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        relevance::edp_pub_is_relevant(self, change, reader_guid)
    }

    pub fn edp_sub_is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        relevance::edp_sub_is_relevant(self, change, reader_guid)
    }

    /// Erase an orphan endpoint record whose participant no longer exists
    /// (§6 `delete_entity_of_change`); used by the listener for DATA(Uw)/
    /// DATA(Ur) of an endpoint that was never actually registered.
    pub fn delete_entity_of_change(&self, change: &ChangePtr) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        match change.instance_handle.kind() {
            crate::guid::EntityKind::Writer => {
                state.writers.remove(&change.instance_handle);
            }
            crate::guid::EntityKind::Reader => {
                state.readers.remove(&change.instance_handle);
            }
            _ => debug!("delete_entity_of_change: not an endpoint"),
        }
    }
}

impl Drop for DiscoveryDatabase {
    fn drop(&mut self) {
        if self.is_enabled() {
            error!("DiscoveryDatabase dropped while still enabled");
            return;
        }
        let guard = self.state.lock();
        let state = guard.borrow();
        let outstanding = state.participants.len()
            + state.writers.len()
            + state.readers.len()
            + state.changes_to_release.len();
        if outstanding > 0 {
            error!(
                outstanding,
                "DiscoveryDatabase dropped with outstanding CacheChange ownership; clear() was not called"
            );
        }
    }
}

pub(crate) fn set_server_acked(state: &RefCell<DdbState>, server_prefix: GuidPrefix, peer: GuidPrefix) {
    if let Some(p) = state.borrow_mut().participants.get_mut(&server_prefix) {
        p.ack_map.set(peer, AckStatus::RelevantAcked);
    }
}
