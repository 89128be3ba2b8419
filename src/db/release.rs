// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! §4.4.6-4.4.7: drain the three transient send lists into the builtin
//! writer histories, push disposals into those same histories, and return
//! released CacheChange ownership to the transport pool (C11).

use super::{DdbState, DiscoveryDatabase};
use crate::change::{ChangeKind, ChangeOrigin, ChangePtr, SampleIdentity};
use crate::guid::{EntityKind, Guid};
use crate::transport::CacheChangePool;
use tracing::debug;

/// One builtin writer's reliable-writer history: the rewritten copies
/// actually handed to the send primitive, keyed by sample identity.
#[derive(Debug, Default)]
pub struct BuiltinWriterHistory(Vec<ChangePtr>);

impl BuiltinWriterHistory {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangePtr> {
        self.0.iter()
    }

    pub fn push(&mut self, change: ChangePtr) {
        self.0.push(change);
    }

    /// Remove and return the entry sharing `sample_identity`, if any,
    /// without returning it to any pool — the DDB still owns the pointer
    /// at this point, it is merely no longer the most current copy.
    pub fn remove_by_sample_identity(&mut self, sample_identity: SampleIdentity) -> Option<ChangePtr> {
        let pos = self.0.iter().position(|c| c.sample_identity == sample_identity)?;
        Some(self.0.remove(pos))
    }
}

/// §4.4.6: drain one transient list into `history`, rewriting each change's
/// `writer_guid` to `writer_guid` so it reads as originating from that
/// builtin writer, then clear the list.
fn process_to_send_list(list: &mut Vec<ChangePtr>, writer_guid: Guid, history: &mut BuiltinWriterHistory) {
    for change in list.drain(..) {
        if history.remove_by_sample_identity(change.sample_identity).is_some() {
            debug!("superseded entry dropped from builtin writer history without release");
        }
        history.push(change.rewrite_writer(writer_guid));
    }
}

pub(super) fn process_to_send_lists(db: &DiscoveryDatabase) {
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    let server = db.server_guid_prefix();
    let DdbState {
        pdp_to_send,
        edp_pub_to_send,
        edp_sub_to_send,
        pdp_history,
        edp_pub_history,
        edp_sub_history,
        ..
    } = &mut *state;
    process_to_send_list(pdp_to_send, Guid::builtin_pdp_writer(server), pdp_history);
    process_to_send_list(edp_pub_to_send, Guid::builtin_edp_pub_writer(server), edp_pub_history);
    process_to_send_list(edp_sub_to_send, Guid::builtin_edp_sub_writer(server), edp_sub_history);
}

/// §4.4.6, disposal half: push each queued disposal into the builtin
/// writer history matching its entity kind, the same way a regular
/// send-list entry is pushed. Returns whether any disposal was processed.
pub(super) fn process_disposals(db: &DiscoveryDatabase) -> bool {
    use crate::guid::EntityKind;

    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    if state.disposals.is_empty() {
        return false;
    }
    let server = db.server_guid_prefix();
    let disposals = std::mem::take(&mut state.disposals);
    for change in disposals {
        match change.instance_handle.kind() {
            EntityKind::Participant => {
                if state
                    .pdp_history
                    .remove_by_sample_identity(change.sample_identity)
                    .is_some()
                {
                    debug!("superseded DATA(p)/DATA(Up) dropped from pdp history without release");
                }
                state
                    .pdp_history
                    .push(change.rewrite_writer(Guid::builtin_pdp_writer(server)));
            }
            EntityKind::Writer => {
                if state
                    .edp_pub_history
                    .remove_by_sample_identity(change.sample_identity)
                    .is_some()
                {
                    debug!("superseded DATA(Uw) dropped from edp-pub history without release");
                }
                state
                    .edp_pub_history
                    .push(change.rewrite_writer(Guid::builtin_edp_pub_writer(server)));
            }
            EntityKind::Reader => {
                if state
                    .edp_sub_history
                    .remove_by_sample_identity(change.sample_identity)
                    .is_some()
                {
                    debug!("superseded DATA(Ur) dropped from edp-sub history without release");
                }
                state
                    .edp_sub_history
                    .push(change.rewrite_writer(Guid::builtin_edp_sub_writer(server)));
            }
            _ => debug!("disposal of a non-participant/writer/reader change dropped"),
        }
    }
    true
}

/// §4.4.7: return every pointer in `changes_to_release` to the transport
/// pool (the writer-pool if this server originated it, else the
/// reader-pool), first removing any lingering copy from the matching
/// builtin writer history.
pub(super) fn process_changes_release(db: &DiscoveryDatabase, pool: &dyn CacheChangePool) {
    let guard = db.state.lock();
    let mut state = guard.borrow_mut();
    let released = std::mem::take(&mut state.changes_to_release);
    for change in released {
        match change.origin {
            ChangeOrigin::ThisServer => {
                use crate::guid::EntityKind;
                let removed = match change.instance_handle.kind() {
                    EntityKind::Participant => state
                        .pdp_history
                        .remove_by_sample_identity(change.sample_identity),
                    EntityKind::Writer => state
                        .edp_pub_history
                        .remove_by_sample_identity(change.sample_identity),
                    EntityKind::Reader => state
                        .edp_sub_history
                        .remove_by_sample_identity(change.sample_identity),
                    _ => None,
                };
                if removed.is_none() {
                    debug!("released change was not present in its builtin writer history (already absent, as normal)");
                }
                pool.release_writer_change(change);
            }
            ChangeOrigin::Remote => pool.release_reader_change(change),
        }
    }
}
