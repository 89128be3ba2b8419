// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `CacheChange`: the opaque, transport-owned record of one received
//! announcement. The DDB never constructs the transport's real
//! `CacheChange`; it reads the handful of fields §3 grants it and tracks
//! ownership of the handle through `Arc` clones.

use crate::guid::Guid;
use std::sync::Arc;

/// ALIVE announcements update a record; DISPOSED announcements dispose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Alive,
    Disposed,
}

/// Writer GUID plus sequence number: identifies one sample unambiguously
/// and orders samples from the same writer (§3, §4.4.7, §8 P6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleIdentity {
    pub writer_guid: Guid,
    pub sequence_number: i64,
}

/// Which pool a change must be returned to once the DDB releases it
/// (§4.4.7): this server's own builtin writer history, or the transport's
/// reader pool for changes that originated elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    ThisServer,
    Remote,
}

/// The fields the DDB is permitted to read from a CacheChange (§3).
/// Ownership is represented by `Arc<CacheChange>` handles ("pointers")
/// moved between the DDB's collections; see DESIGN.md for why `Arc` is
/// the right stand-in for the original's raw, explicitly-transferred
/// pointer.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub writer_guid: Guid,
    pub instance_handle: Guid,
    pub kind: ChangeKind,
    pub sample_identity: SampleIdentity,
    pub serialized_payload: Vec<u8>,
    pub origin: ChangeOrigin,
}

/// Shared handle to a CacheChange. Cloning this clones the `Arc`, not the
/// payload; `Arc::ptr_eq` is the pointer-identity check invariant 4 talks
/// about ("a CacheChange pointer appears in at most one of...").
pub type ChangePtr = Arc<CacheChange>;

impl CacheChange {
    pub fn new(
        writer_guid: Guid,
        instance_handle: Guid,
        kind: ChangeKind,
        sequence_number: i64,
        serialized_payload: Vec<u8>,
        origin: ChangeOrigin,
    ) -> ChangePtr {
        Arc::new(CacheChange {
            writer_guid,
            instance_handle,
            kind,
            sample_identity: SampleIdentity {
                writer_guid,
                sequence_number,
            },
            serialized_payload,
            origin,
        })
    }

    /// A copy of this change with `writer_guid` (and the sample identity's
    /// writer_guid) rewritten to `new_writer` (§4.4.6): the builtin writer
    /// history owns a change that reads, on the wire, as if that writer
    /// sent it, while the original pointer in the owning record is
    /// untouched.
    pub fn rewrite_writer(&self, new_writer: Guid) -> ChangePtr {
        Arc::new(CacheChange {
            writer_guid: new_writer,
            instance_handle: self.instance_handle,
            kind: self.kind,
            sample_identity: SampleIdentity {
                writer_guid: new_writer,
                sequence_number: self.sample_identity.sequence_number,
            },
            serialized_payload: self.serialized_payload.clone(),
            origin: self.origin,
        })
    }

    /// An opaque marker change for a materialized virtual endpoint
    /// (§4.4.2, §9 Design Notes open question): carries no real payload
    /// and is never placed in a send list, only used to force
    /// reconciliation to consider a path toward it.
    pub fn virtual_marker(instance_handle: Guid) -> ChangePtr {
        Arc::new(CacheChange {
            writer_guid: instance_handle,
            instance_handle,
            kind: ChangeKind::Alive,
            sample_identity: SampleIdentity {
                writer_guid: instance_handle,
                sequence_number: 0,
            },
            serialized_payload: Vec::new(),
            origin: ChangeOrigin::ThisServer,
        })
    }
}

/// `O(1)` dedup key for the `known_changes` lookup table (SPEC_FULL.md §3
/// supplement) and for `Vec` dedup-by-pointer in the four send/disposal
/// lists.
pub fn ptr_already_in(list: &[ChangePtr], candidate: &ChangePtr) -> bool {
    list.iter().any(|c| Arc::ptr_eq(c, candidate))
}
