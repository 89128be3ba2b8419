// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal traits standing in for the out-of-scope RTPS transport (§1
//! "Out of scope"): a pool that owns CacheChange storage, and a send
//! primitive that delivers a CacheChange to a set of reader GUIDs.
//!
//! The DDB depends only on these, never on a concrete transport. A
//! `StubTransport` is provided for the demo binary and for tests.

use crate::ack_functor::{ProxyAckState, ReaderProxyId};
use crate::change::ChangePtr;
use crate::guid::Guid;
use std::net::SocketAddr;

/// Ownership sink the DDB hands released CacheChanges back to (§4.4.7,
/// §5 "Shared resources").
pub trait CacheChangePool: Send + Sync {
    /// Return a change this server originated to the writer-side pool.
    fn release_writer_change(&self, change: ChangePtr);
    /// Return a change that originated elsewhere to the reader-side pool.
    fn release_reader_change(&self, change: ChangePtr);
}

/// Delivers one CacheChange to a set of reader GUIDs over a set of
/// locators (§1: "a send primitive that delivers a CacheChange to a set
/// of reader GUIDs over a set of locators").
pub trait SendPrimitive: Send + Sync {
    fn send(&self, change: &ChangePtr, readers: &[Guid], locators: &[SocketAddr]);
}

/// Queried by the server routine's ack-processing step (§4.6 step 1): for
/// one CacheChange, the current ack state of every ReaderProxy of the
/// writer that sent it. A real transport derives this from ACKNACKs; the
/// reliability protocol itself stays out of scope (§1).
pub trait AckOracle: Send + Sync {
    fn proxy_states(&self, change: &ChangePtr) -> Vec<(ReaderProxyId, ProxyAckState)>;
}

/// Called by the inbound listener glue (§4.7 points 4/5) once a disposal
/// has been accepted by the DDB, so the higher transport layer can drop
/// its own ParticipantProxyData/ReaderProxy/WriterProxy bookkeeping. The
/// DDB itself has no notion of "proxy" — that lives entirely on the
/// transport side (§1 Non-goals).
pub trait ProxyLifecycle: Send + Sync {
    fn erase_participant_proxy(&self, guid_prefix: crate::guid::GuidPrefix);
    fn erase_endpoint_proxy(&self, guid: Guid);
}

/// In-memory stand-in used by the demo binary and by tests: records
/// released/sent changes instead of touching real sockets.
#[derive(Default)]
pub struct StubTransport {
    released_writer: parking_lot::Mutex<Vec<ChangePtr>>,
    released_reader: parking_lot::Mutex<Vec<ChangePtr>>,
    sent: parking_lot::Mutex<Vec<(ChangePtr, Vec<Guid>)>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn released_writer_count(&self) -> usize {
        self.released_writer.lock().len()
    }

    pub fn released_reader_count(&self) -> usize {
        self.released_reader.lock().len()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl CacheChangePool for StubTransport {
    fn release_writer_change(&self, change: ChangePtr) {
        self.released_writer.lock().push(change);
    }

    fn release_reader_change(&self, change: ChangePtr) {
        self.released_reader.lock().push(change);
    }
}

impl SendPrimitive for StubTransport {
    fn send(&self, change: &ChangePtr, readers: &[Guid], _locators: &[SocketAddr]) {
        self.sent.lock().push((change.clone(), readers.to_vec()));
    }
}

impl ProxyLifecycle for StubTransport {
    fn erase_participant_proxy(&self, guid_prefix: crate::guid::GuidPrefix) {
        tracing::debug!(%guid_prefix, "stub transport: erase participant proxy");
    }

    fn erase_endpoint_proxy(&self, guid: Guid) {
        tracing::debug!(%guid, "stub transport: erase endpoint proxy");
    }
}

impl AckOracle for StubTransport {
    /// Always-reliable stand-in: every reader this change was sent to is
    /// reported acked immediately, since the stub has no real ACKNACK loop.
    fn proxy_states(&self, change: &ChangePtr) -> Vec<(ReaderProxyId, ProxyAckState)> {
        self.sent
            .lock()
            .iter()
            .filter(|(sent_change, _)| std::sync::Arc::ptr_eq(sent_change, change))
            .flat_map(|(_, readers)| {
                readers
                    .iter()
                    .map(|r| (ReaderProxyId { reader_prefix: r.prefix }, ProxyAckState::Acked))
            })
            .collect()
    }
}
