// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ack-recording functor (§4.3, C5).
//!
//! One instance is bound to a specific CacheChange and invoked once per
//! `ReaderProxy` of the writer that owns it. The root functor is
//! constructed while the caller already holds the DDB's exclusive lock
//! (step 1 of the server routine, §4.6); clones share that same state and
//! do not attempt to re-acquire anything, so the transport can copy the
//! functor freely across its per-proxy callback style without any lock
//! awareness.

use crate::change::{ChangePtr, SampleIdentity};
use crate::db::DiscoveryDatabase;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What the transport tells the functor about one reader proxy's view of
/// the bound change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAckState {
    /// The proxy never considered this change relevant (filtered upstream).
    Irrelevant,
    /// The proxy has acknowledged the change.
    Acked,
    /// The proxy has not yet acknowledged the change.
    Pending,
}

/// Per-proxy identity the transport passes in: which reader this proxy
/// represents, on the writer that owns the bound change.
#[derive(Debug, Clone, Copy)]
pub struct ReaderProxyId {
    pub reader_prefix: crate::guid::GuidPrefix,
}

#[derive(Clone)]
pub struct AckFunctor {
    db: Arc<DiscoveryDatabase>,
    change: ChangePtr,
    pending: Arc<AtomicBool>,
}

impl AckFunctor {
    /// Construct the root functor for `change`. Caller must already hold
    /// (or be about to enter) the DDB's exclusive section for this pass.
    pub fn new(db: Arc<DiscoveryDatabase>, change: ChangePtr) -> Self {
        Self {
            db,
            change,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invoke once per ReaderProxy (§4.3 steps 1-3).
    pub fn on_proxy(&self, proxy: ReaderProxyId, state: ProxyAckState) {
        match state {
            ProxyAckState::Irrelevant => {}
            ProxyAckState::Acked => {
                self.db.record_ack(
                    self.change.instance_handle,
                    self.change.sample_identity,
                    proxy.reader_prefix,
                );
            }
            ProxyAckState::Pending => {
                self.pending.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn sample_identity(&self) -> SampleIdentity {
        self.change.sample_identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeKind, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::guid::{Guid, GuidPrefix};

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    #[test]
    fn pending_true_after_one_pending_proxy() {
        let server = prefix(1);
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let change = CacheChange::new(
            Guid::participant(prefix(2)),
            Guid::participant(prefix(2)),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        let functor = AckFunctor::new(db, change);
        let a = functor.clone();
        let b = functor.clone();
        a.on_proxy(ReaderProxyId { reader_prefix: prefix(3) }, ProxyAckState::Acked);
        b.on_proxy(ReaderProxyId { reader_prefix: prefix(4) }, ProxyAckState::Pending);
        assert!(functor.pending());
    }

    #[test]
    fn not_pending_when_all_acked_or_irrelevant() {
        let server = prefix(1);
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let change = CacheChange::new(
            Guid::participant(prefix(2)),
            Guid::participant(prefix(2)),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        let functor = AckFunctor::new(db, change);
        functor.on_proxy(ReaderProxyId { reader_prefix: prefix(3) }, ProxyAckState::Acked);
        functor.on_proxy(ReaderProxyId { reader_prefix: prefix(4) }, ProxyAckState::Irrelevant);
        assert!(!functor.pending());
    }
}
