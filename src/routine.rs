// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server routine (C6, §4.6): the periodic task that drives the whole
//! update loop, plus the "ping" task that re-sends this server's own
//! DATA(p) to upstream servers that have not yet acked it.
//!
//! One iteration runs the fixed phase order of §4.6 under the DDB's
//! exclusive lock; `process_*` calls only acquire it for one phase at a
//! time, so inbound listener threads can still push into the queues
//! between phases without ever contending with a whole-iteration hold.

use crate::ack_functor::{AckFunctor, ProxyAckState, ReaderProxyId};
use crate::change::ChangePtr;
use crate::db::DiscoveryDatabase;
use crate::guid::Guid;
use crate::transport::{AckOracle, CacheChangePool, SendPrimitive};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Drives the server routine and the ping routine (§4.6). Holds only
/// `Arc` handles, so it is cheap to clone and hand to a spawned task.
#[derive(Clone)]
pub struct ServerRoutine {
    db: Arc<DiscoveryDatabase>,
    pool: Arc<dyn CacheChangePool>,
    send: Arc<dyn SendPrimitive>,
    ack_oracle: Arc<dyn AckOracle>,
    wake: Arc<Notify>,
}

impl ServerRoutine {
    pub fn new(
        db: Arc<DiscoveryDatabase>,
        pool: Arc<dyn CacheChangePool>,
        send: Arc<dyn SendPrimitive>,
        ack_oracle: Arc<dyn AckOracle>,
    ) -> Self {
        Self {
            db,
            pool,
            send,
            ack_oracle,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Called by the inbound listener glue after a successful `update()`
    /// (§4.7 point 3: "wake the server routine") so a freshly queued item
    /// does not wait out a full idle period.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// §4.6 step 1: walk every builtin writer's history, invoke one ack
    /// functor per reader proxy, and return the functors that still report
    /// pending acks (used by `pending_ack()` via the DDB's own history
    /// lengths, so nothing further is done with the return value here
    /// beyond giving callers/tests visibility).
    fn process_writer_acknowledgements(&self) {
        for change in self.db.builtin_writer_changes() {
            let functor = AckFunctor::new(self.db.clone(), change.clone());
            for (proxy, state) in self.ack_oracle.proxy_states(&change) {
                functor.on_proxy(proxy, state);
            }
        }
    }

    /// One full iteration of §4.6's fixed phase order. Returns whether
    /// pending work remains (`pending_ack()`).
    pub fn run_once(&self) -> bool {
        debug!("server routine iteration start");
        self.process_writer_acknowledgements();
        self.db.process_pdp_data_queue();
        self.db.process_edp_data_queue();
        self.db.process_dirty_topics();
        self.db.process_changes_release(self.pool.as_ref());
        self.db.process_disposals();
        self.db.process_to_send_lists();
        let pending = self.db.pending_ack();
        debug!(pending, "server routine iteration end");
        pending
    }

    /// Dispatch every change currently sitting in the three builtin writer
    /// histories to the send primitive — the reliable-writer transmission
    /// step that, in a real transport, happens independently of the DDB
    /// and is what `AckOracle` later reports acks against (§1: the
    /// reliability protocol itself is out of scope). Called after
    /// `run_once` so this iteration's `process_to_send_lists` has already
    /// moved fresh announcements into history; a real caller would first
    /// resolve destination reader GUIDs/locators from matched
    /// ReaderProxies before calling `send`.
    pub fn dispatch_to_send_lists(&self, readers: &[Guid], locators: &[std::net::SocketAddr]) {
        for change in self.db.builtin_writer_changes() {
            self.send.send(&change, readers, locators);
        }
    }

    /// Runs iterations forever: re-runs immediately while the inbound
    /// queues are non-empty, re-arms the timer at the configured period
    /// while `pending_ack()` is true, and otherwise idles until `wake()`
    /// or the period elapses (§4.6 "after the pass... otherwise idle").
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let period = self.db.server_config().routine_period();
        loop {
            let pending = self.run_once();

            if !self.db.data_queue_empty() {
                continue;
            }

            if pending {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = self.wake.notified() => {}
                    _ = shutdown.notified() => break,
                }
            } else {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = shutdown.notified() => break,
                }
            }
        }
        info!("server routine shut down");
    }

    /// The "ping" task (§4.6): periodically re-send this server's own
    /// DATA(p) to any upstream server that has not yet acked it, by
    /// dropping it back onto the PDP send list so the next iteration
    /// re-dispatches it.
    pub async fn run_ping(&self, shutdown: Arc<Notify>) {
        let period = self.db.server_config().ping_period();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.notified() => break,
            }
            let pending_servers = self.db.ack_pending_servers();
            if pending_servers.is_empty() {
                continue;
            }
            debug!(count = pending_servers.len(), "re-pinging servers that have not acked our DATA(p)");
            self.db.requeue_own_dap();
            self.wake();
        }
        info!("ping routine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeKind, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::guid::GuidPrefix;
    use crate::participant::ParticipantChangeData;
    use crate::transport::StubTransport;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    #[test]
    fn run_once_drains_a_freshly_queued_participant() {
        let server = prefix(1);
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let transport = Arc::new(StubTransport::new());
        let routine = ServerRoutine::new(db.clone(), transport.clone(), transport.clone(), transport);

        let change = CacheChange::new(
            Guid::participant(server),
            Guid::participant(server),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        assert!(db.update_participant(change, ParticipantChangeData::default()));

        routine.run_once();
        assert!(db.data_queue_empty());
        assert_eq!(db.pdp_to_send().len(), 1);
    }

    #[test]
    fn run_once_is_idempotent_with_no_new_input() {
        let server = prefix(2);
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let transport = Arc::new(StubTransport::new());
        let routine = ServerRoutine::new(db.clone(), transport.clone(), transport.clone(), transport);

        routine.run_once();
        let first = db.pdp_to_send().len();
        routine.run_once();
        assert_eq!(db.pdp_to_send().len(), first);
    }
}
