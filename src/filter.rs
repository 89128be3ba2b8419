// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound filter adapter (C8): binds the DDB's three relevance
//! predicates to one callable per builtin writer, matching the shape the
//! transport's per-reader filter interface expects (§9 "Filter adapter" —
//! the DDB does not care how the adapter layer is structured beyond
//! exposing the three predicates separately).

use crate::change::ChangePtr;
use crate::db::DiscoveryDatabase;
use crate::guid::Guid;
use std::sync::Arc;

/// Filter bound to the PDP builtin writer.
#[derive(Clone)]
pub struct PdpFilter(Arc<DiscoveryDatabase>);

/// Filter bound to the EDP-publications builtin writer.
#[derive(Clone)]
pub struct EdpPubFilter(Arc<DiscoveryDatabase>);

/// Filter bound to the EDP-subscriptions builtin writer.
#[derive(Clone)]
pub struct EdpSubFilter(Arc<DiscoveryDatabase>);

impl PdpFilter {
    pub fn new(db: Arc<DiscoveryDatabase>) -> Self {
        Self(db)
    }

    pub fn is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        self.0.pdp_is_relevant(change, reader_guid)
    }
}

impl EdpPubFilter {
    pub fn new(db: Arc<DiscoveryDatabase>) -> Self {
        Self(db)
    }

    pub fn is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        self.0.edp_pub_is_relevant(change, reader_guid)
    }
}

impl EdpSubFilter {
    pub fn new(db: Arc<DiscoveryDatabase>) -> Self {
        Self(db)
    }

    pub fn is_relevant(&self, change: &ChangePtr, reader_guid: &Guid) -> bool {
        self.0.edp_sub_is_relevant(change, reader_guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{CacheChange, ChangeKind, ChangeOrigin};
    use crate::config::ServerConfig;
    use crate::guid::GuidPrefix;

    fn prefix(b: u8) -> GuidPrefix {
        let mut p = [0u8; 12];
        p[0] = b;
        GuidPrefix(p)
    }

    #[test]
    fn own_dap_always_relevant_to_pdp_readers() {
        let server = prefix(1);
        let db = Arc::new(DiscoveryDatabase::new(ServerConfig::for_server(server)));
        let filter = PdpFilter::new(db);
        let change = CacheChange::new(
            Guid::participant(server),
            Guid::participant(server),
            ChangeKind::Alive,
            1,
            vec![],
            ChangeOrigin::ThisServer,
        );
        assert!(filter.is_relevant(&change, &Guid::participant(prefix(2))));
    }
}
