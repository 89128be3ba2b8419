// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error kinds produced by the discovery database (§7).
//!
//! None of these propagate as panics across the public boundary: every
//! fallible DDB operation either returns `Result<_, DdbError>` or, where
//! §6's interface table specifies a `bool` return, logs the error kind at
//! the appropriate level and returns `false`/an empty collection.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DdbError {
    /// Operation invoked while the DDB is not enabled.
    #[error("discovery database is disabled")]
    Disabled,

    /// Change classification inconsistent with the operation.
    #[error("change classification does not match queue: {0}")]
    BadKind(String),

    /// Endpoint announcement whose participant is not known.
    #[error("orphan endpoint: no participant record for {0}")]
    OrphanEndpoint(String),

    /// `clear()` called while the DDB is still enabled.
    #[error("clear() called while the database is still enabled")]
    ClearWhileEnabled,

    /// Snapshot/restore failure (ambient persistence addition, SPEC_FULL §6).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}
