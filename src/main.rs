// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery database demo binary.
//!
//! Wires a `DiscoveryDatabase` to an in-memory `StubTransport`, runs the
//! server routine and ping routine as background tasks, and feeds a
//! handful of synthetic PDP/EDP announcements through the `InboundListener`
//! so the whole update loop (§4.6/§4.7) can be observed end to end. Real
//! wire I/O, ACKNACK processing, and payload deserialization are out of
//! scope (§1) — see `StubTransport` for the stand-ins.
//!
//! ```bash
//! rtps-discovery-db --config server.json
//! rtps-discovery-db --snapshot state.json
//! ```

use clap::Parser;
use rtps_discovery_db::change::{CacheChange, ChangeKind, ChangeOrigin};
use rtps_discovery_db::config::ServerConfig;
use rtps_discovery_db::db::DiscoveryDatabase;
use rtps_discovery_db::guid::{Guid, GuidPrefix};
use rtps_discovery_db::listener::InboundListener;
use rtps_discovery_db::participant::ParticipantChangeData;
use rtps_discovery_db::routine::ServerRoutine;
use rtps_discovery_db::transport::StubTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Discovery database demo server.
#[derive(Parser, Debug)]
#[command(name = "rtps-discovery-db")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format); a default single-server config is
    /// used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot this server's own GuidPrefix byte (demo convenience, since
    /// there is no real GUID allocator in this binary).
    #[arg(long, default_value = "1")]
    server_id: u8,

    /// Restore the DDB state from a snapshot file on startup instead of
    /// starting empty (§6).
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Write a snapshot of the DDB state to this file on shutdown (§6).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn guid_prefix(byte: u8) -> GuidPrefix {
    let mut prefix = [0u8; 12];
    prefix[0] = byte;
    GuidPrefix(prefix)
}

/// Feed one synthetic remote participant announcement through the
/// listener, as a stand-in for the wire-received CacheChange a real
/// transport would hand it (§1 "Out of scope": payload deserialization).
fn announce_participant(listener: &InboundListener, peer: GuidPrefix, seq: i64, kind: ChangeKind) {
    let guid = Guid::participant(peer);
    let change = CacheChange::new(guid, guid, kind, seq, Vec::new(), ChangeOrigin::Remote);
    listener.on_pdp_change(change, ParticipantChangeData::default());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(path) = &args.config {
        info!(?path, "loading config");
        ServerConfig::from_file(path)?
    } else {
        ServerConfig::for_server(guid_prefix(args.server_id))
    };
    config.validate()?;

    let db = Arc::new(if let Some(path) = &args.restore {
        info!(?path, "restoring discovery database from snapshot");
        let restored = DiscoveryDatabase::restore_from_file(path, config)?;
        let queue_path = path.with_extension("queue.json");
        if queue_path.exists() {
            info!(?queue_path, "replaying un-drained inbound queue items");
            restored.restore_queue_from_file(&queue_path)?;
        }
        restored
    } else {
        DiscoveryDatabase::new(config)
    });
    db.enable();

    info!(guid_prefix = %db.server_guid_prefix(), "discovery database starting");

    let transport = Arc::new(StubTransport::new());
    let routine = ServerRoutine::new(
        db.clone(),
        transport.clone(),
        transport.clone(),
        transport.clone(),
    );
    let listener = InboundListener::new(db.clone(), routine.clone(), transport.clone(), transport);

    let shutdown = Arc::new(Notify::new());

    let routine_task = tokio::spawn({
        let routine = routine.clone();
        let shutdown = shutdown.clone();
        async move { routine.run(shutdown).await }
    });
    let ping_task = tokio::spawn({
        let routine = routine.clone();
        let shutdown = shutdown.clone();
        async move { routine.run_ping(shutdown).await }
    });

    // A minimal synthetic workload so the demo produces visible activity
    // without a real transport: one remote participant announces itself,
    // then disposes.
    announce_participant(&listener, guid_prefix(2), 1, ChangeKind::Alive);
    tokio::time::sleep(db.server_config().routine_period()).await;
    announce_participant(&listener, guid_prefix(2), 2, ChangeKind::Disposed);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            shutdown.notify_waiters();
        }
    });

    let _ = tokio::join!(routine_task, ping_task);

    db.disable();
    if let Some(path) = &args.snapshot {
        info!(?path, "writing shutdown snapshot");
        db.snapshot_to_file(path)?;
        let queue_path = path.with_extension("queue.json");
        db.snapshot_queue_to_file(&queue_path)?;
    }
    let _ = db.clear()?;

    info!("discovery database stopped");
    Ok(())
}
