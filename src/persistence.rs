// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Snapshot/restore (C12, SPEC_FULL.md §6): `to_json`/`from_json` over the
//! DDB's public state, and a companion inbound-queue replay file. The wire
//! format is explicitly not part of the specification; this one follows
//! the teacher's `GuidPrefixWire`/`EntityIdWire` hex-encoding convention.

use crate::ack::{AckMap, AckStatus};
use crate::change::{CacheChange, ChangeKind, ChangeOrigin, ChangePtr, SampleIdentity};
use crate::config::ServerConfig;
use crate::db::{DdbState, DiscoveryDatabase, EdpQueueItem, PdpQueueItem};
use crate::error::DdbError;
use crate::guid::Guid;
use crate::participant::{ParticipantChangeData, ParticipantRecord};
use base64::Engine;
use serde_json::{Map, Value, json};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;

const B64: base64::engine::general_purpose::GeneralPurpose = base64::engine::general_purpose::STANDARD;

fn change_to_json(change: &ChangePtr) -> Value {
    json!({
        "writer_guid": change.writer_guid.to_string(),
        "instance_handle": change.instance_handle.to_string(),
        "kind": match change.kind { ChangeKind::Alive => "alive", ChangeKind::Disposed => "disposed" },
        "sequence_number": change.sample_identity.sequence_number,
        "payload": B64.encode(&change.serialized_payload),
        "origin": match change.origin { ChangeOrigin::ThisServer => "this_server", ChangeOrigin::Remote => "remote" },
    })
}

fn change_from_json(v: &Value) -> Result<ChangePtr, DdbError> {
    let err = |msg: &str| DdbError::Persistence(msg.to_string());
    let writer_guid = Guid::from_str(v["writer_guid"].as_str().ok_or_else(|| err("missing writer_guid"))?)
        .map_err(|e| DdbError::Persistence(e))?;
    let instance_handle =
        Guid::from_str(v["instance_handle"].as_str().ok_or_else(|| err("missing instance_handle"))?)
            .map_err(|e| DdbError::Persistence(e))?;
    let kind = match v["kind"].as_str() {
        Some("alive") => ChangeKind::Alive,
        Some("disposed") => ChangeKind::Disposed,
        _ => return Err(err("invalid kind")),
    };
    let sequence_number = v["sequence_number"].as_i64().ok_or_else(|| err("missing sequence_number"))?;
    let payload = B64
        .decode(v["payload"].as_str().ok_or_else(|| err("missing payload"))?)
        .map_err(|e| DdbError::Persistence(e.to_string()))?;
    let origin = match v["origin"].as_str() {
        Some("this_server") => ChangeOrigin::ThisServer,
        Some("remote") => ChangeOrigin::Remote,
        _ => return Err(err("invalid origin")),
    };
    Ok(std::sync::Arc::new(CacheChange {
        writer_guid,
        instance_handle,
        kind,
        sample_identity: SampleIdentity { writer_guid, sequence_number },
        serialized_payload: payload,
        origin,
    }))
}

fn ack_map_to_json(map: &AckMap) -> Value {
    let mut obj = Map::new();
    for (prefix, status) in map.iter() {
        let s = match status {
            AckStatus::RelevantUnacked => "unacked",
            AckStatus::RelevantAcked => "acked",
            AckStatus::Irrelevant => "irrelevant",
        };
        obj.insert(prefix.to_string(), Value::String(s.to_string()));
    }
    Value::Object(obj)
}

fn ack_map_from_json(v: &Value) -> Result<AckMap, DdbError> {
    let mut map = AckMap::new();
    let Some(obj) = v.as_object() else {
        return Ok(map);
    };
    for (prefix_hex, status) in obj {
        let prefix = crate::guid::GuidPrefix::from_str(prefix_hex)
            .map_err(|e| DdbError::Persistence(e))?;
        let status = match status.as_str() {
            Some("unacked") => AckStatus::RelevantUnacked,
            Some("acked") => AckStatus::RelevantAcked,
            Some("irrelevant") => AckStatus::Irrelevant,
            _ => return Err(DdbError::Persistence("invalid ack status".into())),
        };
        map.set(prefix, status);
    }
    Ok(map)
}

fn participant_change_data_to_json(data: &ParticipantChangeData) -> Value {
    json!({
        "metatraffic_locators": data.metatraffic_locators.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "is_client": data.is_client,
        "is_my_client": data.is_my_client,
        "is_my_server": data.is_my_server,
    })
}

fn participant_change_data_from_json(v: &Value) -> ParticipantChangeData {
    let metatraffic_locators = v["metatraffic_locators"]
        .as_array()
        .map(|a| a.iter().filter_map(|s| s.as_str()?.parse().ok()).collect())
        .unwrap_or_default();
    ParticipantChangeData {
        metatraffic_locators,
        is_client: v["is_client"].as_bool().unwrap_or(false),
        is_my_client: v["is_my_client"].as_bool().unwrap_or(false),
        is_my_server: v["is_my_server"].as_bool().unwrap_or(false),
    }
}

impl DiscoveryDatabase {
    /// §6 persistence format: a JSON document with `participants`,
    /// `writers`, `readers` sections, GUIDs as hex strings, payloads
    /// base64-encoded.
    pub fn to_json(&self) -> Value {
        let guard = self.state.lock();
        let state = guard.borrow();

        let mut participants = Map::new();
        for (prefix, p) in &state.participants {
            participants.insert(
                prefix.to_string(),
                json!({
                    "change": change_to_json(&p.change),
                    "ack_map": ack_map_to_json(&p.ack_map),
                    "is_client": p.is_client,
                    "is_my_client": p.is_my_client,
                    "is_my_server": p.is_my_server,
                    "is_local_server": p.is_local_server,
                    "metatraffic_locators": p.metatraffic_locators.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                }),
            );
        }

        let mut writers = Map::new();
        for (guid, w) in &state.writers {
            writers.insert(
                guid.to_string(),
                json!({
                    "change": change_to_json(&w.change),
                    "ack_map": ack_map_to_json(&w.ack_map),
                    "topic": w.topic,
                    "is_virtual": w.is_virtual,
                }),
            );
        }

        let mut readers = Map::new();
        for (guid, r) in &state.readers {
            readers.insert(
                guid.to_string(),
                json!({
                    "change": change_to_json(&r.change),
                    "ack_map": ack_map_to_json(&r.ack_map),
                    "topic": r.topic,
                    "is_virtual": r.is_virtual,
                }),
            );
        }

        json!({
            "participants": participants,
            "writers": writers,
            "readers": readers,
        })
    }

    /// Restore a DDB from a `to_json` snapshot, recomputing the derived
    /// topic maps rather than persisting them redundantly.
    pub fn from_json(value: &Value, config: ServerConfig) -> Result<Self, DdbError> {
        let err = |msg: &str| DdbError::Persistence(msg.to_string());

        let mut state = DdbState::new();

        for (prefix_hex, v) in value["participants"].as_object().ok_or_else(|| err("missing participants"))? {
            let prefix = crate::guid::GuidPrefix::from_str(prefix_hex).map_err(|e| DdbError::Persistence(e))?;
            let change = change_from_json(&v["change"])?;
            let data = ParticipantChangeData {
                metatraffic_locators: Vec::new(),
                is_client: v["is_client"].as_bool().unwrap_or(false),
                is_my_client: v["is_my_client"].as_bool().unwrap_or(false),
                is_my_server: v["is_my_server"].as_bool().unwrap_or(false),
            };
            let mut record = ParticipantRecord::new(prefix, change, &data, v["is_local_server"].as_bool().unwrap_or(false));
            record.ack_map = ack_map_from_json(&v["ack_map"])?;
            state.participants.insert(prefix, record);
        }

        for (guid_str, v) in value["writers"].as_object().ok_or_else(|| err("missing writers"))? {
            let guid = Guid::from_str(guid_str).map_err(|e| DdbError::Persistence(e))?;
            let change = change_from_json(&v["change"])?;
            let topic = v["topic"].as_str().unwrap_or_default().to_string();
            let is_virtual = v["is_virtual"].as_bool().unwrap_or(false);
            let mut record = crate::endpoint::EndpointRecord::new(change, topic.clone(), is_virtual);
            record.ack_map = ack_map_from_json(&v["ack_map"])?;
            if let Some(p) = state.participants.get_mut(&guid.prefix) {
                p.writers.insert(guid);
            }
            state.writers_by_topic.entry(topic).or_insert_with(BTreeSet::new).insert(guid);
            state.writers.insert(guid, record);
        }

        for (guid_str, v) in value["readers"].as_object().ok_or_else(|| err("missing readers"))? {
            let guid = Guid::from_str(guid_str).map_err(|e| DdbError::Persistence(e))?;
            let change = change_from_json(&v["change"])?;
            let topic = v["topic"].as_str().unwrap_or_default().to_string();
            let is_virtual = v["is_virtual"].as_bool().unwrap_or(false);
            let mut record = crate::endpoint::EndpointRecord::new(change, topic.clone(), is_virtual);
            record.ack_map = ack_map_from_json(&v["ack_map"])?;
            if let Some(p) = state.participants.get_mut(&guid.prefix) {
                p.readers.insert(guid);
            }
            state.readers_by_topic.entry(topic).or_insert_with(BTreeSet::new).insert(guid);
            state.readers.insert(guid, record);
        }

        // Every (writer, reader) pair across every topic is re-marked dirty
        // so the next routine iteration re-derives ack-map edges instead of
        // trusting a persisted dirty set that may be stale.
        for topic in state.writers_by_topic.keys().chain(state.readers_by_topic.keys()) {
            state.dirty_topics.insert(topic.clone());
        }

        Ok(Self {
            config,
            enabled: AtomicBool::new(false),
            state: parking_lot::ReentrantMutex::new(RefCell::new(state)),
            pdp_queue: crate::queue::DoubleBufferedQueue::new(),
            edp_queue: crate::queue::DoubleBufferedQueue::new(),
        })
    }

    pub fn snapshot_to_file(&self, path: &Path) -> Result<(), DdbError> {
        let value = self.to_json();
        let content = serde_json::to_string_pretty(&value).map_err(|e| DdbError::Persistence(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| DdbError::Persistence(e.to_string()))
    }

    pub fn restore_from_file(path: &Path, config: ServerConfig) -> Result<Self, DdbError> {
        let content = std::fs::read_to_string(path).map_err(|e| DdbError::Persistence(e.to_string()))?;
        let value: Value = serde_json::from_str(&content).map_err(|e| DdbError::Persistence(e.to_string()))?;
        Self::from_json(&value, config)
    }

    /// SPEC_FULL.md §6 "inbound_queue_snapshot": a second file capturing
    /// any PDP/EDP items still sitting in the inbound queues, un-drained,
    /// at snapshot time. Taken non-destructively, so a running server can
    /// keep accepting updates while this is written.
    pub fn queue_snapshot_to_json(&self) -> Value {
        let pdp: Vec<Value> = self
            .pdp_queue
            .peek_all()
            .iter()
            .map(|item| {
                json!({
                    "change": change_to_json(&item.change),
                    "change_data": participant_change_data_to_json(&item.change_data),
                })
            })
            .collect();
        let edp: Vec<Value> = self
            .edp_queue
            .peek_all()
            .iter()
            .map(|item| {
                json!({
                    "change": change_to_json(&item.change),
                    "topic_name": item.topic_name,
                })
            })
            .collect();
        json!({ "pdp": pdp, "edp": edp })
    }

    pub fn snapshot_queue_to_file(&self, path: &Path) -> Result<(), DdbError> {
        let value = self.queue_snapshot_to_json();
        let content = serde_json::to_string_pretty(&value).map_err(|e| DdbError::Persistence(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| DdbError::Persistence(e.to_string()))
    }

    /// Replay a queue-snapshot file onto this (presumably freshly
    /// restored) database's inbound queues, re-queuing items exactly as
    /// the listener glue would have, so the next routine iteration
    /// processes them in the same order they were snapshotted.
    pub fn restore_queue_from_file(&self, path: &Path) -> Result<(), DdbError> {
        let content = std::fs::read_to_string(path).map_err(|e| DdbError::Persistence(e.to_string()))?;
        let value: Value = serde_json::from_str(&content).map_err(|e| DdbError::Persistence(e.to_string()))?;
        let err = || DdbError::Persistence("malformed inbound queue snapshot".to_string());

        let mut pdp_items = Vec::new();
        for v in value["pdp"].as_array().ok_or_else(err)? {
            pdp_items.push(PdpQueueItem {
                change: change_from_json(&v["change"])?,
                change_data: participant_change_data_from_json(&v["change_data"]),
            });
        }
        self.pdp_queue.extend_back(pdp_items);

        let mut edp_items = Vec::new();
        for v in value["edp"].as_array().ok_or_else(err)? {
            edp_items.push(EdpQueueItem {
                change: change_from_json(&v["change"])?,
                topic_name: v["topic_name"].as_str().unwrap_or_default().to_string(),
            });
        }
        self.edp_queue.extend_back(edp_items);

        Ok(())
    }
}
