// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observed tags and the state they accumulate during a cycle.

use crate::bits::to_hex;
use crate::iso::ItemData;
use crate::result::OperationResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tag identity: primary key (EPC or raw) plus optional TID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagKey {
    pub epc: Vec<u8>,
    pub tid: Option<Vec<u8>>,
}

impl TagKey {
    pub fn new(epc: Vec<u8>) -> Self {
        Self { epc, tid: None }
    }

    pub fn with_tid(mut self, tid: Vec<u8>) -> Self {
        self.tid = Some(tid);
        self
    }
}

/// One sighting of a tag by an antenna.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub reader: String,
    pub antenna: u16,
    pub rssi: Option<i16>,
    pub timestamp: DateTime<Utc>,
}

impl Sighting {
    pub fn new(reader: impl Into<String>, antenna: u16) -> Self {
        Self {
            reader: reader.into(),
            antenna,
            rssi: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// A tag observed during a cycle.
///
/// `results` maps operation ids to their result. A `None` value means the
/// operation was dispatched but has not resolved yet.
#[derive(Debug, Clone)]
pub struct Tag {
    key: TagKey,
    /// Per-operation results keyed by operation id.
    pub results: BTreeMap<u16, Option<OperationResult>>,
    /// First sighting in this cycle.
    pub first_seen: DateTime<Utc>,
    /// Set once the reader connector finished all operations on this tag.
    pub completed: bool,
    /// Sightings contributing to statistics.
    pub sightings: Vec<Sighting>,
    /// Lazily decoded item data, per memory bank.
    pub(crate) item_data: HashMap<u8, ItemData>,
}

impl Tag {
    pub fn new(key: TagKey) -> Self {
        Self {
            key,
            results: BTreeMap::new(),
            first_seen: Utc::now(),
            completed: false,
            sightings: Vec::new(),
            item_data: HashMap::new(),
        }
    }

    pub fn key(&self) -> &TagKey {
        &self.key
    }

    pub fn epc(&self) -> &[u8] {
        &self.key.epc
    }

    pub fn tid(&self) -> Option<&[u8]> {
        self.key.tid.as_deref()
    }

    /// Identity string used in reports.
    pub fn id_string(&self) -> String {
        to_hex(&self.key.epc)
    }

    /// Resolved result of an operation, if any.
    pub fn result(&self, id: u16) -> Option<&OperationResult> {
        self.results.get(&id).and_then(|r| r.as_ref())
    }

    pub fn set_result(&mut self, id: u16, result: OperationResult) {
        self.results.insert(id, Some(result));
    }

    /// Mark an operation as dispatched but unresolved.
    pub fn set_pending(&mut self, id: u16) {
        self.results.insert(id, None);
    }

    /// True when some dispatched operation has not resolved.
    pub fn has_pending(&self) -> bool {
        self.results.values().any(|r| r.is_none())
    }

    pub fn record_sighting(&mut self, sighting: Sighting) {
        self.sightings.push(sighting);
    }

    pub(crate) fn cached_item_data(&self, bank: u8) -> Option<&ItemData> {
        self.item_data.get(&bank)
    }

    pub(crate) fn cache_item_data(&mut self, bank: u8, data: ItemData) {
        self.item_data.insert(bank, data);
    }

    pub(crate) fn clear_item_data(&mut self, bank: u8) {
        self.item_data.remove(&bank);
    }
}
