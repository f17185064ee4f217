// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report envelope delivered to subscribers.

use crate::result::ResultState;
use crate::spec::CycleSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One cycle's report set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub schema_version: String,
    pub creation_date: DateTime<Utc>,
    pub spec_name: String,
    /// Start of the cycle.
    pub date: DateTime<Utc>,
    pub ale_id: String,
    pub total_milliseconds: u64,
    pub initiation_condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiation_trigger: Option<String>,
    pub termination_condition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<CycleSpec>,
    /// `None` on the undefine boundary.
    pub reports: Option<Vec<CommandReport>>,
}

impl CycleReport {
    /// True when no report carries content.
    pub fn is_empty(&self) -> bool {
        self.reports.as_ref().map_or(true, |r| r.is_empty())
    }
}

/// Result of one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReport {
    pub name: String,
    pub tags: Vec<TagReport>,
}

/// One tag within a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagReport {
    pub id: String,
    pub operations: Vec<OperationReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stats: Vec<StatRecord>,
}

/// One operation's outcome on one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub name: String,
    pub status: ResultState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// One statistics record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "profile")]
pub enum StatRecord {
    TagTimestamps {
        first_sighting: DateTime<Utc>,
        last_sighting: DateTime<Utc>,
    },
    TagCount {
        count: usize,
    },
    ReaderNames {
        readers: Vec<String>,
    },
    ReaderSightingSignals {
        sightings: Vec<SightingSignal>,
    },
}

/// Signal data of one sighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SightingSignal {
    pub reader: String,
    pub antenna: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    pub timestamp: DateTime<Utc>,
}
