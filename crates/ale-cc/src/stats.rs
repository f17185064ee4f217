// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-tag statistics profiles.

use crate::error::ValidationError;
use crate::report::envelope::{SightingSignal, StatRecord};
use crate::tag::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatProfile {
    /// First and last sighting.
    TagTimestamps,
    /// Number of sightings.
    TagCount,
    /// Distinct readers, in first-sighting order.
    ReaderNames,
    /// Reader, antenna, RSSI and time of every sighting.
    ReaderSightingSignals,
}

impl StatProfile {
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        match name {
            "TagTimestamps" => Ok(Self::TagTimestamps),
            "TagCount" => Ok(Self::TagCount),
            "ReaderNames" => Ok(Self::ReaderNames),
            "ReaderSightingSignals" => Ok(Self::ReaderSightingSignals),
            other => Err(ValidationError::UnknownStatProfile(other.to_string())),
        }
    }

    pub fn stat(&self, tag: &Tag) -> StatRecord {
        match self {
            Self::TagTimestamps => {
                let first = tag
                    .sightings
                    .iter()
                    .map(|s| s.timestamp)
                    .min()
                    .unwrap_or(tag.first_seen);
                let last = tag
                    .sightings
                    .iter()
                    .map(|s| s.timestamp)
                    .max()
                    .unwrap_or(tag.first_seen);
                StatRecord::TagTimestamps {
                    first_sighting: first,
                    last_sighting: last,
                }
            }
            Self::TagCount => StatRecord::TagCount {
                count: tag.sightings.len(),
            },
            Self::ReaderNames => {
                let mut readers: Vec<String> = Vec::new();
                for sighting in &tag.sightings {
                    if !readers.contains(&sighting.reader) {
                        readers.push(sighting.reader.clone());
                    }
                }
                StatRecord::ReaderNames { readers }
            }
            Self::ReaderSightingSignals => StatRecord::ReaderSightingSignals {
                sightings: tag
                    .sightings
                    .iter()
                    .map(|s| SightingSignal {
                        reader: s.reader.clone(),
                        antenna: s.antenna,
                        rssi: s.rssi,
                        timestamp: s.timestamp,
                    })
                    .collect(),
            },
        }
    }
}
