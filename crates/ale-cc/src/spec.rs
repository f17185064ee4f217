// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declarative command-cycle specification.
//!
//! ```toml
//! name = "commission"
//!
//! [[reports]]
//! name = "write-lot"
//! stats = ["TagCount"]
//!
//! [[reports.operations]]
//! name = "lot"
//! type = "WRITE"
//! field = "@3.urn:oid:1.0.15961.9.1"
//! data = { literal = "LOT-42" }
//! ```

use serde::{Deserialize, Serialize};

/// A named command cycle: the set of reports compiled into one `Reports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSpec {
    pub name: String,

    #[serde(default)]
    pub reports: Vec<ReportSpec>,

    /// Overrides the engine default when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_spec_in_reports: Option<bool>,
}

impl CycleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reports: Vec::new(),
            include_spec_in_reports: None,
        }
    }

    pub fn report(mut self, report: ReportSpec) -> Self {
        self.reports.push(report);
        self
    }

    /// Parse from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// One report: a filter, an ordered operation list and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSpec {
    pub name: String,

    #[serde(default)]
    pub filter: FilterSpec,

    #[serde(default)]
    pub operations: Vec<OperationSpec>,

    /// Statistics profile names.
    #[serde(default)]
    pub stats: Vec<String>,

    #[serde(default)]
    pub report_if_empty: bool,
}

impl ReportSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: FilterSpec::default(),
            operations: Vec::new(),
            stats: Vec::new(),
            report_if_empty: false,
        }
    }

    pub fn operation(mut self, operation: OperationSpec) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn filter(mut self, pattern: FilterPatternSpec) -> Self {
        self.filter.patterns.push(pattern);
        self
    }

    pub fn stat(mut self, profile: impl Into<String>) -> Self {
        self.stats.push(profile.into());
        self
    }

    pub fn report_if_empty(mut self, enabled: bool) -> Self {
        self.report_if_empty = enabled;
        self
    }
}

/// One operation as declared by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Operation kind, e.g. `READ`, `WRITE`, `LOCK`.
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSpec>,
}

impl OperationSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: kind.into(),
            field: None,
            data: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn data(mut self, data: DataSpec) -> Self {
        self.data = Some(data);
        self
    }
}

/// Source of an operation's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSpec {
    /// Literal text, interpreted by the target field's datatype and format.
    Literal(String),
    /// Value bound through the cycle parameters.
    Parameter(String),
    /// Next value of a named EPC cache.
    Cache(String),
    /// Fresh value of a named random source.
    Random(String),
    /// Raw hex payload with an explicit bit length.
    Bytes { data: String, length: u16 },
}

impl DataSpec {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }
}

/// Tag filter of a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub patterns: Vec<FilterPatternSpec>,
}

/// Include/exclude mode of a filter pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

/// Glob over the hex value of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterPatternSpec {
    #[serde(default)]
    pub mode: FilterMode,

    /// Field to match; the tag's EPC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub pattern: String,
}

impl FilterPatternSpec {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            mode: FilterMode::Include,
            field: None,
            pattern: pattern.into(),
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            mode: FilterMode::Exclude,
            field: None,
            pattern: pattern.into(),
        }
    }

    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
