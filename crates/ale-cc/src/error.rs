// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types.
//!
//! Compile-time problems with a cycle specification surface as
//! [`ValidationError`]. Per-tag run-time faults are never errors: they are
//! recorded as [`crate::result::OperationResult::Fault`] on the tag.

use thiserror::Error;

/// Crate result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Validation failure raised while compiling a cycle specification.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown operation type '{0}'")]
    UnknownOperation(String),

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Field '{0}' is already defined")]
    FieldDefined(String),

    #[error("Field '{0}' is in use")]
    FieldInUse(String),

    #[error("Field '{0}' extends past the addressable memory")]
    FieldOutOfRange(String),

    #[error("Too many operations, ids exhausted after {0}")]
    IdsExhausted(u16),

    #[error("Field must be specified for operation type {0}")]
    FieldRequired(&'static str),

    #[error("Field must not be specified for operation type {0}")]
    FieldForbidden(&'static str),

    #[error("Data must be specified for operation type {0}")]
    DataRequired(&'static str),

    #[error("Data must not be specified for operation type {0}")]
    DataForbidden(&'static str),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Parameter '{0}' is not bound")]
    UnboundParameter(String),

    #[error("Unknown cache '{0}'")]
    UnknownCache(String),

    #[error("Unknown random source '{0}'")]
    UnknownRandom(String),

    #[error("Unknown statistics profile '{0}'")]
    UnknownStatProfile(String),

    #[error("Duplicate name '{0}'")]
    DuplicateName(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Operation '{name}': {source}")]
    Operation {
        name: String,
        source: Box<ValidationError>,
    },

    #[error("Report '{name}': {source}")]
    Report {
        name: String,
        source: Box<ValidationError>,
    },

    #[error("Cycle '{name}': {source}")]
    Cycle {
        name: String,
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Prefix with the owning operation's name.
    pub fn in_operation(self, name: impl Into<String>) -> Self {
        Self::Operation {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Prefix with the owning report's name.
    pub fn in_report(self, name: impl Into<String>) -> Self {
        Self::Report {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Prefix with the owning cycle's name.
    pub fn in_cycle(self, name: impl Into<String>) -> Self {
        Self::Cycle {
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Innermost cause of a context chain.
    pub fn root(&self) -> &ValidationError {
        match self {
            Self::Operation { source, .. }
            | Self::Report { source, .. }
            | Self::Cycle { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Item-data codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed item data at byte {0}")]
    Malformed(usize),

    #[error("Item data entry '{0}' exceeds the encodable size")]
    EntryTooLarge(String),

    #[error("Bank {0} does not hold item data")]
    UnsupportedBank(u8),
}

/// Reader connector failures.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Reader '{0}' is not connected")]
    NotConnected(String),

    #[error("Reader '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Umbrella error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Reports '{0}' already disposed")]
    Disposed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_message() {
        let err = ValidationError::DataForbidden("READ")
            .in_operation("op1")
            .in_report("r1")
            .in_cycle("cc");
        assert_eq!(
            err.to_string(),
            "Cycle 'cc': Report 'r1': Operation 'op1': Data must not be specified for operation type READ"
        );
        assert!(matches!(err.root(), ValidationError::DataForbidden("READ")));
    }
}
