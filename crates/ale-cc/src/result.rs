// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Physical operation results.

use serde::{Deserialize, Serialize};

/// Outcome state of a single operation on a single tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultState {
    Success,
    /// Operation failed and nothing was written.
    MiscErrorTotal,
    /// Operation failed after part of the data was written.
    MiscErrorPartial,
    PermissionError,
    PasswordError,
    FieldNotFoundError,
    FieldExistsError,
    OpNotPossibleError,
    OutOfRangeError,
    MemoryOverflowError,
    MemoryCheckError,
    EpcCacheDepletedError,
    PasswordOutOfRangeError,
}

impl ResultState {
    pub fn is_success(self) -> bool {
        self == ResultState::Success
    }
}

/// Result of one low-level operation on one tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationResult {
    Read { state: ResultState, data: Vec<u8> },
    /// Memory image produced by a pending write of the same batch.
    VirtualRead { state: ResultState, data: Vec<u8> },
    Write { state: ResultState, words_written: u16 },
    Kill { state: ResultState },
    Lock { state: ResultState },
    Password { state: ResultState },
    Custom { state: ResultState, data: Vec<u8> },
    Fault { state: ResultState },
}

impl OperationResult {
    pub fn fault(state: ResultState) -> Self {
        Self::Fault { state }
    }

    pub fn state(&self) -> ResultState {
        match self {
            Self::Read { state, .. }
            | Self::VirtualRead { state, .. }
            | Self::Write { state, .. }
            | Self::Kill { state }
            | Self::Lock { state }
            | Self::Password { state }
            | Self::Custom { state, .. }
            | Self::Fault { state } => *state,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    /// Read payload of a successful real or virtual read.
    pub fn read_data(&self) -> Option<&[u8]> {
        match self {
            Self::Read {
                state: ResultState::Success,
                data,
            }
            | Self::VirtualRead {
                state: ResultState::Success,
                data,
            } => Some(data),
            _ => None,
        }
    }

    /// True for real and virtual reads regardless of state.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::VirtualRead { .. })
    }
}
