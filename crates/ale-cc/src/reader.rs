// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Low-level reader operations and the reader connector seam.

use crate::error::ReaderError;
use crate::tag::Tag;
use serde::{Deserialize, Serialize};

/// Reserved memory bank (kill and access passwords).
pub const BANK_RESERVED: u8 = 0;
/// EPC memory bank (CRC, PC, EPC).
pub const BANK_EPC: u8 = 1;
/// TID memory bank.
pub const BANK_TID: u8 = 2;
/// User memory bank.
pub const BANK_USER: u8 = 3;

/// Width of kill and access passwords in bits.
pub const PASSWORD_BITS: u16 = 32;

/// Bit window inside one memory bank.
///
/// A `length` of zero means "from `offset` to the end of the bank".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub bank: u8,
    pub offset: u16,
    pub length: u16,
}

impl Field {
    pub const fn new(bank: u8, offset: u16, length: u16) -> Self {
        Self {
            bank,
            offset,
            length,
        }
    }

    /// Whole-bank window.
    pub const fn bank(bank: u8) -> Self {
        Self::new(bank, 0, 0)
    }

    /// End offset in bits, `None` for open-ended windows.
    pub fn end(&self) -> Option<u16> {
        (self.length != 0).then(|| self.offset + self.length)
    }
}

/// Operation handed to a reader connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderOperation {
    pub id: u16,
    pub kind: ReaderOperationKind,
}

/// Kind-specific payload of a reader operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReaderOperationKind {
    Read { field: Field },
    /// Word-aligned write; `data` covers `field.length` bits.
    Write { field: Field, data: Vec<u8> },
    Kill { password: u32 },
    /// `privilege` is the lock type ordinal.
    Lock { field: Field, privilege: u8 },
    Password { password: u32 },
    Custom { data: Vec<u8>, length: u16 },
}

impl ReaderOperation {
    pub fn read(id: u16, field: Field) -> Self {
        Self {
            id,
            kind: ReaderOperationKind::Read { field },
        }
    }

    pub fn write(id: u16, field: Field, data: Vec<u8>) -> Self {
        Self {
            id,
            kind: ReaderOperationKind::Write { field, data },
        }
    }
}

/// Physical reader seam.
///
/// One call runs one inventory round: the connector executes `operations`
/// on every tag in the field, storing a result per operation id, then hands
/// each tag to `inspect`. The operations `inspect` returns are executed on
/// that tag and their results stored as well. All observed tags are returned
/// with their accumulated results.
pub trait ReaderConnector {
    fn name(&self) -> &str;

    fn inventory(
        &mut self,
        operations: &[ReaderOperation],
        inspect: &mut dyn FnMut(&mut Tag) -> Vec<ReaderOperation>,
    ) -> Result<Vec<Tag>, ReaderError>;
}
