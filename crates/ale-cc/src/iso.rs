// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ISO 15962 item data.
//!
//! The compaction and encoding rules are hidden behind [`ItemCodec`].
//! [`CompactCodec`] is a minimal implementation: DSFID byte, then
//! length-prefixed `(oid, value)` pairs, then a zero terminator.
//!
//! ```text
//! +-------+---------+-----+---------+-------+-----+------+
//! | DSFID | oid len | oid | val len | value | ... | 0x00 |
//! +-------+---------+-----+---------+-------+-----+------+
//! ```
//!
//! In the EPC bank the payload starts after CRC and PC and the AFI sits in
//! the low byte of the PC word (toggle bit set).

use crate::error::CodecError;
use crate::reader::{BANK_EPC, BANK_USER};
use serde::{Deserialize, Serialize};

/// PC word toggle bit (in PC byte 0).
pub const PC_TOGGLE: u8 = 0x01;
/// PC word UMI and XI bits (in PC byte 0).
pub const PC_CONTROL: u8 = 0x06;
/// Largest EPC length expressible in the PC word, in words.
pub const PC_MAX_WORDS: usize = 31;

/// One logical data element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemEntry {
    pub oid: String,
    pub value: String,
}

impl ItemEntry {
    pub fn new(oid: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            value: value.into(),
        }
    }
}

/// Decoded item data of one bank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemData {
    pub dsfid: u8,
    pub entries: Vec<ItemEntry>,
}

impl ItemData {
    pub fn new(dsfid: u8) -> Self {
        Self {
            dsfid,
            entries: Vec::new(),
        }
    }

    /// True when some OID occurs more than once.
    pub fn has_duplicates(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.entries.iter().any(|e| !seen.insert(e.oid.as_str()))
    }
}

/// Item data codec.
pub trait ItemCodec: Send + Sync {
    /// Decode the item-data payload of `bank` (EPC bank: bytes after PC).
    fn decode(&self, bank: u8, payload: &[u8]) -> Result<ItemData, CodecError>;

    /// Encode item data into a payload for `bank`.
    fn encode(&self, bank: u8, data: &ItemData) -> Result<Vec<u8>, CodecError>;
}

/// Length-prefixed codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCodec;

impl CompactCodec {
    fn check_bank(bank: u8) -> Result<(), CodecError> {
        if bank == BANK_EPC || bank == BANK_USER {
            Ok(())
        } else {
            Err(CodecError::UnsupportedBank(bank))
        }
    }
}

impl ItemCodec for CompactCodec {
    fn decode(&self, bank: u8, payload: &[u8]) -> Result<ItemData, CodecError> {
        Self::check_bank(bank)?;
        let Some((&dsfid, mut rest)) = payload.split_first() else {
            return Ok(ItemData::default());
        };
        let mut data = ItemData::new(dsfid);
        if dsfid == 0 {
            return Ok(data);
        }
        let mut position = 1;
        loop {
            let Some((&oid_len, tail)) = rest.split_first() else {
                break;
            };
            if oid_len == 0 {
                break;
            }
            let oid_len = usize::from(oid_len);
            let oid = tail.get(..oid_len).ok_or(CodecError::Malformed(position))?;
            let tail = &tail[oid_len..];
            let (&value_len, tail) = tail
                .split_first()
                .ok_or(CodecError::Malformed(position + 1 + oid_len))?;
            let value_len = usize::from(value_len);
            let value = tail
                .get(..value_len)
                .ok_or(CodecError::Malformed(position + 2 + oid_len))?;
            let oid = std::str::from_utf8(oid).map_err(|_| CodecError::Malformed(position + 1))?;
            let value = std::str::from_utf8(value)
                .map_err(|_| CodecError::Malformed(position + 2 + oid_len))?;
            data.entries.push(ItemEntry::new(oid, value));
            rest = &tail[value_len..];
            position += 2 + oid_len + value_len;
        }
        Ok(data)
    }

    fn encode(&self, bank: u8, data: &ItemData) -> Result<Vec<u8>, CodecError> {
        Self::check_bank(bank)?;
        let mut out = vec![data.dsfid];
        for entry in &data.entries {
            let oid = entry.oid.as_bytes();
            let value = entry.value.as_bytes();
            if oid.is_empty() || oid.len() > 255 || value.len() > 255 {
                return Err(CodecError::EntryTooLarge(entry.oid.clone()));
            }
            out.push(oid.len() as u8);
            out.extend_from_slice(oid);
            out.push(value.len() as u8);
            out.extend_from_slice(value);
        }
        out.push(0);
        Ok(out)
    }
}

/// View over a raw EPC bank read (CRC, PC, payload).
#[derive(Debug, Clone, Copy)]
pub struct EpcBank<'a> {
    data: &'a [u8],
}

impl<'a> EpcBank<'a> {
    /// Wrap a read starting at bank offset 0; needs at least CRC and PC.
    pub fn new(data: &'a [u8]) -> Option<Self> {
        (data.len() >= 4).then_some(Self { data })
    }

    pub fn pc(&self) -> [u8; 2] {
        [self.data[2], self.data[3]]
    }

    /// EPC length from the PC word, in words.
    pub fn length_words(&self) -> usize {
        usize::from(self.data[2] >> 3)
    }

    pub fn toggle(&self) -> bool {
        self.data[2] & PC_TOGGLE != 0
    }

    /// AFI, meaningful when the toggle bit is set.
    pub fn afi(&self) -> u8 {
        self.data[3]
    }

    /// Bytes after the PC word, bounded by the PC length.
    pub fn payload(&self) -> &'a [u8] {
        let end = (4 + self.length_words() * 2).min(self.data.len());
        &self.data[4..end]
    }

    /// Everything after the PC word, regardless of the PC length.
    pub fn tail(&self) -> &'a [u8] {
        &self.data[4..]
    }
}

/// Item-data payload of a whole-bank read.
pub fn bank_payload(bank: u8, data: &[u8]) -> Option<&[u8]> {
    match bank {
        BANK_EPC => EpcBank::new(data).map(|epc| epc.payload()),
        BANK_USER => Some(data),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ItemData {
        ItemData {
            dsfid: 0x03,
            entries: vec![
                ItemEntry::new("1.0.15961.9.1", "ABC-42"),
                ItemEntry::new("1.0.15961.9.7", "DE"),
            ],
        }
    }

    #[test]
    fn test_roundtrip_user_bank() {
        let codec = CompactCodec;
        let encoded = codec.encode(BANK_USER, &sample()).unwrap();
        assert_eq!(encoded[0], 0x03);
        assert_eq!(*encoded.last().unwrap(), 0);
        let mut padded = encoded.clone();
        padded.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(codec.decode(BANK_USER, &padded).unwrap(), sample());
    }

    #[test]
    fn test_decode_unformatted_bank() {
        let data = CompactCodec.decode(BANK_USER, &[0, 0, 0]).unwrap();
        assert_eq!(data, ItemData::default());
        assert_eq!(CompactCodec.decode(BANK_USER, &[]).unwrap(), ItemData::default());
    }

    #[test]
    fn test_decode_truncated() {
        let err = CompactCodec.decode(BANK_USER, &[0x03, 4, b'1', b'.']).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_unsupported_bank() {
        assert_eq!(
            CompactCodec.encode(2, &sample()),
            Err(CodecError::UnsupportedBank(2))
        );
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        let mut data = sample();
        data.entries.push(ItemEntry::new("1.2", "x".repeat(300)));
        assert!(matches!(
            CompactCodec.encode(BANK_USER, &data),
            Err(CodecError::EntryTooLarge(_))
        ));
    }

    #[test]
    fn test_duplicates() {
        let mut data = sample();
        assert!(!data.has_duplicates());
        data.entries.push(ItemEntry::new("1.0.15961.9.1", "again"));
        assert!(data.has_duplicates());
    }

    #[test]
    fn test_epc_bank_view() {
        let data = [0xAA, 0xBB, 0x11, 0x42, 0x05, 0x00, 0x00, 0x00];
        let bank = EpcBank::new(&data).unwrap();
        assert_eq!(bank.length_words(), 2);
        assert!(bank.toggle());
        assert_eq!(bank.afi(), 0x42);
        assert_eq!(bank.payload(), &[0x05, 0x00, 0x00, 0x00]);
        assert!(EpcBank::new(&data[..3]).is_none());
    }
}
