// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Item-data (variable field) operations.

use super::write::create_write_operation;
use super::{Execution, InitDirective, OperationKind, TagOperation};
use crate::context::Context;
use crate::field::FieldDescriptor;
use crate::iso::{self, EpcBank, ItemData, ItemEntry};
use crate::reader::{BANK_EPC, BANK_USER};
use crate::result::{OperationResult, ResultState};
use crate::tag::Tag;

/// Decode the item data of a whole-bank read.
///
/// An EPC bank without the toggle bit carries a plain EPC and decodes as
/// empty.
pub(super) fn decode(bank: u8, data: &[u8], ctx: &Context) -> Result<ItemData, ResultState> {
    if bank == BANK_EPC {
        let epc = EpcBank::new(data).ok_or(ResultState::MemoryCheckError)?;
        if !epc.toggle() {
            return Ok(ItemData::default());
        }
    }
    let payload = iso::bank_payload(bank, data).ok_or(ResultState::MemoryCheckError)?;
    ctx.codec
        .decode(bank, payload)
        .map_err(|_| ResultState::MemoryCheckError)
}

/// Cached decoding of `bank`, decoding `read` on first use.
fn item_data(tag: &mut Tag, bank: u8, read: &[u8], ctx: &Context) -> Result<ItemData, ResultState> {
    if let Some(cached) = tag.cached_item_data(bank) {
        return Ok(cached.clone());
    }
    let decoded = decode(bank, read, ctx)?;
    tag.cache_item_data(bank, decoded.clone());
    Ok(decoded)
}

/// Add, Write or Delete of an item-data entry.
///
/// Works on a copy of the decoded entries; the tag's cache only takes the
/// copy once the write has been built.
pub(super) fn modify(
    op: &TagOperation,
    descriptor: &FieldDescriptor,
    tag: &mut Tag,
    ctx: &Context,
) -> Execution {
    let (Some(read), Some(oid)) = (op.base_data(tag).map(<[u8]>::to_vec), &descriptor.oid) else {
        return Execution::fault(ResultState::OpNotPossibleError);
    };
    let bank = descriptor.bank();
    let mut item = match item_data(tag, bank, &read, ctx) {
        Ok(item) => item,
        Err(state) => return Execution::fault(state),
    };

    match op.kind() {
        OperationKind::Delete => {
            let before = item.entries.len();
            item.entries.retain(|e| !oid.matches(&e.oid));
            if item.entries.len() == before {
                return Execution::fault(ResultState::FieldNotFoundError);
            }
        }
        kind => {
            if item.dsfid == 0 {
                // bank not initialized
                return Execution::fault(ResultState::OpNotPossibleError);
            }
            let existing = item.entries.iter().position(|e| oid.matches(&e.oid));
            if kind == OperationKind::Add && existing.is_some() {
                return Execution::fault(ResultState::FieldExistsError);
            }
            let value = match op.data().map(|d| d.characters(&ctx.sources)) {
                Some(Ok(value)) => value,
                Some(Err(state)) => return Execution::fault(state),
                None => return Execution::fault(ResultState::MiscErrorTotal),
            };
            match existing {
                Some(index) => item.entries[index].value = value,
                None => item.entries.push(ItemEntry::new(oid.as_str(), value)),
            }
        }
    }

    let encoded = match ctx.codec.encode(bank, &item) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::trace!(operation = op.id(), error = %e, "Item data encode failed");
            return Execution::fault(ResultState::MemoryOverflowError);
        }
    };
    match create_write_operation(op.id(), bank, &read, None, &encoded) {
        Ok((operation, image)) => {
            tag.cache_item_data(bank, item);
            Execution::Emit {
                operation,
                image: Some(image),
            }
        }
        Err(state) => Execution::fault(state),
    }
}

/// True when the bank already holds item data.
fn initialized(bank: u8, data: &[u8]) -> bool {
    match bank {
        BANK_EPC => EpcBank::new(data).is_some_and(|epc| {
            epc.toggle() && epc.afi() != 0 && epc.payload().first().is_some_and(|b| *b != 0)
        }),
        BANK_USER => data.first().is_some_and(|b| *b != 0),
        _ => false,
    }
}

/// Format a bank with an empty item-data set.
pub(super) fn initialize(
    op: &TagOperation,
    init: InitDirective,
    tag: &mut Tag,
    ctx: &Context,
) -> Execution {
    let (Some(read), Some(bank)) = (
        op.base_data(tag).map(<[u8]>::to_vec),
        op.descriptor().map(FieldDescriptor::bank),
    ) else {
        return Execution::fault(ResultState::OpNotPossibleError);
    };
    if initialized(bank, &read) && !init.force {
        return Execution::Resolved(OperationResult::Write {
            state: ResultState::Success,
            words_written: 0,
        });
    }
    let encoded = match ctx.codec.encode(bank, &ItemData::new(init.dsfid)) {
        Ok(encoded) => encoded,
        Err(_) => return Execution::fault(ResultState::MemoryOverflowError),
    };
    match create_write_operation(op.id(), bank, &read, init.afi, &encoded) {
        Ok((operation, image)) => {
            tag.clear_item_data(bank);
            Execution::Emit {
                operation,
                image: Some(image),
            }
        }
        Err(state) => Execution::fault(state),
    }
}

#[cfg(test)]
mod tests {
    use super::super::IdSequence;
    use super::*;
    use crate::iso::PC_TOGGLE;
    use crate::reader::{Field, ReaderOperation, ReaderOperationKind};
    use crate::spec::{DataSpec, OperationSpec};
    use crate::tag::TagKey;
    use std::collections::HashMap;

    const LOT: &str = "@3.urn:oid:1.0.15961.9.1";

    fn compile(ctx: &Context, ids: &mut IdSequence, spec: OperationSpec) -> TagOperation {
        TagOperation::compile(&spec, &HashMap::new(), ctx, ids).unwrap()
    }

    fn user_bank(ctx: &Context, entries: &[(&str, &str)]) -> Vec<u8> {
        let item = ItemData {
            dsfid: 0x03,
            entries: entries.iter().map(|(o, v)| ItemEntry::new(*o, *v)).collect(),
        };
        let mut bank = ctx.codec.encode(BANK_USER, &item).unwrap();
        bank.resize(64, 0);
        bank
    }

    fn with_read(id: u16, data: Vec<u8>) -> Tag {
        let mut tag = Tag::new(TagKey::new(vec![0x30, 0x00]));
        tag.set_result(id, OperationResult::Read { state: ResultState::Success, data });
        tag
    }

    fn written(execution: Execution) -> (ReaderOperation, Vec<u8>) {
        match execution {
            Execution::Emit {
                operation,
                image: Some(image),
            } => (operation, image.data),
            other => panic!("expected write with image, got {:?}", other),
        }
    }

    #[test]
    fn test_user_bank_write_roundtrip() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("WRITE").field(LOT).data(DataSpec::literal("LOT-42")),
        );
        let read = user_bank(&ctx, &[("1.0.15961.9.1", "OLD"), ("1.0.15961.9.7", "DE")]);
        let mut tag = with_read(op.read_id().unwrap(), read);

        let (operation, image) = written(op.execute(&mut tag, &[], &ctx));
        assert_eq!(operation.id, op.id());
        let decoded = ctx.codec.decode(BANK_USER, &image).unwrap();
        assert_eq!(
            decoded.entries,
            vec![
                ItemEntry::new("1.0.15961.9.1", "LOT-42"),
                ItemEntry::new("1.0.15961.9.7", "DE"),
            ]
        );
        assert_eq!(tag.cached_item_data(BANK_USER), Some(&decoded));
    }

    #[test]
    fn test_add_existing_keeps_cache() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("ADD").field(LOT).data(DataSpec::literal("NEW")),
        );
        let read = user_bank(&ctx, &[("1.0.15961.9.1", "OLD")]);
        let mut tag = with_read(op.read_id().unwrap(), read);

        let execution = op.execute(&mut tag, &[], &ctx);
        assert_eq!(
            execution,
            Execution::Resolved(OperationResult::fault(ResultState::FieldExistsError))
        );
        let cached = tag.cached_item_data(BANK_USER).unwrap();
        assert_eq!(cached.entries, vec![ItemEntry::new("1.0.15961.9.1", "OLD")]);
    }

    #[test]
    fn test_encode_failure_keeps_cache() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("WRITE").field(LOT).data(DataSpec::literal("x".repeat(300))),
        );
        let read = user_bank(&ctx, &[("1.0.15961.9.1", "OLD")]);
        let mut tag = with_read(op.read_id().unwrap(), read);
        assert_eq!(
            op.execute(&mut tag, &[], &ctx),
            Execution::Resolved(OperationResult::fault(ResultState::MemoryOverflowError))
        );
        let cached = tag.cached_item_data(BANK_USER).unwrap();
        assert_eq!(cached.entries[0].value, "OLD");
    }

    #[test]
    fn test_delete_missing_entry() {
        let ctx = Context::new();
        let op = compile(&ctx, &mut IdSequence::new(), OperationSpec::new("DELETE").field(LOT));
        let read = user_bank(&ctx, &[("1.0.15961.9.7", "DE")]);
        let mut tag = with_read(op.read_id().unwrap(), read);
        assert_eq!(
            op.execute(&mut tag, &[], &ctx),
            Execution::Resolved(OperationResult::fault(ResultState::FieldNotFoundError))
        );
    }

    #[test]
    fn test_delete_removes_entry() {
        let ctx = Context::new();
        let op = compile(&ctx, &mut IdSequence::new(), OperationSpec::new("DELETE").field(LOT));
        let read = user_bank(&ctx, &[("1.0.15961.9.1", "A"), ("1.0.15961.9.7", "DE")]);
        let mut tag = with_read(op.read_id().unwrap(), read);
        let (_, image) = written(op.execute(&mut tag, &[], &ctx));
        let decoded = ctx.codec.decode(BANK_USER, &image).unwrap();
        assert_eq!(decoded.entries, vec![ItemEntry::new("1.0.15961.9.7", "DE")]);
    }

    #[test]
    fn test_write_needs_read() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("WRITE").field(LOT).data(DataSpec::literal("A")),
        );
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        assert_eq!(
            op.execute(&mut tag, &[], &ctx),
            Execution::Resolved(OperationResult::fault(ResultState::OpNotPossibleError))
        );
    }

    #[test]
    fn test_epc_bank_write_sets_toggle() {
        let ctx = Context::new();
        let mut ids = IdSequence::new();
        let op = compile(
            &ctx,
            &mut ids,
            OperationSpec::new("WRITE")
                .field("@1.urn:oid:1.0.15961.9.1")
                .data(DataSpec::literal("D1")),
        );
        assert_eq!(op.read_id(), Some(1));
        assert_eq!(op.id(), 2);

        // CRC, PC (toggle set, AFI A1, 2 words), payload DSFID 03, then free space
        let mut bank = vec![0xCA, 0xFE, 0x11, 0xA1, 0x03, 0x00];
        bank.extend_from_slice(&[0u8; 40]);
        let mut tag = with_read(1, bank);

        let (operation, image) = written(op.execute(&mut tag, &[], &ctx));
        let ReaderOperationKind::Write { field, data } = operation.kind else {
            panic!("expected a write");
        };
        assert_eq!(field.bank, BANK_EPC);
        assert_eq!(field.offset, 16);
        assert_ne!(data[0] & PC_TOGGLE, 0);
        assert_eq!(data[1], 0xA1);
        assert!(data.windows(2).any(|w| w == b"D1"));
        assert_eq!(decode(BANK_EPC, &image, &ctx).unwrap().entries[0].value, "D1");
    }

    #[test]
    fn test_initialize_skips_formatted_bank() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("INITIALIZE")
                .field("userBank")
                .data(DataSpec::literal("urn:epcglobal:ale:init:iso15962:x03")),
        );
        let read = user_bank(&ctx, &[("1.2", "A")]);
        let mut tag = with_read(op.read_id().unwrap(), read);
        assert_eq!(
            op.execute(&mut tag, &[], &ctx),
            Execution::Resolved(OperationResult::Write {
                state: ResultState::Success,
                words_written: 0
            })
        );
    }

    #[test]
    fn test_initialize_force_clears_bank() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("INITIALIZE")
                .field("epcBank")
                .data(DataSpec::literal("urn:epcglobal:ale:init:iso15962:x03.xA1.force")),
        );
        let mut bank = vec![0xCA, 0xFE, 0x11, 0xA1, 0x03, 0x00];
        bank.extend_from_slice(&[0xEE; 8]);
        let mut tag = with_read(op.read_id().unwrap(), bank);
        tag.cache_item_data(BANK_EPC, ItemData::new(3));

        let (operation, image) = written(op.execute(&mut tag, &[], &ctx));
        assert_eq!(operation.id, op.id());
        assert!(tag.cached_item_data(BANK_EPC).is_none());
        assert_eq!(&image[2..], &[0x09, 0xA1, 0x03, 0x00, 0, 0, 0, 0, 0, 0, 0, 0]);
        let ReaderOperationKind::Write { field, .. } = operation.kind else {
            panic!("expected a write");
        };
        assert_eq!(field, Field::new(BANK_EPC, 16, 96));
    }
}
