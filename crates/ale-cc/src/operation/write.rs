// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory images for fixed-field writes and whole-bank item-data writes.

use super::{Execution, Image, OperationKind, TagOperation, PC_OFFSET};
use crate::bits::{self, byte_len, get_bit, set_bit, Bytes, WORD_BITS};
use crate::context::Context;
use crate::field::FieldDescriptor;
use crate::iso::{EpcBank, PC_CONTROL, PC_MAX_WORDS, PC_TOGGLE};
use crate::reader::{Field, ReaderOperation, ReaderOperationKind, BANK_EPC, BANK_USER};
use crate::result::ResultState;
use crate::tag::Tag;

/// Round a window out to whole words.
pub(super) fn aligned(field: Field) -> Field {
    let start = bits::word_floor(field.offset);
    let end = bits::word_ceil(field.offset.saturating_add(field.length));
    Field::new(field.bank, start, end - start)
}

/// Fold the writes in `batch` that overlap `window` into `image`.
///
/// `image` holds `window` (bit 0 is `window.offset`). Writes are applied in
/// batch order, so a later write wins where two overlap.
pub fn apply(image: &mut [u8], window: Field, batch: &[ReaderOperation]) {
    let start = usize::from(window.offset);
    let end = start + usize::from(window.length);
    for operation in batch {
        let ReaderOperationKind::Write { field, data } = &operation.kind else {
            continue;
        };
        if field.bank != window.bank {
            continue;
        }
        let origin = usize::from(field.offset);
        let from = origin.max(start);
        let to = (origin + usize::from(field.length)).min(end);
        for bit in from..to {
            set_bit(image, bit - start, get_bit(data, bit - origin));
        }
    }
}

/// Add, Write or Delete of a fixed field.
pub(super) fn fixed(
    op: &TagOperation,
    descriptor: &FieldDescriptor,
    tag: &Tag,
    batch: &[ReaderOperation],
    ctx: &Context,
) -> Execution {
    if descriptor.is_epc() {
        return epc(op, descriptor, tag, ctx);
    }
    let window = aligned(descriptor.field);
    let Some(read) = op.base_data(tag) else {
        return Execution::fault(ResultState::OpNotPossibleError);
    };
    let Some(read) = read.get(..byte_len(window.length)) else {
        return Execution::fault(ResultState::OutOfRangeError);
    };
    let mut image = read.to_vec();
    apply(&mut image, window, batch);

    let offset = usize::from(descriptor.field.offset - window.offset);
    let length = descriptor.field.length;
    match op.kind() {
        OperationKind::Delete => bits::clear(&mut image, offset, length),
        kind => {
            if kind == OperationKind::Add && !bits::extract(&image, offset, length).is_zero() {
                return Execution::fault(ResultState::FieldExistsError);
            }
            let value = match op.data().map(|d| d.bytes(Some(descriptor), &ctx.sources)) {
                Some(Ok(value)) => value,
                Some(Err(state)) => return Execution::fault(state),
                None => return Execution::fault(ResultState::MiscErrorTotal),
            };
            if value.length() > length {
                return Execution::fault(ResultState::OutOfRangeError);
            }
            bits::place(&mut image, offset, &Bytes::new(value.data().to_vec(), length));
        }
    }
    Execution::Emit {
        operation: ReaderOperation::write(op.id(), window, image),
        image: None,
    }
}

/// The `epc` field: PC word plus EPC, toggle cleared.
fn epc(op: &TagOperation, descriptor: &FieldDescriptor, tag: &Tag, ctx: &Context) -> Execution {
    let pc = op.base_data(tag).and_then(|d| d.get(..2));
    if op.kind() == OperationKind::Add {
        match pc {
            Some(pc) if pc[0] >> 3 != 0 => return Execution::fault(ResultState::FieldExistsError),
            Some(_) => {}
            None => return Execution::fault(ResultState::OpNotPossibleError),
        }
    }

    let value = if op.kind() == OperationKind::Delete {
        Bytes::default()
    } else {
        match op.data().map(|d| d.bytes(Some(descriptor), &ctx.sources)) {
            Some(Ok(value)) => value,
            Some(Err(state)) => return Execution::fault(state),
            None => return Execution::fault(ResultState::MiscErrorTotal),
        }
    };
    let words = usize::from(value.length() / WORD_BITS);
    if value.length() % WORD_BITS != 0 || words > PC_MAX_WORDS {
        return Execution::fault(ResultState::OutOfRangeError);
    }

    // byte 1 is an AFI only while the toggle bit is set
    let (control, attributes) = match pc {
        Some(pc) if pc[0] & PC_TOGGLE == 0 => (pc[0] & PC_CONTROL, pc[1]),
        Some(pc) => (pc[0] & PC_CONTROL, 0),
        None => (0, 0),
    };
    let mut image = vec![((words as u8) << 3) | control, attributes];
    image.extend_from_slice(value.data());
    let field = Field::new(BANK_EPC, PC_OFFSET, WORD_BITS + value.length());
    Execution::Emit {
        operation: ReaderOperation::write(op.id(), field, image),
        image: None,
    }
}

/// Build the bank write for an encoded item-data payload.
///
/// `read` is the previous whole-bank read. In the EPC bank the PC length is
/// recomputed from `encoded`, the control bits kept, the toggle bit forced
/// and the AFI replaced when `afi` is given; the write starts at the PC word
/// and the returned image includes the CRC. In the user bank `encoded` is
/// zero-padded to the read length.
pub fn create_write_operation(
    id: u16,
    bank: u8,
    read: &[u8],
    afi: Option<u8>,
    encoded: &[u8],
) -> Result<(ReaderOperation, Image), ResultState> {
    match bank {
        BANK_EPC => {
            let epc = EpcBank::new(read).ok_or(ResultState::OpNotPossibleError)?;
            let words = encoded.len().div_ceil(2);
            let capacity = epc.tail().len();
            if words > PC_MAX_WORDS || words * 2 > capacity {
                return Err(ResultState::MemoryOverflowError);
            }
            let [pc0, pc1] = epc.pc();
            let mut image = Vec::with_capacity(2 + capacity);
            image.push(((words as u8) << 3) | (pc0 & PC_CONTROL) | PC_TOGGLE);
            image.push(afi.unwrap_or(pc1));
            image.extend_from_slice(encoded);
            image.resize(2 + capacity + capacity % 2, 0);

            let field = Field::new(BANK_EPC, PC_OFFSET, bit_length(image.len())?);
            let mut data = read[..2].to_vec();
            data.extend_from_slice(&image);
            Ok((
                ReaderOperation::write(id, field, image),
                Image {
                    field: Field::bank(BANK_EPC),
                    data,
                },
            ))
        }
        BANK_USER => {
            if encoded.len() > read.len() {
                return Err(ResultState::MemoryOverflowError);
            }
            let mut image = encoded.to_vec();
            image.resize(read.len() + read.len() % 2, 0);
            let field = Field::new(BANK_USER, 0, bit_length(image.len())?);
            Ok((
                ReaderOperation::write(id, field, image.clone()),
                Image {
                    field: Field::bank(BANK_USER),
                    data: image,
                },
            ))
        }
        _ => Err(ResultState::OpNotPossibleError),
    }
}

fn bit_length(bytes: usize) -> Result<u16, ResultState> {
    u16::try_from(bytes * 8).map_err(|_| ResultState::MemoryOverflowError)
}

#[cfg(test)]
mod tests {
    use super::super::IdSequence;
    use super::*;
    use crate::result::OperationResult;
    use crate::spec::{DataSpec, OperationSpec};
    use crate::tag::TagKey;
    use std::collections::HashMap;

    fn compile(ctx: &Context, ids: &mut IdSequence, spec: OperationSpec) -> TagOperation {
        TagOperation::compile(&spec, &HashMap::new(), ctx, ids).unwrap()
    }

    fn read(tag: &mut Tag, id: u16, data: &[u8]) {
        tag.set_result(
            id,
            OperationResult::Read {
                state: ResultState::Success,
                data: data.to_vec(),
            },
        );
    }

    fn emitted(execution: Execution) -> ReaderOperation {
        match execution {
            Execution::Emit { operation, .. } => operation,
            other => panic!("expected emit, got {:?}", other),
        }
    }

    fn fault(execution: Execution) -> ResultState {
        match execution {
            Execution::Resolved(OperationResult::Fault { state }) => state,
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_aligned_window() {
        assert_eq!(aligned(Field::new(1, 23, 9)), Field::new(1, 16, 16));
        assert_eq!(aligned(Field::new(3, 4, 16)), Field::new(3, 0, 32));
        assert_eq!(aligned(Field::new(0, 32, 32)), Field::new(0, 32, 32));
    }

    #[test]
    fn test_overlapping_writes_coalesce() {
        let ctx = Context::new();
        let mut ids = IdSequence::new();
        let first = compile(
            &ctx,
            &mut ids,
            OperationSpec::new("WRITE").field("@3.8.4").data(DataSpec::literal("xAB")),
        );
        let second = compile(
            &ctx,
            &mut ids,
            OperationSpec::new("WRITE").field("@3.12.8").data(DataSpec::literal("x5")),
        );
        assert!(first.id() < second.id());

        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        read(&mut tag, first.read_id().unwrap(), &[0, 0]);
        read(&mut tag, second.read_id().unwrap(), &[0, 0, 0, 0]);

        let first_write = emitted(first.execute(&mut tag, &[], &ctx));
        assert_eq!(first_write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_USER, 0, 16),
            data: vec![0x0A, 0xB0],
        });

        let second_write = emitted(second.execute(&mut tag, &[first_write], &ctx));
        assert_eq!(second_write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_USER, 0, 32),
            data: vec![0x0A, 0x00, 0x50, 0x00],
        });
    }

    #[test]
    fn test_fixed_add_existing_value() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("ADD").field("afi").data(DataSpec::literal("x42")),
        );
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        read(&mut tag, op.read_id().unwrap(), &[0x30, 0x05]);
        assert_eq!(fault(op.execute(&mut tag, &[], &ctx)), ResultState::FieldExistsError);

        read(&mut tag, op.read_id().unwrap(), &[0x30, 0x00]);
        let write = emitted(op.execute(&mut tag, &[], &ctx));
        assert_eq!(write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_EPC, 16, 16),
            data: vec![0x30, 0x42],
        });
    }

    #[test]
    fn test_fixed_write_without_read() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("WRITE").field("accessPwd").data(DataSpec::literal("x1")),
        );
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        assert_eq!(fault(op.execute(&mut tag, &[], &ctx)), ResultState::OpNotPossibleError);
    }

    #[test]
    fn test_fixed_delete_zero_fills() {
        let ctx = Context::new();
        let op = compile(&ctx, &mut IdSequence::new(), OperationSpec::new("DELETE").field("nsi"));
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        read(&mut tag, op.read_id().unwrap(), &[0x31, 0xFF]);
        let write = emitted(op.execute(&mut tag, &[], &ctx));
        assert_eq!(write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_EPC, 16, 16),
            data: vec![0x30, 0x00],
        });
    }

    #[test]
    fn test_epc_write_recomputes_pc() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("WRITE").field("epc").data(DataSpec::literal("3000AAAA")),
        );
        assert!(!op.advance());
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        let write = emitted(op.execute(&mut tag, &[], &ctx));
        assert_eq!(write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_EPC, 16, 48),
            data: vec![0x10, 0x00, 0x30, 0x00, 0xAA, 0xAA],
        });
    }

    #[test]
    fn test_epc_add_on_existing_epc() {
        let ctx = Context::new();
        let op = compile(
            &ctx,
            &mut IdSequence::new(),
            OperationSpec::new("ADD").field("epc").data(DataSpec::literal("3000")),
        );
        let mut tag = Tag::new(TagKey::new(vec![0x30]));
        read(&mut tag, op.read_id().unwrap(), &[0x30, 0x00]);
        assert_eq!(fault(op.execute(&mut tag, &[], &ctx)), ResultState::FieldExistsError);

        // toggle cleared, UMI kept
        read(&mut tag, op.read_id().unwrap(), &[0x05, 0xA1]);
        let write = emitted(op.execute(&mut tag, &[], &ctx));
        assert_eq!(write.kind, ReaderOperationKind::Write {
            field: Field::new(BANK_EPC, 16, 32),
            data: vec![0x0C, 0x00, 0x30, 0x00],
        });
    }

    #[test]
    fn test_pc_length_tracks_encoded_size() {
        for toggle in [0x00, PC_TOGGLE] {
            let mut bank = vec![0xCA, 0xFE, 0x30 | 0x04 | toggle, 0x00];
            bank.extend_from_slice(&[0u8; 24]);
            for len in 1..=24usize {
                let encoded = vec![0x5A; len];
                let (operation, image) =
                    create_write_operation(7, BANK_EPC, &bank, Some(0xA1), &encoded).unwrap();
                let ReaderOperationKind::Write { field, data } = operation.kind else {
                    panic!("expected a write");
                };
                assert_eq!(field.offset, 16);
                assert_eq!(usize::from(data[0] >> 3), (len * 8).div_ceil(16));
                assert_ne!(data[0] & PC_TOGGLE, 0);
                assert_eq!(data[0] & PC_CONTROL, 0x04);
                assert_eq!(data[1], 0xA1);
                assert_eq!(&data[2..2 + len], &encoded[..]);
                assert_eq!(&image.data[..2], &[0xCA, 0xFE]);
                assert_eq!(&image.data[2..], &data[..]);
            }
        }
    }

    #[test]
    fn test_epc_bank_overflow() {
        let bank = [0u8; 8];
        assert_eq!(
            create_write_operation(1, BANK_EPC, &bank, None, &[1, 2, 3, 4, 5]),
            Err(ResultState::MemoryOverflowError)
        );
    }

    #[test]
    fn test_user_bank_padded_to_read() {
        let (operation, image) =
            create_write_operation(3, BANK_USER, &[9u8; 8], None, &[1, 2, 3]).unwrap();
        assert_eq!(operation, ReaderOperation::write(3, Field::new(BANK_USER, 0, 64), vec![1, 2, 3, 0, 0, 0, 0, 0]));
        assert_eq!(image.field, Field::bank(BANK_USER));
        assert_eq!(
            create_write_operation(3, BANK_USER, &[0u8; 2], None, &[1, 2, 3]),
            Err(ResultState::MemoryOverflowError)
        );
    }
}
