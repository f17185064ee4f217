// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tag operations.
//!
//! A [`TagOperation`] is one compiled [`OperationSpec`]. It lives through two
//! phases:
//!
//! 1. **Compile**: [`TagOperation::compile`] resolves the field and data,
//!    validates the combination for the kind and assigns ids. Operations
//!    that need the tag's memory first (*advance*) also reserve the id of a
//!    base read, which the owning `Reports` merges into the reader batch.
//! 2. **Execute**: [`TagOperation::execute`] turns the tag's prior results
//!    into either a reader operation ([`Execution::Emit`]) or a result
//!    decided without the reader ([`Execution::Resolved`]), such as a fault.
//!
//! Kinds:
//!
//! | Kind         | Field                         | Data                  | Advance |
//! |--------------|-------------------------------|-----------------------|---------|
//! | `READ`       | any                           | forbidden             | no      |
//! | `CHECK`      | `epcBank` / `userBank`        | check directive       | yes     |
//! | `INITIALIZE` | `epcBank` / `userBank`        | init directive        | yes     |
//! | `ADD`        | fixed or item data            | required              | mostly  |
//! | `WRITE`      | fixed or item data            | required              | mostly  |
//! | `DELETE`     | fixed or item data            | forbidden             | mostly  |
//! | `PASSWORD`   | forbidden                     | 32-bit value          | no      |
//! | `KILL`       | forbidden                     | 32-bit value          | no      |
//! | `LOCK`       | passwords or whole banks      | lock type             | no      |
//! | `CUSTOM`     | forbidden                     | parameter or bytes    | no      |

mod directive;
mod item;
mod write;

pub use directive::{parse_check, InitDirective, LockType};
pub use write::{apply, create_write_operation};

use crate::bits::{self, Bytes};
use crate::context::Context;
use crate::data::{Data, Target};
use crate::error::ValidationError;
use crate::field::{Datatype, FieldDescriptor, FieldHandle, Format};
use crate::iso::{self, EpcBank};
use crate::reader::{
    Field, ReaderOperation, ReaderOperationKind, BANK_EPC, BANK_RESERVED, BANK_TID, BANK_USER,
    PASSWORD_BITS,
};
use crate::report::envelope::OperationReport;
use crate::result::{OperationResult, ResultState};
use crate::spec::{DataSpec, OperationSpec};
use crate::tag::Tag;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Bank offset of the PC word.
const PC_OFFSET: u16 = 16;

const KINDS: [&str; 10] = [
    "READ",
    "CHECK",
    "INITIALIZE",
    "ADD",
    "WRITE",
    "DELETE",
    "PASSWORD",
    "KILL",
    "LOCK",
    "CUSTOM",
];

/// Kind of a compiled operation, with kind-specific state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Check,
    Initialize(InitDirective),
    Add,
    Write,
    Delete,
    Password,
    Kill,
    Lock(LockType),
    Custom,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Check => "CHECK",
            Self::Initialize(_) => "INITIALIZE",
            Self::Add => "ADD",
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::Password => "PASSWORD",
            Self::Kill => "KILL",
            Self::Lock(_) => "LOCK",
            Self::Custom => "CUSTOM",
        }
    }
}

/// Monotonic operation id source shared by all reports of one cycle.
#[derive(Debug, Default)]
pub struct IdSequence(u16);

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id; the first is 1. Fails once every `u16` id is taken.
    pub fn next_id(&mut self) -> Result<u16, ValidationError> {
        self.0 = self
            .0
            .checked_add(1)
            .ok_or(ValidationError::IdsExhausted(self.0))?;
        Ok(self.0)
    }

    /// Last id handed out.
    pub fn last(&self) -> u16 {
        self.0
    }
}

/// Memory image left behind by a pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Window the image covers, as a read of it would be addressed.
    pub field: Field,
    pub data: Vec<u8>,
}

/// Outcome of executing one operation on one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Hand `operation` to the reader.
    Emit {
        operation: ReaderOperation,
        image: Option<Image>,
    },
    /// Decided without the reader.
    Resolved(OperationResult),
}

impl Execution {
    fn fault(state: ResultState) -> Self {
        Self::Resolved(OperationResult::fault(state))
    }
}

/// A compiled operation.
#[derive(Debug)]
pub struct TagOperation {
    id: u16,
    read_id: Option<u16>,
    name: String,
    kind: OperationKind,
    field: Option<(FieldHandle, FieldDescriptor)>,
    data: Option<Data>,
    disposed: bool,
}

impl TagOperation {
    /// Compile `spec`, taking ids from `ids`.
    ///
    /// On failure every acquired field or data source is released and the
    /// error is wrapped with the operation's name.
    pub fn compile(
        spec: &OperationSpec,
        parameters: &HashMap<String, String>,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Self, ValidationError> {
        let label = spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| spec.kind.clone());
        Self::build(spec, parameters, ctx, ids).map_err(|e| e.in_operation(label))
    }

    fn build(
        spec: &OperationSpec,
        parameters: &HashMap<String, String>,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Self, ValidationError> {
        let kind_name = KINDS
            .iter()
            .copied()
            .find(|k| *k == spec.kind)
            .ok_or_else(|| ValidationError::UnknownOperation(spec.kind.clone()))?;

        let takes_field = !matches!(kind_name, "PASSWORD" | "KILL" | "CUSTOM");
        let field = match (&spec.field, takes_field) {
            (Some(name), true) => Some(ctx.fields.acquire(name)?),
            (None, true) => return Err(ValidationError::FieldRequired(kind_name)),
            (Some(_), false) => return Err(ValidationError::FieldForbidden(kind_name)),
            (None, false) => None,
        };

        let descriptor = field.as_ref().map(|(_, d)| d);
        let (kind, data) = match resolve_kind(kind_name, spec, descriptor, parameters, ctx) {
            Ok(resolved) => resolved,
            Err(e) => {
                if let Some((handle, _)) = field {
                    ctx.fields.release(handle);
                }
                return Err(e);
            }
        };

        let mut operation = Self {
            id: 0,
            read_id: None,
            name: spec.name.clone().unwrap_or_default(),
            kind,
            field,
            data,
            disposed: false,
        };
        let reserved = match operation.base_read() {
            Some(_) => ids.next_id().map(Some),
            None => Ok(None),
        }
        .and_then(|read_id| Ok((read_id, ids.next_id()?)));
        match reserved {
            Ok((read_id, id)) => {
                operation.read_id = read_id;
                operation.id = id;
                Ok(operation)
            }
            Err(e) => {
                operation.dispose(ctx);
                Err(e)
            }
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Operation name; empty when the client gave none.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn descriptor(&self) -> Option<&FieldDescriptor> {
        self.field.as_ref().map(|(_, d)| d)
    }

    pub(crate) fn data(&self) -> Option<&Data> {
        self.data.as_ref()
    }

    /// True when the operation needs the tag's memory before executing.
    pub fn advance(&self) -> bool {
        self.read_id.is_some()
    }

    /// Id of the base read, for advance operations.
    pub fn read_id(&self) -> Option<u16> {
        self.read_id
    }

    /// Window the base read covers.
    pub fn base_read(&self) -> Option<Field> {
        let descriptor = self.descriptor()?;
        match self.kind {
            OperationKind::Check | OperationKind::Initialize(_) => {
                Some(Field::bank(descriptor.bank()))
            }
            OperationKind::Add | OperationKind::Write | OperationKind::Delete => {
                if descriptor.is_variable() {
                    Some(Field::bank(descriptor.bank()))
                } else if descriptor.is_epc() {
                    (self.kind == OperationKind::Add).then_some(Field::new(BANK_EPC, PC_OFFSET, 16))
                } else {
                    Some(write::aligned(descriptor.field))
                }
            }
            _ => None,
        }
    }

    /// Reader read feeding this operation, for the merged batch.
    pub fn base_read_operation(&self) -> Option<ReaderOperation> {
        Some(ReaderOperation::read(self.read_id?, self.base_read()?))
    }

    /// Window a `READ` operation reads.
    pub(crate) fn read_window(&self) -> Option<Field> {
        let descriptor = self.descriptor()?;
        Some(if descriptor.is_variable() {
            Field::bank(descriptor.bank())
        } else if descriptor.is_epc() {
            Field::new(BANK_EPC, PC_OFFSET, 0)
        } else {
            descriptor.field
        })
    }

    /// Successful base read payload on `tag`.
    fn base_data<'t>(&self, tag: &'t Tag) -> Option<&'t [u8]> {
        self.read_id
            .and_then(|id| tag.result(id))
            .and_then(OperationResult::read_data)
    }

    /// Execute on `tag`. `batch` holds the reader operations already emitted
    /// for this tag in the current pass, all with lower ids.
    pub fn execute(&self, tag: &mut Tag, batch: &[ReaderOperation], ctx: &Context) -> Execution {
        match self.kind {
            OperationKind::Read => self.execute_read(tag),
            OperationKind::Check => self.execute_check(tag),
            OperationKind::Initialize(init) => item::initialize(self, init, tag, ctx),
            OperationKind::Add | OperationKind::Write | OperationKind::Delete => {
                match self.descriptor() {
                    Some(d) if d.is_variable() => item::modify(self, d, tag, ctx),
                    Some(d) => write::fixed(self, d, tag, batch, ctx),
                    None => Execution::fault(ResultState::MiscErrorTotal),
                }
            }
            OperationKind::Password | OperationKind::Kill => self.execute_password(ctx),
            OperationKind::Lock(lock) => match self.descriptor() {
                Some(d) => Execution::Emit {
                    operation: ReaderOperation {
                        id: self.id,
                        kind: ReaderOperationKind::Lock {
                            field: d.field,
                            privilege: lock.ordinal(),
                        },
                    },
                    image: None,
                },
                None => Execution::fault(ResultState::MiscErrorTotal),
            },
            OperationKind::Custom => self.execute_custom(ctx),
        }
    }

    fn execute_read(&self, tag: &Tag) -> Execution {
        if let Some(result @ OperationResult::VirtualRead { .. }) = tag.result(self.id) {
            return Execution::Resolved(result.clone());
        }
        match self.read_window() {
            Some(field) => Execution::Emit {
                operation: ReaderOperation::read(self.id, field),
                image: None,
            },
            None => Execution::fault(ResultState::MiscErrorTotal),
        }
    }

    fn execute_check(&self, tag: &Tag) -> Execution {
        match self.read_id.and_then(|id| tag.result(id)) {
            Some(result) => Execution::Resolved(result.clone()),
            None => Execution::fault(ResultState::OpNotPossibleError),
        }
    }

    fn execute_password(&self, ctx: &Context) -> Execution {
        let value = match self.data.as_ref().map(|d| d.uint(&ctx.sources)) {
            Some(Ok(value)) => value,
            Some(Err(state)) => return Execution::fault(state),
            None => return Execution::fault(ResultState::MiscErrorTotal),
        };
        let Ok(password) = u32::try_from(value) else {
            return Execution::fault(ResultState::PasswordOutOfRangeError);
        };
        let kind = if self.kind == OperationKind::Kill {
            ReaderOperationKind::Kill { password }
        } else {
            ReaderOperationKind::Password { password }
        };
        Execution::Emit {
            operation: ReaderOperation { id: self.id, kind },
            image: None,
        }
    }

    fn execute_custom(&self, ctx: &Context) -> Execution {
        let bytes = match self.data.as_ref().map(|d| d.bytes(None, &ctx.sources)) {
            Some(Ok(bytes)) => bytes,
            Some(Err(state)) => return Execution::fault(state),
            None => return Execution::fault(ResultState::MiscErrorTotal),
        };
        Execution::Emit {
            operation: ReaderOperation {
                id: self.id,
                kind: ReaderOperationKind::Custom {
                    length: bytes.length(),
                    data: bytes.data().to_vec(),
                },
            },
            image: None,
        }
    }

    /// True when `result` finishes this operation.
    pub fn is_completed(&self, result: Option<&OperationResult>) -> bool {
        let Some(result) = result else {
            return false;
        };
        if result.is_fault() {
            return true;
        }
        match self.kind {
            OperationKind::Read | OperationKind::Check => result.is_read(),
            OperationKind::Initialize(_)
            | OperationKind::Add
            | OperationKind::Write
            | OperationKind::Delete => matches!(result, OperationResult::Write { .. }),
            OperationKind::Password => matches!(result, OperationResult::Password { .. }),
            OperationKind::Kill => matches!(result, OperationResult::Kill { .. }),
            OperationKind::Lock(_) => matches!(result, OperationResult::Lock { .. }),
            OperationKind::Custom => matches!(result, OperationResult::Custom { .. }),
        }
    }

    /// Render this operation's outcome on `tag`.
    pub fn report(&self, tag: &Tag, ctx: &Context) -> OperationReport {
        let (status, data) = match tag.result(self.id) {
            None => (ResultState::MiscErrorTotal, None),
            Some(result) if !result.state().is_success() => (result.state(), None),
            Some(result) => match self.kind {
                OperationKind::Read => match (result.read_data(), self.descriptor()) {
                    (Some(data), Some(descriptor)) => match render(descriptor, data, ctx) {
                        Ok(text) => (ResultState::Success, Some(text)),
                        Err(state) => (state, None),
                    },
                    _ => (ResultState::MiscErrorTotal, None),
                },
                OperationKind::Check => match (result.read_data(), self.descriptor()) {
                    (Some(data), Some(descriptor)) => (check(descriptor.bank(), data, ctx), None),
                    _ => (ResultState::MemoryCheckError, None),
                },
                OperationKind::Custom => match result {
                    OperationResult::Custom { state, data } if !data.is_empty() => {
                        (*state, Some(bits::to_hex(data)))
                    }
                    other => (other.state(), None),
                },
                _ => (result.state(), None),
            },
        };
        OperationReport {
            name: self.name.clone(),
            status,
            data,
        }
    }

    /// Give back the field and data sources. Later calls do nothing.
    pub fn dispose(&mut self, ctx: &Context) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some((handle, _)) = &self.field {
            ctx.fields.release(*handle);
        }
        if let Some(data) = &self.data {
            data.release(&ctx.sources);
        }
    }
}

impl PartialEq for TagOperation {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.descriptor() == other.descriptor()
            && self.data == other.data
    }
}

impl Eq for TagOperation {}

impl Hash for TagOperation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.name.hash(state);
        self.descriptor().hash(state);
        self.data.hash(state);
    }
}

/// Validate kind-specific field and data rules.
fn resolve_kind(
    kind_name: &'static str,
    spec: &OperationSpec,
    descriptor: Option<&FieldDescriptor>,
    parameters: &HashMap<String, String>,
    ctx: &Context,
) -> Result<(OperationKind, Option<Data>), ValidationError> {
    let literal = || -> Result<&str, ValidationError> {
        match &spec.data {
            Some(DataSpec::Literal(text)) => Ok(text),
            Some(DataSpec::Parameter(name)) => parameters
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| ValidationError::UnboundParameter(name.clone())),
            Some(_) => Err(ValidationError::InvalidData(format!(
                "{} requires literal data",
                kind_name
            ))),
            None => Err(ValidationError::DataRequired(kind_name)),
        }
    };
    let resolve = |target: Target<'_>| -> Result<Data, ValidationError> {
        let spec = spec
            .data
            .as_ref()
            .ok_or(ValidationError::DataRequired(kind_name))?;
        Data::resolve(spec, parameters, target, &ctx.sources)
    };

    match (kind_name, descriptor) {
        ("READ", Some(_)) => {
            forbid_data(kind_name, spec)?;
            Ok((OperationKind::Read, None))
        }
        ("DELETE", Some(d)) => {
            forbid_data(kind_name, spec)?;
            writable(d)?;
            Ok((OperationKind::Delete, None))
        }
        ("CHECK", Some(d)) => {
            item_bank(d)?;
            parse_check(literal()?)?;
            Ok((OperationKind::Check, None))
        }
        ("INITIALIZE", Some(d)) => {
            item_bank(d)?;
            let init = InitDirective::parse(literal()?)?;
            match (d.bank(), init.afi) {
                (BANK_EPC, None) => Err(ValidationError::InvalidData(
                    "initializing the EPC bank requires an AFI".into(),
                )),
                (BANK_USER, Some(_)) => Err(ValidationError::InvalidData(
                    "initializing the user bank takes no AFI".into(),
                )),
                _ => Ok((OperationKind::Initialize(init), None)),
            }
        }
        ("ADD", Some(d)) | ("WRITE", Some(d)) => {
            writable(d)?;
            let data = resolve(Target::Field(d))?;
            let kind = if kind_name == "ADD" {
                OperationKind::Add
            } else {
                OperationKind::Write
            };
            Ok((kind, Some(data)))
        }
        ("LOCK", Some(d)) => {
            if !lockable(d) {
                return Err(ValidationError::InvalidData(format!(
                    "field '{}' cannot be locked",
                    d.name
                )));
            }
            let lock = LockType::parse(literal()?)?;
            Ok((OperationKind::Lock(lock), None))
        }
        ("PASSWORD", None) => Ok((OperationKind::Password, Some(resolve(Target::Password)?))),
        ("KILL", None) => Ok((OperationKind::Kill, Some(resolve(Target::Password)?))),
        ("CUSTOM", None) => Ok((OperationKind::Custom, Some(resolve(Target::Custom)?))),
        (other, _) => Err(ValidationError::UnknownOperation(other.to_string())),
    }
}

fn forbid_data(kind_name: &'static str, spec: &OperationSpec) -> Result<(), ValidationError> {
    match spec.data {
        Some(_) => Err(ValidationError::DataForbidden(kind_name)),
        None => Ok(()),
    }
}

/// Field addressable by Add/Write/Delete.
fn writable(descriptor: &FieldDescriptor) -> Result<(), ValidationError> {
    match &descriptor.oid {
        Some(oid) if oid.is_pattern() => Err(ValidationError::InvalidData(format!(
            "field '{}' is a pattern",
            descriptor.name
        ))),
        Some(_) => Ok(()),
        None if descriptor.is_epc() || descriptor.field.length > 0 => Ok(()),
        None => Err(ValidationError::InvalidData(format!(
            "field '{}' has no fixed length",
            descriptor.name
        ))),
    }
}

/// Whole EPC or user bank.
fn item_bank(descriptor: &FieldDescriptor) -> Result<(), ValidationError> {
    if descriptor.is_bank() && matches!(descriptor.bank(), BANK_EPC | BANK_USER) {
        Ok(())
    } else {
        Err(ValidationError::InvalidData(format!(
            "field '{}' is not the EPC or user bank",
            descriptor.name
        )))
    }
}

fn lockable(descriptor: &FieldDescriptor) -> bool {
    let f = descriptor.field;
    let password = f.bank == BANK_RESERVED
        && f.length == PASSWORD_BITS
        && (f.offset == 0 || f.offset == PASSWORD_BITS);
    let bank = descriptor.is_bank() && matches!(f.bank, BANK_EPC | BANK_TID | BANK_USER);
    password || bank
}

/// Decode a read payload for display.
fn render(descriptor: &FieldDescriptor, data: &[u8], ctx: &Context) -> Result<String, ResultState> {
    if let Some(oid) = &descriptor.oid {
        let item = item::decode(descriptor.bank(), data, ctx)?;
        return item
            .entries
            .into_iter()
            .find(|e| oid.matches(&e.oid))
            .map(|e| e.value)
            .ok_or(ResultState::FieldNotFoundError);
    }
    if descriptor.is_epc() {
        // read starts at the PC word
        let words = data.first().map(|pc| usize::from(pc >> 3)).unwrap_or(0);
        return data
            .get(2..2 + words * 2)
            .map(bits::to_hex)
            .ok_or(ResultState::MemoryCheckError);
    }
    let length = descriptor.field.length;
    if length == 0 {
        return Ok(bits::to_hex(data));
    }
    let value = Bytes::new(data.to_vec(), length);
    match (descriptor.datatype, descriptor.format) {
        (Datatype::Uint, Format::Decimal) => value
            .to_uint()
            .map(|v| v.to_string())
            .ok_or(ResultState::OutOfRangeError),
        (Datatype::Uint, _) => value
            .to_uint()
            .map(|v| format!("x{:X}", v))
            .ok_or(ResultState::OutOfRangeError),
        _ => Ok(value.to_hex()),
    }
}

/// Integrity check of a whole-bank read.
fn check(bank: u8, data: &[u8], ctx: &Context) -> ResultState {
    if bank == BANK_EPC {
        match EpcBank::new(data) {
            Some(epc) if epc.toggle() && epc.afi() != 0 => {}
            _ => return ResultState::MemoryCheckError,
        }
    }
    let Some(payload) = iso::bank_payload(bank, data) else {
        return ResultState::MemoryCheckError;
    };
    match ctx.codec.decode(bank, payload) {
        Ok(item) if !item.has_duplicates() => ResultState::Success,
        _ => ResultState::MemoryCheckError,
    }
}
