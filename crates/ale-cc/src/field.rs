// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Field registry.
//!
//! Fields live in an arena addressed by [`FieldHandle`]. Every compiled
//! operation that references a field holds one use, taken with
//! [`FieldRegistry::acquire`] and given back with
//! [`FieldRegistry::release`]. Named fields cannot be undefined while in use.
//!
//! Besides named fields the registry understands generic addresses:
//!
//! - `@<bank>.<length>[.<offset>]`: fixed window, `uint`/`hex`;
//! - `@<bank>.urn:oid:<oid>`: ISO item-data element in bank 1 or 3, the
//!   last OID component may be `*`.

use crate::bits::fits_words;
use crate::error::ValidationError;
use crate::reader::{Field, BANK_EPC, BANK_RESERVED, BANK_TID, BANK_USER};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// The EPC itself; length follows the PC word.
    Epc,
    Uint,
    Bits,
    /// ISO 15962 item-data element.
    Iso,
}

/// Field rendering format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Hex,
    Decimal,
    String,
}

/// Object identifier, or pattern with a trailing `*` component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Parse `urn:oid:1.0.15961.9.1` or the bare dotted form.
    pub fn parse(text: &str) -> Option<Self> {
        let oid = text.strip_prefix("urn:oid:").unwrap_or(text);
        let mut parts = oid.split('.').peekable();
        let mut count = 0;
        while let Some(part) = parts.next() {
            count += 1;
            let last = parts.peek().is_none();
            let numeric = !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
            if !(numeric || (last && part == "*")) {
                return None;
            }
        }
        (count > 0).then(|| Self(oid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_pattern(&self) -> bool {
        self.0 == "*" || self.0.ends_with(".*")
    }

    pub fn matches(&self, oid: &str) -> bool {
        if self.0 == "*" {
            return true;
        }
        match self.0.strip_suffix('*') {
            Some(prefix) => oid.starts_with(prefix) && oid.len() > prefix.len(),
            None => self.0 == oid,
        }
    }
}

/// Resolved field definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub name: String,
    pub field: Field,
    pub datatype: Datatype,
    pub format: Format,
    /// Set for variable (item-data) fields.
    pub oid: Option<ObjectId>,
}

impl FieldDescriptor {
    pub fn fixed(name: impl Into<String>, field: Field, datatype: Datatype, format: Format) -> Self {
        Self {
            name: name.into(),
            field,
            datatype,
            format,
            oid: None,
        }
    }

    pub fn variable(name: impl Into<String>, bank: u8, oid: ObjectId) -> Self {
        Self {
            name: name.into(),
            field: Field::bank(bank),
            datatype: Datatype::Iso,
            format: Format::String,
            oid: Some(oid),
        }
    }

    pub fn bank(&self) -> u8 {
        self.field.bank
    }

    pub fn is_variable(&self) -> bool {
        self.oid.is_some()
    }

    /// The EPC field: zero length, sized by the PC word.
    pub fn is_epc(&self) -> bool {
        self.datatype == Datatype::Epc
    }

    /// Whole-bank field (offset 0, open-ended) without item-data addressing.
    pub fn is_bank(&self) -> bool {
        !self.is_variable() && self.field.offset == 0 && self.field.length == 0
    }
}

/// Handle into the field arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(usize);

struct Slot {
    descriptor: FieldDescriptor,
    uses: usize,
    /// Generic address resolved on the fly; freed when unused.
    transient: bool,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    by_name: HashMap<String, usize>,
    free: Vec<usize>,
}

impl Inner {
    fn insert(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }
}

/// Arena of field definitions with use counting.
#[derive(Default)]
pub struct FieldRegistry {
    inner: Mutex<Inner>,
}

impl FieldRegistry {
    /// Empty registry; generic addresses still resolve.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the standard Gen2 fields.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let builtins = [
            FieldDescriptor::fixed("epc", Field::new(BANK_EPC, 32, 0), Datatype::Epc, Format::Hex),
            FieldDescriptor::fixed("killPwd", Field::new(BANK_RESERVED, 0, 32), Datatype::Uint, Format::Hex),
            FieldDescriptor::fixed("accessPwd", Field::new(BANK_RESERVED, 32, 32), Datatype::Uint, Format::Hex),
            FieldDescriptor::fixed("epcBank", Field::bank(BANK_EPC), Datatype::Bits, Format::Hex),
            FieldDescriptor::fixed("tidBank", Field::bank(BANK_TID), Datatype::Bits, Format::Hex),
            FieldDescriptor::fixed("userBank", Field::bank(BANK_USER), Datatype::Bits, Format::Hex),
            FieldDescriptor::fixed("afi", Field::new(BANK_EPC, 24, 8), Datatype::Uint, Format::Hex),
            FieldDescriptor::fixed("nsi", Field::new(BANK_EPC, 23, 9), Datatype::Uint, Format::Hex),
        ];
        {
            let mut inner = registry.inner.lock();
            for descriptor in builtins {
                let name = descriptor.name.clone();
                let index = inner.insert(Slot {
                    descriptor,
                    uses: 0,
                    transient: false,
                });
                inner.by_name.insert(name, index);
            }
        }
        registry
    }

    /// Define a named field.
    pub fn define(&self, descriptor: FieldDescriptor) -> Result<FieldHandle, ValidationError> {
        if descriptor.name.is_empty() || descriptor.name.starts_with('@') {
            return Err(ValidationError::InvalidName(format!(
                "field name '{}' is reserved",
                descriptor.name
            )));
        }
        if !fits_words(descriptor.field.offset, descriptor.field.length) {
            return Err(ValidationError::FieldOutOfRange(descriptor.name));
        }
        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(&descriptor.name) {
            return Err(ValidationError::FieldDefined(descriptor.name));
        }
        let name = descriptor.name.clone();
        let index = inner.insert(Slot {
            descriptor,
            uses: 0,
            transient: false,
        });
        inner.by_name.insert(name, index);
        Ok(FieldHandle(index))
    }

    /// Remove a named field that no operation uses.
    pub fn undefine(&self, name: &str) -> Result<(), ValidationError> {
        let mut inner = self.inner.lock();
        let index = *inner
            .by_name
            .get(name)
            .ok_or_else(|| ValidationError::UnknownField(name.to_string()))?;
        if inner.slots[index].as_ref().is_some_and(|s| s.uses > 0) {
            return Err(ValidationError::FieldInUse(name.to_string()));
        }
        inner.by_name.remove(name);
        inner.slots[index] = None;
        inner.free.push(index);
        Ok(())
    }

    /// Resolve a field name or generic address and take one use of it.
    pub fn acquire(&self, name: &str) -> Result<(FieldHandle, FieldDescriptor), ValidationError> {
        let mut inner = self.inner.lock();
        if let Some(&index) = inner.by_name.get(name) {
            if let Some(slot) = inner.slots[index].as_mut() {
                slot.uses += 1;
                return Ok((FieldHandle(index), slot.descriptor.clone()));
            }
        }
        let descriptor = parse_generic(name)?;
        let index = inner.insert(Slot {
            descriptor: descriptor.clone(),
            uses: 1,
            transient: true,
        });
        Ok((FieldHandle(index), descriptor))
    }

    /// Give back one use taken by [`FieldRegistry::acquire`].
    pub fn release(&self, handle: FieldHandle) {
        let mut inner = self.inner.lock();
        let free = match inner.slots.get_mut(handle.0).and_then(|s| s.as_mut()) {
            Some(slot) => {
                slot.uses = slot.uses.saturating_sub(1);
                slot.transient && slot.uses == 0
            }
            None => {
                tracing::warn!(handle = handle.0, "Release of unknown field handle");
                false
            }
        };
        if free {
            inner.slots[handle.0] = None;
            inner.free.push(handle.0);
        }
    }

    /// Use count of a named field.
    pub fn uses(&self, name: &str) -> Option<usize> {
        let inner = self.inner.lock();
        let index = *inner.by_name.get(name)?;
        inner.slots[index].as_ref().map(|s| s.uses)
    }

    /// Number of occupied arena slots.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_generic(name: &str) -> Result<FieldDescriptor, ValidationError> {
    let unknown = || ValidationError::UnknownField(name.to_string());
    let rest = name.strip_prefix('@').ok_or_else(unknown)?;
    let (bank, tail) = rest.split_once('.').ok_or_else(unknown)?;
    let bank: u8 = bank.parse().map_err(|_| unknown())?;
    if bank > BANK_USER {
        return Err(unknown());
    }

    if tail.starts_with("urn:oid:") {
        if bank != BANK_EPC && bank != BANK_USER {
            return Err(unknown());
        }
        let oid = ObjectId::parse(tail).ok_or_else(unknown)?;
        return Ok(FieldDescriptor::variable(name, bank, oid));
    }

    let mut parts = tail.split('.');
    let length: u16 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(unknown)?;
    let offset: u16 = match parts.next() {
        Some(p) => p.parse().map_err(|_| unknown())?,
        None => 0,
    };
    if parts.next().is_some() || length == 0 {
        return Err(unknown());
    }
    if !fits_words(offset, length) {
        return Err(ValidationError::FieldOutOfRange(name.to_string()));
    }
    Ok(FieldDescriptor::fixed(
        name,
        Field::new(bank, offset, length),
        Datatype::Uint,
        Format::Hex,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_resolve() {
        let registry = FieldRegistry::with_builtins();
        let (_, epc) = registry.acquire("epc").unwrap();
        assert!(epc.is_epc());
        assert_eq!(epc.field, Field::new(BANK_EPC, 32, 0));
        assert_eq!(registry.uses("epc"), Some(1));
    }

    #[test]
    fn test_acquire_release_counts() {
        let registry = FieldRegistry::with_builtins();
        let (a, _) = registry.acquire("killPwd").unwrap();
        let (b, _) = registry.acquire("killPwd").unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.uses("killPwd"), Some(2));
        registry.release(a);
        registry.release(b);
        assert_eq!(registry.uses("killPwd"), Some(0));
    }

    #[test]
    fn test_undefine_in_use_rejected() {
        let registry = FieldRegistry::new();
        registry
            .define(FieldDescriptor::fixed(
                "lot",
                Field::new(BANK_USER, 16, 16),
                Datatype::Uint,
                Format::Decimal,
            ))
            .unwrap();
        let (handle, _) = registry.acquire("lot").unwrap();
        assert!(matches!(
            registry.undefine("lot"),
            Err(ValidationError::FieldInUse(_))
        ));
        registry.release(handle);
        registry.undefine("lot").unwrap();
        assert!(registry.acquire("lot").is_err());
    }

    #[test]
    fn test_define_duplicate_rejected() {
        let registry = FieldRegistry::with_builtins();
        let err = registry
            .define(FieldDescriptor::fixed(
                "epc",
                Field::new(BANK_EPC, 32, 96),
                Datatype::Bits,
                Format::Hex,
            ))
            .unwrap_err();
        assert!(matches!(err, ValidationError::FieldDefined(_)));
    }

    #[test]
    fn test_generic_fixed_address() {
        let registry = FieldRegistry::new();
        let (handle, field) = registry.acquire("@3.12.20").unwrap();
        assert_eq!(field.field, Field::new(BANK_USER, 20, 12));
        assert_eq!(registry.len(), 1);
        registry.release(handle);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_generic_variable_address() {
        let registry = FieldRegistry::new();
        let (_, field) = registry.acquire("@3.urn:oid:1.0.15961.9.*").unwrap();
        assert!(field.is_variable());
        let oid = field.oid.unwrap();
        assert!(oid.is_pattern());
        assert!(oid.matches("1.0.15961.9.4"));
        assert!(!oid.matches("1.0.15961.10.4"));
        assert!(registry.acquire("@2.urn:oid:1.2").is_err());
        assert!(registry.acquire("@3.0").is_err());
        assert!(matches!(
            registry.acquire("@3.16.65519"),
            Err(ValidationError::FieldOutOfRange(_))
        ));
        assert!(registry.acquire("@3.16.65504").is_ok());
        assert!(registry.acquire("bogus").is_err());
    }

    #[test]
    fn test_object_id_parse() {
        assert!(ObjectId::parse("urn:oid:1.0.15961.9.1").is_some());
        assert!(ObjectId::parse("1.*.3").is_none());
        assert!(ObjectId::parse("1..3").is_none());
        let exact = ObjectId::parse("1.0.5").unwrap();
        assert!(!exact.is_pattern());
        assert!(exact.matches("1.0.5"));
        assert!(!exact.matches("1.0.50"));
    }
}
