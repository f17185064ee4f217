// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operation data: resolution of [`DataSpec`] into [`Data`] and the named
//! caches and random sources data may draw from.

use crate::bits::Bytes;
use crate::error::ValidationError;
use crate::field::{Datatype, FieldDescriptor, Format};
use crate::result::ResultState;
use crate::spec::DataSpec;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Bits drawn for random data aimed at an open-ended field.
const RANDOM_DEFAULT_BITS: u16 = 96;

/// What a piece of data is resolved against.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Field(&'a FieldDescriptor),
    Password,
    Custom,
}

/// Resolved operation data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Data {
    Bytes(Bytes),
    Characters(String),
    Uint(u128),
    Cache(String),
    Random(String),
}

impl Data {
    /// Resolve a data spec against parameters and its target.
    ///
    /// Caches and random sources are acquired here and must be given back
    /// with [`Data::release`].
    pub fn resolve(
        spec: &DataSpec,
        parameters: &HashMap<String, String>,
        target: Target<'_>,
        sources: &DataSources,
    ) -> Result<Self, ValidationError> {
        match spec {
            DataSpec::Literal(text) => {
                if matches!(target, Target::Custom) {
                    return Err(ValidationError::InvalidData(
                        "literal data is not supported for custom operations".into(),
                    ));
                }
                Self::from_text(text, target)
            }
            DataSpec::Parameter(name) => {
                let text = parameters
                    .get(name)
                    .ok_or_else(|| ValidationError::UnboundParameter(name.clone()))?;
                Self::from_text(text, target)
            }
            DataSpec::Cache(name) => {
                if matches!(target, Target::Custom) {
                    return Err(ValidationError::InvalidData(
                        "cache data is not supported for custom operations".into(),
                    ));
                }
                sources.acquire_cache(name)?;
                Ok(Self::Cache(name.clone()))
            }
            DataSpec::Random(name) => {
                if matches!(target, Target::Custom) {
                    return Err(ValidationError::InvalidData(
                        "random data is not supported for custom operations".into(),
                    ));
                }
                sources.acquire_random(name)?;
                Ok(Self::Random(name.clone()))
            }
            DataSpec::Bytes { data, length } => {
                let bytes = Bytes::from_hex(data)
                    .filter(|b| b.length() >= *length)
                    .ok_or_else(|| {
                        ValidationError::InvalidData(format!(
                            "'{}' does not hold {} bits",
                            data, length
                        ))
                    })?;
                let bytes = Bytes::new(bytes.data().to_vec(), *length);
                match target {
                    Target::Password => bytes.to_uint().map(Self::Uint).ok_or_else(|| {
                        ValidationError::InvalidData("password wider than 128 bits".into())
                    }),
                    Target::Field(field) if field.is_variable() => Err(
                        ValidationError::InvalidData("raw bytes cannot address item data".into()),
                    ),
                    _ => Ok(Self::Bytes(bytes)),
                }
            }
        }
    }

    fn from_text(text: &str, target: Target<'_>) -> Result<Self, ValidationError> {
        match target {
            Target::Field(field) if field.is_variable() => Ok(Self::Characters(text.to_string())),
            Target::Field(field) => encode_value(field, text).map(Self::Bytes),
            Target::Password => parse_uint(text)
                .map(Self::Uint)
                .ok_or_else(|| ValidationError::InvalidData(format!("'{}' is not a number", text))),
            Target::Custom => Bytes::from_hex(text)
                .map(Self::Bytes)
                .ok_or_else(|| ValidationError::InvalidData(format!("'{}' is not hex", text))),
        }
    }

    /// Byte payload for a fixed field, drawing from caches when needed.
    pub fn bytes(
        &self,
        field: Option<&FieldDescriptor>,
        sources: &DataSources,
    ) -> Result<Bytes, ResultState> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Uint(value) => {
                let width = field.map(|f| f.field.length).unwrap_or(128);
                Bytes::from_uint(*value, width).ok_or(ResultState::OutOfRangeError)
            }
            Self::Cache(name) => {
                let text = sources
                    .next_cache(name)
                    .ok_or(ResultState::EpcCacheDepletedError)?;
                match field {
                    Some(field) => {
                        encode_value(field, &text).map_err(|_| ResultState::OutOfRangeError)
                    }
                    None => Bytes::from_hex(&text).ok_or(ResultState::OutOfRangeError),
                }
            }
            Self::Random(_) => {
                let length = field
                    .map(|f| f.field.length)
                    .filter(|l| *l > 0)
                    .unwrap_or(RANDOM_DEFAULT_BITS);
                let mut data = vec![0u8; crate::bits::byte_len(length)];
                fastrand::fill(&mut data);
                Ok(Bytes::new(data, length))
            }
            Self::Characters(_) => Err(ResultState::MiscErrorTotal),
        }
    }

    /// Logical value for an item-data field.
    pub fn characters(&self, sources: &DataSources) -> Result<String, ResultState> {
        match self {
            Self::Characters(text) => Ok(text.clone()),
            Self::Cache(name) => sources
                .next_cache(name)
                .ok_or(ResultState::EpcCacheDepletedError),
            Self::Random(_) => Ok(fastrand::u64(..).to_string()),
            Self::Uint(value) => Ok(value.to_string()),
            Self::Bytes(bytes) => Ok(bytes.to_hex()),
        }
    }

    /// Unsigned value for passwords.
    pub fn uint(&self, sources: &DataSources) -> Result<u128, ResultState> {
        match self {
            Self::Uint(value) => Ok(*value),
            Self::Bytes(bytes) => bytes.to_uint().ok_or(ResultState::PasswordOutOfRangeError),
            Self::Cache(name) => {
                let text = sources
                    .next_cache(name)
                    .ok_or(ResultState::EpcCacheDepletedError)?;
                parse_uint(&text).ok_or(ResultState::PasswordOutOfRangeError)
            }
            Self::Random(_) => Ok(u128::from(fastrand::u32(..))),
            Self::Characters(text) => {
                parse_uint(text).ok_or(ResultState::PasswordOutOfRangeError)
            }
        }
    }

    /// Give back resources acquired by [`Data::resolve`].
    pub fn release(&self, sources: &DataSources) {
        match self {
            Self::Cache(name) => sources.release_cache(name),
            Self::Random(name) => sources.release_random(name),
            _ => {}
        }
    }
}

/// Parse decimal, or hex with an `x` prefix.
pub fn parse_uint(text: &str) -> Option<u128> {
    match text.strip_prefix('x') {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Encode literal text for a fixed field.
pub fn encode_value(field: &FieldDescriptor, text: &str) -> Result<Bytes, ValidationError> {
    let invalid = |why: &str| {
        ValidationError::InvalidData(format!("'{}' for field '{}': {}", text, field.name, why))
    };
    match field.datatype {
        Datatype::Epc => {
            let bytes = Bytes::from_hex(text).ok_or_else(|| invalid("not hex"))?;
            if bytes.length() % 16 != 0 {
                return Err(invalid("EPC must be a whole number of words"));
            }
            Ok(bytes)
        }
        Datatype::Uint => {
            let value = match field.format {
                Format::Decimal => text.parse::<u128>().ok(),
                Format::Hex => u128::from_str_radix(text.strip_prefix('x').unwrap_or(text), 16).ok(),
                Format::String => None,
            };
            value
                .and_then(|v| uint_bytes(field, v))
                .ok_or_else(|| invalid("not a value for this field"))
        }
        Datatype::Bits => {
            let bytes = Bytes::from_hex(text).ok_or_else(|| invalid("not hex"))?;
            let length = field.field.length;
            if length == 0 {
                return Ok(bytes);
            }
            if bytes.length() > length {
                return Err(invalid("wider than field"));
            }
            Ok(Bytes::new(bytes.data().to_vec(), length))
        }
        Datatype::Iso => Err(invalid("item data is not fixed")),
    }
}

fn uint_bytes(field: &FieldDescriptor, value: u128) -> Option<Bytes> {
    let width = match field.field.length {
        0 => (128 - value.leading_zeros() as u16).max(1).div_ceil(8) * 8,
        width => width,
    };
    Bytes::from_uint(value, width)
}

struct CacheSlot {
    values: VecDeque<String>,
    uses: usize,
}

/// Named EPC caches and random sources.
#[derive(Default)]
pub struct DataSources {
    caches: Mutex<HashMap<String, CacheSlot>>,
    randoms: Mutex<HashMap<String, usize>>,
}

impl DataSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a cache, or replace the values of an existing one.
    pub fn define_cache<I, S>(&self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: VecDeque<String> = values.into_iter().map(Into::into).collect();
        let mut caches = self.caches.lock();
        caches
            .entry(name.into())
            .and_modify(|slot| slot.values = values.clone())
            .or_insert(CacheSlot { values, uses: 0 });
    }

    /// Append values to a cache. Returns `false` for an unknown cache.
    pub fn replenish<I, S>(&self, name: &str, values: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.caches.lock().get_mut(name) {
            Some(slot) => {
                slot.values.extend(values.into_iter().map(Into::into));
                true
            }
            None => false,
        }
    }

    pub fn define_random(&self, name: impl Into<String>) {
        self.randoms.lock().entry(name.into()).or_insert(0);
    }

    pub fn cache_len(&self, name: &str) -> Option<usize> {
        self.caches.lock().get(name).map(|s| s.values.len())
    }

    pub fn cache_uses(&self, name: &str) -> Option<usize> {
        self.caches.lock().get(name).map(|s| s.uses)
    }

    pub fn random_uses(&self, name: &str) -> Option<usize> {
        self.randoms.lock().get(name).copied()
    }

    fn acquire_cache(&self, name: &str) -> Result<(), ValidationError> {
        let mut caches = self.caches.lock();
        let slot = caches
            .get_mut(name)
            .ok_or_else(|| ValidationError::UnknownCache(name.to_string()))?;
        slot.uses += 1;
        Ok(())
    }

    fn acquire_random(&self, name: &str) -> Result<(), ValidationError> {
        let mut randoms = self.randoms.lock();
        let uses = randoms
            .get_mut(name)
            .ok_or_else(|| ValidationError::UnknownRandom(name.to_string()))?;
        *uses += 1;
        Ok(())
    }

    fn release_cache(&self, name: &str) {
        if let Some(slot) = self.caches.lock().get_mut(name) {
            slot.uses = slot.uses.saturating_sub(1);
        }
    }

    fn release_random(&self, name: &str) {
        if let Some(uses) = self.randoms.lock().get_mut(name) {
            *uses = uses.saturating_sub(1);
        }
    }

    fn next_cache(&self, name: &str) -> Option<String> {
        self.caches
            .lock()
            .get_mut(name)
            .and_then(|slot| slot.values.pop_front())
    }
}
