// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory reader.
//!
//! [`MemoryReader`] implements [`ReaderConnector`] over simulated Gen2 tags
//! so cycles can run without hardware. Each tag keeps four memory banks;
//! its identity is derived from the EPC bank on every round, so a written
//! EPC shows up under its new key on the next round.
//!
//! Populations load from TOML:
//!
//! ```toml
//! [[tags]]
//! epc = "300833B2DDD9014000000001"
//! tid = "E2801160"
//! user = "03"
//! user_words = 32
//! access_password = 0x1234
//! rssi = -58
//! ```

use crate::bits::{self, Bytes};
use crate::config::ConfigError;
use crate::error::ReaderError;
use crate::iso::PC_MAX_WORDS;
use crate::reader::{
    Field, ReaderConnector, ReaderOperation, ReaderOperationKind, BANK_EPC, BANK_RESERVED,
    PASSWORD_BITS,
};
use crate::result::{OperationResult, ResultState};
use crate::tag::{Sighting, Tag, TagKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const LOCK_SECURED: u8 = 2;
const PERMA_UNLOCK: u8 = 1;
const PERMA_LOCK: u8 = 3;

/// One tag of a population file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    /// EPC in hex.
    pub epc: String,
    #[serde(default)]
    pub tid: String,
    /// Initial user memory in hex.
    #[serde(default)]
    pub user: String,
    /// User bank size in words; defaults to the initial content.
    #[serde(default)]
    pub user_words: Option<usize>,
    /// Spare EPC bank words after the EPC.
    #[serde(default)]
    pub epc_spare_words: usize,
    #[serde(default)]
    pub kill_password: u32,
    #[serde(default)]
    pub access_password: u32,
    #[serde(default = "default_antenna")]
    pub antenna: u16,
    #[serde(default)]
    pub rssi: Option<i16>,
}

fn default_antenna() -> u16 {
    1
}

/// Tag population file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Population {
    #[serde(default)]
    pub tags: Vec<TagSpec>,
}

impl Population {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

fn decode_hex(what: &str, text: &str) -> Result<Vec<u8>, ConfigError> {
    hex::decode(text).map_err(|e| ConfigError::Invalid(format!("{} '{}': {}", what, text, e)))
}

/// Simulated tag memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryTag {
    banks: [Vec<u8>; 4],
    locks: HashMap<Field, u8>,
    killed: bool,
    antenna: u16,
    rssi: Option<i16>,
}

impl MemoryTag {
    pub fn from_spec(spec: &TagSpec) -> Result<Self, ConfigError> {
        let epc = decode_hex("epc", &spec.epc)?;
        if epc.len() % 2 != 0 || epc.len() / 2 > PC_MAX_WORDS {
            return Err(ConfigError::Invalid(format!(
                "epc '{}' must be whole words, at most {}",
                spec.epc, PC_MAX_WORDS
            )));
        }
        let mut epc_bank = vec![0x00, 0x00, ((epc.len() / 2) as u8) << 3, 0x00];
        epc_bank.extend_from_slice(&epc);
        epc_bank.resize(epc_bank.len() + spec.epc_spare_words * 2, 0);

        let mut user = decode_hex("user", &spec.user)?;
        let user_bytes = spec.user_words.map_or(user.len(), |w| w * 2);
        if user.len() > user_bytes {
            return Err(ConfigError::Invalid(format!(
                "user memory exceeds {} words",
                user_bytes / 2
            )));
        }
        user.resize(user_bytes + user_bytes % 2, 0);

        let mut reserved = Vec::with_capacity(8);
        reserved.extend_from_slice(&spec.kill_password.to_be_bytes());
        reserved.extend_from_slice(&spec.access_password.to_be_bytes());

        Ok(Self {
            banks: [reserved, epc_bank, decode_hex("tid", &spec.tid)?, user],
            locks: HashMap::new(),
            killed: false,
            antenna: spec.antenna,
            rssi: spec.rssi,
        })
    }

    /// Contents of a bank.
    pub fn bank(&self, bank: u8) -> Option<&[u8]> {
        self.banks.get(usize::from(bank)).map(Vec::as_slice)
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn lock_state(&self, field: &Field) -> Option<u8> {
        self.locks.get(field).copied()
    }

    /// Identity as found in memory right now.
    pub fn key(&self) -> TagKey {
        let epc_bank = &self.banks[usize::from(BANK_EPC)];
        let words = epc_bank.get(2).map_or(0, |pc| usize::from(pc >> 3));
        let epc = epc_bank.get(4..4 + words * 2).unwrap_or(&[]).to_vec();
        let tid = &self.banks[2];
        let key = TagKey::new(epc);
        if tid.is_empty() {
            key
        } else {
            key.with_tid(tid.clone())
        }
    }

    fn password(&self, offset: u16) -> u32 {
        let value = bits::extract(
            &self.banks[usize::from(BANK_RESERVED)],
            usize::from(offset),
            PASSWORD_BITS,
        );
        value.to_uint().and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
    }

    fn access_password(&self) -> u32 {
        self.password(PASSWORD_BITS)
    }

    fn kill_password(&self) -> u32 {
        self.password(0)
    }

    /// Locks that guard `field`: its bank, or the exact password word.
    fn guarding_lock(&self, field: &Field) -> Option<u8> {
        if field.bank == BANK_RESERVED {
            [0, PASSWORD_BITS]
                .into_iter()
                .map(|offset| Field::new(BANK_RESERVED, offset, PASSWORD_BITS))
                .filter(|pwd| overlaps(pwd, field))
                .filter_map(|pwd| self.lock_state(&pwd))
                .max()
        } else {
            self.lock_state(&Field::bank(field.bank))
        }
    }

    fn window(&self, field: &Field) -> Option<(usize, u16)> {
        let bank_bits = self.bank(field.bank)?.len() * 8;
        let offset = usize::from(field.offset);
        let length = if field.length == 0 {
            u16::try_from(bank_bits.checked_sub(offset)?).ok()?
        } else {
            field.length
        };
        (offset + usize::from(length) <= bank_bits).then_some((offset, length))
    }

    fn read(&self, field: &Field, secured: bool) -> OperationResult {
        let fault = |state| OperationResult::Read { state, data: Vec::new() };
        if field.bank == BANK_RESERVED
            && self.guarding_lock(field).is_some_and(|l| l >= LOCK_SECURED)
            && (!secured || self.guarding_lock(field) == Some(PERMA_LOCK))
        {
            return fault(ResultState::PermissionError);
        }
        let Some((offset, length)) = self.window(field) else {
            return fault(ResultState::MemoryOverflowError);
        };
        let bank = &self.banks[usize::from(field.bank)];
        OperationResult::Read {
            state: ResultState::Success,
            data: bits::extract(bank, offset, length).data().to_vec(),
        }
    }

    fn write(&mut self, field: &Field, data: &[u8], secured: bool) -> OperationResult {
        let fault = |state| OperationResult::Write { state, words_written: 0 };
        if field.offset % bits::WORD_BITS != 0 || field.length % bits::WORD_BITS != 0 {
            return fault(ResultState::OpNotPossibleError);
        }
        match self.guarding_lock(field) {
            Some(PERMA_LOCK) => return fault(ResultState::PermissionError),
            Some(lock) if lock >= LOCK_SECURED && !secured => {
                return fault(ResultState::PermissionError)
            }
            _ => {}
        }
        let Some((offset, length)) = self.window(field) else {
            return fault(ResultState::MemoryOverflowError);
        };
        let bank = &mut self.banks[usize::from(field.bank)];
        bits::place(bank, offset, &Bytes::new(data.to_vec(), length));
        OperationResult::Write {
            state: ResultState::Success,
            words_written: length / bits::WORD_BITS,
        }
    }

    fn lock(&mut self, field: &Field, privilege: u8, secured: bool) -> OperationResult {
        let current = self.lock_state(field);
        let permanent = matches!(current, Some(PERMA_LOCK | PERMA_UNLOCK));
        let state = if !secured || (permanent && current != Some(privilege)) {
            ResultState::PermissionError
        } else {
            self.locks.insert(*field, privilege);
            ResultState::Success
        };
        OperationResult::Lock { state }
    }

    /// Run `operations` on this tag; `secured` tracks the access state.
    fn execute(&mut self, operations: &[ReaderOperation], tag: &mut Tag, secured: &mut bool) {
        for op in operations {
            if self.killed {
                tag.set_result(op.id, OperationResult::fault(ResultState::MiscErrorTotal));
                continue;
            }
            let result = match &op.kind {
                ReaderOperationKind::Read { field } => self.read(field, *secured),
                ReaderOperationKind::Write { field, data } => self.write(field, data, *secured),
                ReaderOperationKind::Password { password } => {
                    *secured = *password == self.access_password();
                    let state = if *secured {
                        ResultState::Success
                    } else {
                        ResultState::PasswordError
                    };
                    OperationResult::Password { state }
                }
                ReaderOperationKind::Kill { password } => {
                    let state = if *password != 0 && *password == self.kill_password() {
                        self.killed = true;
                        ResultState::Success
                    } else {
                        ResultState::PasswordError
                    };
                    OperationResult::Kill { state }
                }
                ReaderOperationKind::Lock { field, privilege } => {
                    self.lock(field, *privilege, *secured)
                }
                ReaderOperationKind::Custom { data, .. } => OperationResult::Custom {
                    state: ResultState::Success,
                    data: data.clone(),
                },
            };
            tag.set_result(op.id, result);
        }
    }
}

fn overlaps(a: &Field, b: &Field) -> bool {
    let a_end = a.end().unwrap_or(u16::MAX);
    let b_end = b.end().unwrap_or(u16::MAX);
    a.bank == b.bank && a.offset < b_end && b.offset < a_end
}

/// Reader over a set of in-memory tags.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    name: String,
    tags: Vec<MemoryTag>,
    connected: bool,
}

impl MemoryReader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            connected: true,
        }
    }

    pub fn with_population(
        name: impl Into<String>,
        population: &Population,
    ) -> Result<Self, ConfigError> {
        let mut reader = Self::new(name);
        for spec in &population.tags {
            reader.tags.push(MemoryTag::from_spec(spec)?);
        }
        Ok(reader)
    }

    pub fn insert(&mut self, tag: MemoryTag) {
        self.tags.push(tag);
    }

    /// Tags in the field, killed ones included.
    pub fn tags(&self) -> &[MemoryTag] {
        &self.tags
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl ReaderConnector for MemoryReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn inventory(
        &mut self,
        operations: &[ReaderOperation],
        inspect: &mut dyn FnMut(&mut Tag) -> Vec<ReaderOperation>,
    ) -> Result<Vec<Tag>, ReaderError> {
        if !self.connected {
            return Err(ReaderError::NotConnected(self.name.clone()));
        }
        let mut observed = Vec::new();
        for memory in self.tags.iter_mut().filter(|t| !t.killed) {
            let mut tag = Tag::new(memory.key());
            let mut sighting = Sighting::new(self.name.clone(), memory.antenna);
            if let Some(rssi) = memory.rssi {
                sighting = sighting.with_rssi(rssi);
            }
            tag.record_sighting(sighting);

            let mut secured = memory.access_password() == 0;
            memory.execute(operations, &mut tag, &mut secured);
            let follow_up = inspect(&mut tag);
            memory.execute(&follow_up, &mut tag, &mut secured);
            observed.push(tag);
        }
        tracing::trace!(reader = %self.name, observed = observed.len(), "Inventory round");
        Ok(observed)
    }
}
