// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report tag filter.
//!
//! Patterns are globs (`*`, `?`) over the upper-case hex value of a field.
//! Without a field the tag's EPC is matched, which needs no read. A tag
//! passes when it matches at least one include pattern (if any exist) and
//! no exclude pattern.

use crate::bits::to_hex;
use crate::context::Context;
use crate::error::ValidationError;
use crate::field::{FieldDescriptor, FieldHandle};
use crate::operation::IdSequence;
use crate::reader::ReaderOperation;
use crate::result::OperationResult;
use crate::spec::{FilterMode, FilterPatternSpec, FilterSpec};
use crate::tag::Tag;
use regex::Regex;

#[derive(Debug)]
struct FieldRead {
    handle: FieldHandle,
    descriptor: FieldDescriptor,
    read_id: u16,
}

#[derive(Debug)]
struct Pattern {
    mode: FilterMode,
    glob: Regex,
    field: Option<FieldRead>,
}

impl Pattern {
    /// Value the pattern is matched against; `None` when unreadable.
    fn value(&self, tag: &Tag) -> Option<String> {
        match &self.field {
            None => Some(tag.id_string()),
            Some(read) => tag
                .result(read.read_id)
                .and_then(OperationResult::read_data)
                .map(to_hex),
        }
    }
}

/// Compiled filter of one report.
#[derive(Debug, Default)]
pub struct Filter {
    patterns: Vec<Pattern>,
    disposed: bool,
}

impl Filter {
    /// Compile `spec`, reserving one read id per field pattern.
    pub fn compile(
        spec: &FilterSpec,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Self, ValidationError> {
        let mut filter = Self::default();
        for pattern in &spec.patterns {
            match Self::pattern(pattern, ctx, ids) {
                Ok(p) => filter.patterns.push(p),
                Err(e) => {
                    filter.dispose(ctx);
                    return Err(e);
                }
            }
        }
        Ok(filter)
    }

    fn pattern(
        spec: &FilterPatternSpec,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Pattern, ValidationError> {
        let glob = spec.pattern.to_ascii_uppercase();
        let valid = !glob.is_empty()
            && glob
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == '*' || c == '?');
        if !valid {
            return Err(ValidationError::InvalidFilter(format!(
                "'{}' is not a hex glob",
                spec.pattern
            )));
        }

        let field = match &spec.field {
            None => None,
            Some(name) => {
                let (handle, descriptor) = ctx.fields.acquire(name)?;
                if descriptor.is_variable() {
                    ctx.fields.release(handle);
                    return Err(ValidationError::InvalidFilter(format!(
                        "field '{}' addresses item data",
                        name
                    )));
                }
                if descriptor.is_epc() {
                    // matched against the tag identity
                    ctx.fields.release(handle);
                    None
                } else {
                    let read_id = match ids.next_id() {
                        Ok(id) => id,
                        Err(e) => {
                            ctx.fields.release(handle);
                            return Err(e);
                        }
                    };
                    Some(FieldRead {
                        handle,
                        descriptor,
                        read_id,
                    })
                }
            }
        };

        Ok(Pattern {
            mode: spec.mode,
            glob: compile_glob(&glob)?,
            field,
        })
    }

    /// Reads the filter needs, for the merged reader batch.
    pub fn reads(&self) -> Vec<ReaderOperation> {
        self.patterns
            .iter()
            .filter_map(|p| p.field.as_ref())
            .map(|f| ReaderOperation::read(f.read_id, f.descriptor.field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True when `tag` passes the filter.
    pub fn matches(&self, tag: &Tag) -> bool {
        let mut included = None;
        for pattern in &self.patterns {
            let Some(value) = pattern.value(tag) else {
                return false;
            };
            let hit = pattern.glob.is_match(&value);
            match pattern.mode {
                FilterMode::Exclude if hit => return false,
                FilterMode::Exclude => {}
                FilterMode::Include => *included.get_or_insert(false) |= hit,
            }
        }
        included.unwrap_or(true)
    }

    /// Give back the fields. Later calls do nothing.
    pub fn dispose(&mut self, ctx: &Context) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for pattern in &self.patterns {
            if let Some(read) = &pattern.field {
                ctx.fields.release(read.handle);
            }
        }
    }
}

/// Anchored regex for a hex glob. Runs of `*` collapse into one.
fn compile_glob(glob: &str) -> Result<Regex, ValidationError> {
    let mut expr = String::with_capacity(glob.len() + 2);
    expr.push('^');
    let mut star = false;
    for c in glob.chars() {
        match c {
            '*' if star => continue,
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push(c),
        }
        star = c == '*';
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| ValidationError::InvalidFilter(format!("'{}': {}", glob, e)))
}
