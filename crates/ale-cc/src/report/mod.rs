// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reports: filtered operation sets and their rendering.
//!
//! - [`Report`] - one report spec compiled: filter, operations, statistics
//! - [`Reports`] - every report of a cycle plus the delivery worker
//! - [`envelope`] - what subscribers receive

pub mod envelope;
mod reports;

pub use reports::{CycleInfo, Reports, UNDEFINE};

use crate::context::Context;
use crate::error::ValidationError;
use crate::filter::Filter;
use crate::operation::{Execution, IdSequence, OperationKind, TagOperation};
use crate::reader::ReaderOperation;
use crate::result::{OperationResult, ResultState};
use crate::spec::ReportSpec;
use crate::stats::StatProfile;
use crate::tag::Tag;
use envelope::{CommandReport, TagReport};
use std::collections::{HashMap, HashSet};

/// One compiled report.
#[derive(Debug)]
pub struct Report {
    name: String,
    filter: Filter,
    operations: Vec<TagOperation>,
    stats: Vec<StatProfile>,
    report_if_empty: bool,
}

impl Report {
    /// Compile `spec`, taking ids from `ids`. Errors carry the report name.
    pub fn compile(
        spec: &ReportSpec,
        parameters: &HashMap<String, String>,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Self, ValidationError> {
        Self::build(spec, parameters, ctx, ids).map_err(|e| e.in_report(spec.name.clone()))
    }

    fn build(
        spec: &ReportSpec,
        parameters: &HashMap<String, String>,
        ctx: &Context,
        ids: &mut IdSequence,
    ) -> Result<Self, ValidationError> {
        if spec.name.trim().is_empty() {
            return Err(ValidationError::InvalidName(
                "report name must not be empty".into(),
            ));
        }
        let stats = spec
            .stats
            .iter()
            .map(|name| StatProfile::parse(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = Self {
            name: spec.name.clone(),
            filter: Filter::compile(&spec.filter, ctx, ids)?,
            operations: Vec::with_capacity(spec.operations.len()),
            stats,
            report_if_empty: spec.report_if_empty,
        };

        let mut names = HashSet::new();
        for operation in &spec.operations {
            let compiled = match operation.name.as_deref().filter(|n| !n.is_empty()) {
                Some(name) if !names.insert(name) => Err(ValidationError::DuplicateName(
                    name.to_string(),
                )
                .in_operation(name)),
                _ => TagOperation::compile(operation, parameters, ctx, ids),
            };
            match compiled {
                Ok(op) => report.operations.push(op),
                Err(e) => {
                    report.dispose(ctx);
                    return Err(e);
                }
            }
        }
        Ok(report)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn operations(&self) -> &[TagOperation] {
        &self.operations
    }

    pub fn report_if_empty(&self) -> bool {
        self.report_if_empty
    }

    /// Filter reads followed by the operations' base reads.
    pub fn reads(&self) -> Vec<ReaderOperation> {
        let mut reads = self.filter.reads();
        reads.extend(self.operations.iter().filter_map(TagOperation::base_read_operation));
        reads
    }

    /// Execute every operation on `tag` in id order, appending what the
    /// reader must run to `out`.
    ///
    /// After a fault the remaining operations are faulted without running.
    /// A memory image left by a write replaces the base read of every later
    /// operation reading the same window.
    pub fn tag_operations(&self, tag: &mut Tag, out: &mut Vec<ReaderOperation>, ctx: &Context) {
        let mut faulted = false;
        for (index, op) in self.operations.iter().enumerate() {
            if faulted {
                tag.set_result(op.id(), OperationResult::fault(ResultState::MiscErrorTotal));
                continue;
            }
            match op.execute(tag, out.as_slice(), ctx) {
                Execution::Emit { operation, image } => {
                    tag.set_pending(op.id());
                    out.push(operation);
                    let Some(image) = image else {
                        continue;
                    };
                    for later in &self.operations[index + 1..] {
                        let virtual_read = || OperationResult::VirtualRead {
                            state: ResultState::Success,
                            data: image.data.clone(),
                        };
                        if let (Some(read_id), Some(field)) = (later.read_id(), later.base_read()) {
                            if field == image.field {
                                tag.set_result(read_id, virtual_read());
                            }
                        }
                        if later.kind() == OperationKind::Read
                            && later.read_window() == Some(image.field)
                        {
                            tag.set_result(later.id(), virtual_read());
                        }
                    }
                }
                Execution::Resolved(result) => {
                    if result.is_fault() {
                        tracing::trace!(
                            report = %self.name,
                            operation = op.id(),
                            tag = %tag.id_string(),
                            state = ?result.state(),
                            "Operation faulted"
                        );
                        faulted = true;
                    }
                    tag.set_result(op.id(), result);
                }
            }
        }
    }

    /// True when every operation finished on `tag`.
    pub fn is_completed(&self, tag: &Tag) -> bool {
        self.operations
            .iter()
            .all(|op| op.is_completed(tag.result(op.id())))
    }

    /// Render the tags that pass the filter.
    pub fn render(&self, tags: &[Tag], ctx: &Context) -> CommandReport {
        let tags = tags
            .iter()
            .filter(|tag| self.filter.matches(tag))
            .map(|tag| TagReport {
                id: tag.id_string(),
                operations: self.operations.iter().map(|op| op.report(tag, ctx)).collect(),
                stats: self.stats.iter().map(|profile| profile.stat(tag)).collect(),
            })
            .collect();
        CommandReport {
            name: self.name.clone(),
            tags,
        }
    }

    /// Release the filter and every operation. Later calls do nothing.
    pub fn dispose(&mut self, ctx: &Context) {
        self.filter.dispose(ctx);
        for op in &mut self.operations {
            op.dispose(ctx);
        }
    }
}
