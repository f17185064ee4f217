// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command cycle driver.
//!
//! Glue between a [`ReaderConnector`], the [`Tags`] container and
//! [`Reports`]. A cycle is `start`, any number of `round`s, then `complete`.
//! A tag is operated on once while it stays in the container; later
//! sightings only add statistics.

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::Result;
use crate::reader::{ReaderConnector, ReaderOperation};
use crate::report::{CycleInfo, Reports};
use crate::result::{OperationResult, ResultState};
use crate::spec::CycleSpec;
use crate::subscriber::Subscriber;
use crate::tag::{Tag, TagKey};
use crate::tags::Tags;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One defined command cycle.
#[derive(Debug)]
pub struct CommandCycle {
    reports: Reports,
    tags: Tags,
    started: Option<(DateTime<Utc>, Instant)>,
    rounds: u64,
}

impl CommandCycle {
    /// Compile `spec` and prepare an empty tag container.
    pub fn define(
        spec: CycleSpec,
        parameters: &HashMap<String, String>,
        ctx: Context,
        config: &EngineConfig,
    ) -> Result<Self> {
        let reports = Reports::new(spec, parameters, ctx, config)?;
        tracing::info!(
            cycle = %reports.name(),
            reports = reports.reports().len(),
            reads = reports.reads().len(),
            "Defined command cycle"
        );
        Ok(Self {
            reports,
            tags: Tags::new(&config.tags),
            started: None,
            rounds: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.reports.name()
    }

    pub fn reports(&self) -> &Reports {
        &self.reports
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.reports.subscribe(subscriber);
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.reports.unsubscribe(name)
    }

    /// Begin a cycle: evict expired and surplus tags, start the clock.
    pub fn start(&mut self) {
        self.tags.clear();
        self.started = Some((Utc::now(), Instant::now()));
        self.rounds = 0;
    }

    /// Run one inventory round. Returns the number of tags operated on.
    pub fn round(&mut self, reader: &mut dyn ReaderConnector) -> Result<usize> {
        if self.started.is_none() {
            self.start();
        }
        let tags = &self.tags;
        let reports = &self.reports;
        // tags operated on this round, as they stood when their batch left
        let mut fresh: HashMap<TagKey, Tag> = HashMap::new();

        let mut inspect = |tag: &mut Tag| -> Vec<ReaderOperation> {
            let key = tag.key().clone();
            if fresh.contains_key(&key) {
                return Vec::new();
            }
            if tags.remove_lifetime_exceeded_and_check_whether_seen(&key) {
                tags.add(key.clone(), None);
                let sightings = std::mem::take(&mut tag.sightings);
                tags.update(&key, |seen| seen.sightings.extend(sightings));
                return Vec::new();
            }
            tags.add(key.clone(), None);
            let operations = reports.tag_operations(tag);
            fresh.insert(key, tag.clone());
            operations
        };
        let observed = match reader.inventory(reports.reads(), &mut inspect) {
            Ok(observed) => observed,
            Err(e) => {
                abandon(tags, fresh);
                return Err(e.into());
            }
        };

        let mut operated = 0;
        for mut tag in observed {
            // the first observation of a tag carries its results
            if fresh.remove(tag.key()).is_none() {
                continue;
            }
            if tag.has_pending() {
                tracing::trace!(tag = %tag.id_string(), "Reader left operations unresolved");
                fail_unresolved(&mut tag);
            }
            tag.completed = true;
            tags.put(tag.key().clone(), tag);
            operated += 1;
        }
        abandon(tags, fresh);
        self.rounds += 1;
        tracing::debug!(
            cycle = %reports.name(),
            round = self.rounds,
            operated,
            window = tags.window_len(),
            "Inventory round done"
        );
        Ok(operated)
    }

    /// End the cycle and queue its window for report delivery.
    pub fn complete(
        &mut self,
        initiation_condition: &str,
        termination_condition: &str,
    ) -> Result<()> {
        let (date, clock) = self
            .started
            .take()
            .unwrap_or_else(|| (Utc::now(), Instant::now()));
        let elapsed = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let window = self.tags.clone();
        self.tags.rotate();
        let info = CycleInfo::new(window, initiation_condition, termination_condition)
            .with_date(date, elapsed);
        tracing::debug!(
            cycle = %self.name(),
            rounds = self.rounds,
            elapsed_ms = elapsed,
            "Cycle complete"
        );
        self.reports.enqueue(info)
    }

    /// Wait for in-flight tags, empty the container and send the undefine
    /// boundary to every subscriber.
    pub fn undefine(&mut self) -> Result<()> {
        self.tags.reset();
        let result = self.reports.enqueue(CycleInfo::undefine(self.tags.clone()));
        tracing::info!(cycle = %self.name(), "Undefined command cycle");
        result
    }

    /// Stop the report worker and release every resource.
    ///
    /// Cycles already queued are delivered if their tags are done; a cycle
    /// still waiting on tags is dropped.
    pub fn dispose(&mut self) {
        self.reports.dispose();
        self.tags.dispose();
    }
}

/// Resolve tags the reader inspected but never returned, so that nothing
/// waits on them.
fn abandon(tags: &Tags, unanswered: HashMap<TagKey, Tag>) {
    for (key, mut tag) in unanswered {
        tracing::debug!(tag = %tag.id_string(), "Reader did not return tag");
        fail_unresolved(&mut tag);
        tag.completed = true;
        tags.put(key, tag);
    }
}

fn fail_unresolved(tag: &mut Tag) {
    for result in tag.results.values_mut().filter(|r| r.is_none()) {
        *result = Some(OperationResult::fault(ResultState::MiscErrorTotal));
    }
}
