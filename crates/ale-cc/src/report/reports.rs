// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cycle orchestration: every report of one cycle plus a delivery worker.
//!
//! The reader side calls [`Reports::tag_operations`] from its inventory
//! callback and [`Reports::enqueue`] when a cycle ends. The worker thread
//! then waits on the cycle's [`Tags`] until every tag has completed,
//! renders the reports and hands the envelope to each subscriber that was
//! registered at enqueue time.

use super::envelope::{CommandReport, CycleReport};
use super::Report;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{Error, Result, ValidationError};
use crate::operation::IdSequence;
use crate::reader::ReaderOperation;
use crate::spec::CycleSpec;
use crate::subscriber::Subscriber;
use crate::tag::Tag;
use crate::tags::Tags;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Termination condition marking the undefine boundary.
pub const UNDEFINE: &str = "UNDEFINE";

/// Snapshot and metadata of one finished cycle.
#[derive(Debug, Clone)]
pub struct CycleInfo {
    pub date: DateTime<Utc>,
    pub total_milliseconds: u64,
    pub initiation_condition: String,
    pub initiation_trigger: Option<String>,
    pub termination_condition: String,
    pub termination_trigger: Option<String>,
    /// Tags of the cycle's window.
    pub tags: Tags,
}

impl CycleInfo {
    pub fn new(
        tags: Tags,
        initiation_condition: impl Into<String>,
        termination_condition: impl Into<String>,
    ) -> Self {
        Self {
            date: Utc::now(),
            total_milliseconds: 0,
            initiation_condition: initiation_condition.into(),
            initiation_trigger: None,
            termination_condition: termination_condition.into(),
            termination_trigger: None,
            tags,
        }
    }

    /// Boundary sent when the cycle is undefined.
    pub fn undefine(tags: Tags) -> Self {
        Self::new(tags, UNDEFINE, UNDEFINE)
    }

    pub fn with_date(mut self, date: DateTime<Utc>, total_milliseconds: u64) -> Self {
        self.date = date;
        self.total_milliseconds = total_milliseconds;
        self
    }

    pub fn with_triggers(mut self, initiation: Option<String>, termination: Option<String>) -> Self {
        self.initiation_trigger = initiation;
        self.termination_trigger = termination;
        self
    }

    pub fn is_undefine(&self) -> bool {
        self.termination_condition == UNDEFINE
    }
}

struct Job {
    info: CycleInfo,
    subscribers: Vec<Arc<dyn Subscriber>>,
}

struct Shared {
    spec: CycleSpec,
    reports: Vec<Report>,
    ctx: Context,
    config: EngineConfig,
    disposed: AtomicBool,
    /// Set by `dispose`; a job still waiting on tags gives up.
    cancelled: AtomicBool,
    /// Tags the worker is currently assembling from.
    current: Mutex<Option<Tags>>,
}

/// All reports of one cycle.
pub struct Reports {
    shared: Arc<Shared>,
    reads: Vec<ReaderOperation>,
    subscribers: Mutex<Vec<Arc<dyn Subscriber>>>,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Option<JoinHandle<()>>,
}

impl Reports {
    /// Compile every report of `spec` and start the delivery worker.
    ///
    /// Ids are assigned across reports in declaration order, so the merged
    /// read list is ordered by id.
    pub fn new(
        spec: CycleSpec,
        parameters: &HashMap<String, String>,
        ctx: Context,
        config: &EngineConfig,
    ) -> Result<Self> {
        let reports = compile(&spec, parameters, &ctx).map_err(|e| e.in_cycle(spec.name.clone()))?;
        let reads: Vec<_> = reports.iter().flat_map(Report::reads).collect();

        let mut shared = Arc::new(Shared {
            spec,
            reports,
            ctx,
            config: config.clone(),
            disposed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            current: Mutex::new(None),
        });
        let (sender, receiver) = channel::unbounded();

        let worker_name = format!(
            "{}-{}",
            config.worker_name_prefix,
            shared.spec.name.replace('\0', "")
        );
        let spawned = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(worker_name)
                .spawn(move || run(shared, receiver))
        };
        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(shared) = Arc::get_mut(&mut shared) {
                    shared.dispose_reports();
                }
                return Err(Error::Io(e));
            }
        };

        tracing::debug!(
            cycle = %shared.spec.name,
            reports = shared.reports.len(),
            reads = reads.len(),
            "Compiled reports"
        );

        Ok(Self {
            shared,
            reads,
            subscribers: Mutex::new(Vec::new()),
            sender: Mutex::new(Some(sender)),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.spec.name
    }

    pub fn spec(&self) -> &CycleSpec {
        &self.shared.spec
    }

    pub fn reports(&self) -> &[Report] {
        &self.shared.reports
    }

    /// Merged read batch handed to the reader each round.
    pub fn reads(&self) -> &[ReaderOperation] {
        &self.reads
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        let mut subscribers = self.subscribers.lock();
        if !subscribers.iter().any(|s| s.name() == subscriber.name()) {
            subscribers.push(subscriber);
        }
    }

    /// Returns `true` when a subscriber of that name was removed.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.name() != name);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Follow-up operations for `tag` after the merged reads, across every
    /// report whose filter the tag passes.
    pub fn tag_operations(&self, tag: &mut Tag) -> Vec<ReaderOperation> {
        let mut out = Vec::new();
        for report in &self.shared.reports {
            if report.filter().matches(tag) {
                report.tag_operations(tag, &mut out, &self.shared.ctx);
            }
        }
        out
    }

    /// Queue a finished cycle for delivery.
    ///
    /// Every current subscriber is counted up before the job is queued and
    /// counted down again if it cannot be.
    pub fn enqueue(&self, info: CycleInfo) -> Result<()> {
        let sender = self.sender.lock();
        let subscribers = self.subscribers.lock().clone();
        let Some(sender) = sender.as_ref().filter(|_| !self.shared.is_disposed()) else {
            return Err(Error::Disposed(self.name().to_string()));
        };
        for subscriber in &subscribers {
            subscriber.inc();
        }
        if let Err(channel::SendError(job)) = sender.send(Job { info, subscribers }) {
            for subscriber in &job.subscribers {
                subscriber.dec();
            }
            return Err(Error::Disposed(self.name().to_string()));
        }
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed() || self.sender.lock().is_none()
    }

    /// Stop accepting cycles, wait for the queue to drain, then release
    /// every field and data source. Idempotent.
    ///
    /// Queued cycles whose tags are done are still delivered. A cycle that
    /// would have to wait for tags is dropped and its subscribers counted
    /// down.
    pub fn dispose(&mut self) {
        self.sender.lock().take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.cancelled.store(true, Ordering::Release);
        if let Some(tags) = self.shared.current.lock().as_ref() {
            tags.wake();
        }
        if worker.join().is_err() {
            tracing::error!(cycle = %self.name(), "Reports worker panicked");
        }
        self.shared.disposed.store(true, Ordering::Release);
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.dispose_reports(),
            None => tracing::warn!(cycle = %self.name(), "Reports still shared, resources kept"),
        }
    }
}

impl Drop for Reports {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Reports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reports")
            .field("name", &self.name())
            .field("reports", &self.shared.reports.len())
            .field("reads", &self.reads.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn compile(
    spec: &CycleSpec,
    parameters: &HashMap<String, String>,
    ctx: &Context,
) -> std::result::Result<Vec<Report>, ValidationError> {
    if spec.name.trim().is_empty() {
        return Err(ValidationError::InvalidName("cycle name must not be empty".into()));
    }
    let mut ids = IdSequence::new();
    let mut names = HashSet::new();
    let mut reports: Vec<Report> = Vec::with_capacity(spec.reports.len());
    for report in &spec.reports {
        let compiled = if names.insert(report.name.as_str()) {
            Report::compile(report, parameters, ctx, &mut ids)
        } else {
            Err(ValidationError::DuplicateName(report.name.clone()).in_report(report.name.clone()))
        };
        match compiled {
            Ok(report) => reports.push(report),
            Err(e) => {
                for report in &mut reports {
                    report.dispose(ctx);
                }
                return Err(e);
            }
        }
    }
    Ok(reports)
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn dispose_reports(&mut self) {
        for report in &mut self.reports {
            report.dispose(&self.ctx);
        }
    }

    fn include_spec(&self) -> bool {
        self.spec
            .include_spec_in_reports
            .unwrap_or(self.config.include_spec_in_reports)
    }

    fn envelope(&self, info: &CycleInfo, reports: Option<Vec<CommandReport>>) -> CycleReport {
        CycleReport {
            schema_version: self.config.schema_version.clone(),
            creation_date: Utc::now(),
            spec_name: self.spec.name.clone(),
            date: info.date,
            ale_id: self.config.ale_id.clone(),
            total_milliseconds: info.total_milliseconds,
            initiation_condition: info.initiation_condition.clone(),
            initiation_trigger: info.initiation_trigger.clone(),
            termination_condition: info.termination_condition.clone(),
            termination_trigger: info.termination_trigger.clone(),
            spec: self.include_spec().then(|| self.spec.clone()),
            reports,
        }
    }

    /// Render every report once its tags are done. Reports without tags
    /// are left out unless they ask to be reported when empty.
    fn assemble(&self, info: &CycleInfo) -> Result<CycleReport> {
        let mut rendered = Vec::with_capacity(self.reports.len());
        for report in &self.reports {
            let tags = self.completed_tags(report, &info.tags)?;
            let command = report.render(&tags, &self.ctx);
            if !command.tags.is_empty() || report.report_if_empty() {
                rendered.push(command);
            }
        }
        Ok(self.envelope(info, Some(rendered)))
    }

    /// Block until every tag of the window is done for `report`, then
    /// return the tags whose results are all resolved.
    fn completed_tags(&self, report: &Report, tags: &Tags) -> Result<Vec<Tag>> {
        loop {
            if tags.is_disposed() {
                return Err(Error::Disposed(self.spec.name.clone()));
            }
            let generation = tags.generation();
            let snapshot = tags.snapshot();
            let done = snapshot.iter().all(|(_, value)| match value {
                Some(tag) => {
                    tag.completed || !report.filter().matches(tag) || report.is_completed(tag)
                }
                None => false,
            });
            if done {
                let unprocessed = |tag: &Tag| tag.results.is_empty() && !report.operations().is_empty();
                return Ok(snapshot
                    .into_iter()
                    .filter_map(|(_, value)| value)
                    .filter(|tag| !tag.has_pending() && !unprocessed(tag))
                    .collect());
            }
            if self.cancelled.load(Ordering::Acquire) {
                return Err(Error::Disposed(self.spec.name.clone()));
            }
            if tags.wait(Some(generation)).is_none() {
                return Err(Error::Disposed(self.spec.name.clone()));
            }
        }
    }

    fn deliver(&self, envelope: CycleReport, subscribers: &[Arc<dyn Subscriber>]) {
        let empty = envelope.is_empty();
        let envelope = Arc::new(envelope);
        let mut delivered = 0usize;
        for subscriber in subscribers {
            if !empty || subscriber.mode().wants_empty() {
                subscriber.enqueue(Arc::clone(&envelope));
                delivered += 1;
            } else {
                subscriber.dec();
            }
        }
        tracing::debug!(
            cycle = %self.spec.name,
            delivered,
            withheld = subscribers.len() - delivered,
            empty,
            "Delivered report set"
        );
    }
}

fn run(shared: Arc<Shared>, jobs: Receiver<Job>) {
    tracing::info!(cycle = %shared.spec.name, "Reports worker started");
    let mut stopped = false;
    for job in jobs.iter() {
        if stopped {
            for subscriber in &job.subscribers {
                subscriber.dec();
            }
            continue;
        }
        if job.info.is_undefine() {
            shared.disposed.store(true, Ordering::Release);
            let envelope = Arc::new(shared.envelope(&job.info, None));
            for subscriber in &job.subscribers {
                subscriber.enqueue(Arc::clone(&envelope));
            }
            tracing::debug!(cycle = %shared.spec.name, "Delivered undefine boundary");
            stopped = true;
            continue;
        }
        *shared.current.lock() = Some(job.info.tags.clone());
        let assembled = shared.assemble(&job.info);
        shared.current.lock().take();
        match assembled {
            Ok(envelope) => shared.deliver(envelope, &job.subscribers),
            Err(e) => {
                if matches!(e, Error::Disposed(_)) {
                    tracing::debug!(cycle = %shared.spec.name, "Report assembly abandoned");
                } else {
                    tracing::error!(cycle = %shared.spec.name, error = %e, "Report assembly failed");
                }
                for subscriber in &job.subscribers {
                    subscriber.dec();
                }
            }
        }
    }
    tracing::info!(cycle = %shared.spec.name, "Reports worker stopped");
}
