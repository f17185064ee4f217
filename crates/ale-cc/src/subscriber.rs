// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Report subscribers.
//!
//! `Reports` calls [`Subscriber::inc`] when a cycle is queued and then
//! exactly one of [`Subscriber::enqueue`] (delivery) or
//! [`Subscriber::dec`] (nothing to deliver) once the cycle is assembled.

use crate::report::envelope::CycleReport;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a subscriber receives report sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Standing subscription: empty report sets are withheld.
    Subscription,
    /// One-shot poll: always answered.
    Poll,
    /// One-shot immediate run: always answered.
    Immediate,
}

impl DeliveryMode {
    /// True when an empty report set is still delivered.
    pub fn wants_empty(self) -> bool {
        matches!(self, Self::Poll | Self::Immediate)
    }
}

/// Consumer of report sets.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> DeliveryMode;

    /// One more report set is on its way.
    fn inc(&self);

    /// A pending report set will not be delivered.
    fn dec(&self);

    /// Deliver one pending report set.
    fn enqueue(&self, report: Arc<CycleReport>);
}

/// Subscriber backed by an unbounded channel.
pub struct ChannelSubscriber {
    name: String,
    mode: DeliveryMode,
    pending: Mutex<usize>,
    idle: Condvar,
    sender: Sender<Arc<CycleReport>>,
    receiver: Receiver<Arc<CycleReport>>,
}

impl ChannelSubscriber {
    pub fn new(name: impl Into<String>, mode: DeliveryMode) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            name: name.into(),
            mode,
            pending: Mutex::new(0),
            idle: Condvar::new(),
            sender,
            receiver,
        }
    }

    /// Report sets announced but not yet delivered or dropped.
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    pub fn try_recv(&self) -> Option<Arc<CycleReport>> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<CycleReport>> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Wait up to `timeout` for the pending count to reach zero, then take
    /// everything delivered so far.
    pub fn drain(&self, timeout: Duration) -> Vec<Arc<CycleReport>> {
        let deadline = Instant::now() + timeout;
        {
            let mut pending = self.pending.lock();
            while *pending > 0 {
                if self.idle.wait_until(&mut pending, deadline).timed_out() {
                    tracing::warn!(subscriber = %self.name, pending = *pending, "Drain timed out");
                    break;
                }
            }
        }
        self.receiver.try_iter().collect()
    }

    fn settle(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> DeliveryMode {
        self.mode
    }

    fn inc(&self) {
        *self.pending.lock() += 1;
    }

    fn dec(&self) {
        self.settle();
    }

    fn enqueue(&self, report: Arc<CycleReport>) {
        // the receiver lives as long as self
        let _ = self.sender.send(report);
        self.settle();
    }
}

impl std::fmt::Debug for ChannelSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSubscriber")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;

    fn envelope() -> Arc<CycleReport> {
        Arc::new(CycleReport {
            schema_version: "1.1".into(),
            creation_date: Utc::now(),
            spec_name: "cc".into(),
            date: Utc::now(),
            ale_id: "ale".into(),
            total_milliseconds: 0,
            initiation_condition: "REQUESTED".into(),
            initiation_trigger: None,
            termination_condition: "COUNT".into(),
            termination_trigger: None,
            spec: None,
            reports: Some(Vec::new()),
        })
    }

    #[test]
    fn test_pending_counts() {
        let sub = ChannelSubscriber::new("s", DeliveryMode::Subscription);
        sub.inc();
        sub.inc();
        assert_eq!(sub.pending(), 2);
        sub.enqueue(envelope());
        sub.dec();
        assert_eq!(sub.pending(), 0);
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drain_waits_for_delivery() {
        let sub = Arc::new(ChannelSubscriber::new("s", DeliveryMode::Poll));
        sub.inc();
        let producer = {
            let sub = Arc::clone(&sub);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sub.enqueue(envelope());
            })
        };
        let delivered = sub.drain(Duration::from_secs(5));
        producer.join().unwrap();
        assert_eq!(delivered.len(), 1);
    }

    #[test]
    fn test_modes() {
        assert!(!DeliveryMode::Subscription.wants_empty());
        assert!(DeliveryMode::Poll.wants_empty());
        assert!(DeliveryMode::Immediate.wants_empty());
    }
}
