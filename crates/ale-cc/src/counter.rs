// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generation counter for "wait until something changed" notification.
//!
//! [`Counter::pulse`] bumps the generation and wakes every waiter.
//! [`Counter::wait`] blocks while the generation still equals the value the
//! caller last observed. A pulse carries no payload, so waiters must re-check
//! their own condition after waking.
//!
//! # Example
//! ```
//! use ale_cc::counter::Counter;
//! use std::sync::Arc;
//!
//! let counter = Arc::new(Counter::new());
//! let seen = counter.value();
//! let c = Arc::clone(&counter);
//! let handle = std::thread::spawn(move || c.pulse());
//! let now = counter.wait(Some(seen));
//! assert_ne!(now, seen);
//! handle.join().unwrap();
//! ```

use parking_lot::{Condvar, Mutex};

/// Monotonic generation counter backed by a condition variable.
#[derive(Debug, Default)]
pub struct Counter {
    value: Mutex<u64>,
    condvar: Condvar,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }

    /// Block until the generation differs from `last`.
    ///
    /// Returns immediately with the current generation when `last` is
    /// `None`. The wait is uninterruptible; spurious wakeups are absorbed.
    pub fn wait(&self, last: Option<u64>) -> u64 {
        let mut value = self.value.lock();
        if let Some(last) = last {
            while *value == last {
                self.condvar.wait(&mut value);
            }
        }
        *value
    }

    /// Increment the generation and wake all waiters.
    pub fn pulse(&self) -> u64 {
        let mut value = self.value.lock();
        *value = value.wrapping_add(1);
        self.condvar.notify_all();
        *value
    }
}
