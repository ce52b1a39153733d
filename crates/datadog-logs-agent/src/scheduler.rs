// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush scheduling: decides after every enqueue whether a batch-triggered
//! flush should fire.
//!
//! A batch-triggered flush fires when the queue holds at least
//! `min_batch_size` records, at least `min_time_delay` has passed since the
//! last batch trigger, and the scheduler is active. Explicit and periodic
//! flushes bypass this logic entirely and never update `last_scheduled`, so
//! they cannot starve the next batch trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct FlushScheduler {
    min_batch_size: usize,
    min_time_delay: Duration,
    /// Instant of the last batch-triggered flush; `None` means never.
    last_scheduled: Mutex<Option<Instant>>,
    active: AtomicBool,
}

#[allow(clippy::expect_used)]
impl FlushScheduler {
    pub fn new(min_batch_size: usize, min_time_delay: Duration) -> Self {
        Self {
            min_batch_size,
            min_time_delay,
            last_scheduled: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    /// Evaluated after every successful append. Returns `true` when a
    /// constrained batch flush should be triggered; `last_scheduled` is
    /// updated in the same critical section so two racing enqueues cannot
    /// both conclude the delay has elapsed.
    pub fn on_enqueue(&self, current_size: usize) -> bool {
        self.evaluate_at(current_size, Instant::now())
    }

    fn evaluate_at(&self, current_size: usize, now: Instant) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut last = self.last_scheduled.lock().expect("lock poisoned");
        let can_send = last.map_or(true, |at| now.duration_since(at) > self.min_time_delay);
        if current_size >= self.min_batch_size && can_send {
            *last = Some(now);
            debug!("Batch flush triggered at queue size {current_size}");
            true
        } else {
            false
        }
    }

    /// Suppresses batch-triggered flushes. Explicit and periodic flushes are
    /// unaffected.
    pub fn pause(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
