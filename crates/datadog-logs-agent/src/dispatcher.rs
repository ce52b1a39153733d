// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush trigger dispatch.
//!
//! Each trigger kind is a distinct identity mapped to a named exclusive task
//! slot: triggering a kind while a task of the same identity is still running
//! is a no-op (keep-existing), so an in-flight periodic flush is never merged
//! with or superseded by a batch-triggered one. Flush execution always runs
//! on a spawned task, never on the logging call path.

use crate::transport::FlushWorker;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// The three logical flush trigger identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Best-effort immediate flush ignoring resource constraints
    /// (explicit caller flush, e.g. at shutdown).
    Unconstrained,
    /// Batch-triggered flush respecting resource constraints.
    OnQueue,
    /// Periodic fallback flush respecting resource constraints.
    Periodic,
}

impl TriggerKind {
    fn slot_name(self) -> &'static str {
        match self {
            TriggerKind::Unconstrained => "logs.flush.unconstrained",
            TriggerKind::OnQueue => "logs.flush.onqueue",
            TriggerKind::Periodic => "logs.flush.interval",
        }
    }
}

/// Destination and credentials handed to every flush task.
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub receiver_url: String,
    pub app_token: String,
    pub stream_type: String,
}

/// Network requirement for constrained flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRequirement {
    AnyConnected,
    UnmeteredOnly,
}

/// Resource constraint set a constrained flush must satisfy before running.
#[derive(Debug, Clone, Copy)]
pub struct FlushConstraints {
    pub network: NetworkRequirement,
    pub requires_device_idle: bool,
    pub requires_battery_not_low: bool,
}

/// A named exclusive task slot: starting a task while one of the same name is
/// still running is a no-op. Completed tasks vacate the slot automatically.
struct TaskSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

#[allow(clippy::expect_used)]
impl TaskSlot {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Spawns `fut` if the slot is vacant. Returns `false` (keep-existing)
    /// when a task of this identity is still pending or running.
    fn try_spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.handle.lock().expect("lock poisoned");
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                debug!("{} already in flight, keeping existing task", self.name);
                return false;
            }
        }
        *guard = Some(tokio::spawn(fut));
        true
    }
}

struct PeriodicRegistration {
    interval: Duration,
    handle: JoinHandle<()>,
}

/// Hands flush decisions to the transport worker, one exclusive slot per
/// trigger identity. Must be used within a tokio runtime.
pub struct TriggerDispatcher {
    job: FlushJob,
    constraints: FlushConstraints,
    worker: Arc<dyn FlushWorker>,
    unconstrained: TaskSlot,
    on_queue: TaskSlot,
    periodic_slot: TaskSlot,
    periodic: Mutex<Option<PeriodicRegistration>>,
}

#[allow(clippy::expect_used)]
impl TriggerDispatcher {
    pub fn new(job: FlushJob, constraints: FlushConstraints, worker: Arc<dyn FlushWorker>) -> Self {
        Self {
            job,
            constraints,
            worker,
            unconstrained: TaskSlot::new(TriggerKind::Unconstrained.slot_name()),
            on_queue: TaskSlot::new(TriggerKind::OnQueue.slot_name()),
            periodic_slot: TaskSlot::new(TriggerKind::Periodic.slot_name()),
            periodic: Mutex::new(None),
        }
    }

    /// Requests a flush of the given kind. Returns `true` if a new flush task
    /// was started, `false` if one of the same identity was already in
    /// flight. Constrained kinds carry the configured constraint set.
    pub fn trigger(&self, kind: TriggerKind) -> bool {
        let constraints = match kind {
            TriggerKind::Unconstrained => None,
            TriggerKind::OnQueue | TriggerKind::Periodic => Some(self.constraints),
        };
        let slot = match kind {
            TriggerKind::Unconstrained => &self.unconstrained,
            TriggerKind::OnQueue => &self.on_queue,
            TriggerKind::Periodic => &self.periodic_slot,
        };
        let worker = Arc::clone(&self.worker);
        let job = self.job.clone();
        slot.try_spawn(async move {
            worker.flush(job, constraints).await;
        })
    }

    /// Registers the periodic fallback trigger. Re-registering with an
    /// unchanged interval keeps the existing registration; a changed interval
    /// replaces it. Returns `true` if a new registration was installed.
    pub fn register_periodic(self: &Arc<Self>, interval: Duration) -> bool {
        let mut registration = self.periodic.lock().expect("lock poisoned");
        if let Some(existing) = registration.as_ref() {
            if existing.interval == interval && !existing.handle.is_finished() {
                debug!("Periodic flush already registered at {interval:?}, keeping existing");
                return false;
            }
            existing.handle.abort();
        }

        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; the periodic trigger
            // should first fire one full interval from registration
            ticker.tick().await;
            loop {
                ticker.tick().await;
                dispatcher.trigger(TriggerKind::Periodic);
            }
        });
        *registration = Some(PeriodicRegistration { interval, handle });
        debug!("Registered periodic flush every {interval:?}");
        true
    }
}

impl Drop for TriggerDispatcher {
    fn drop(&mut self) {
        if let Ok(guard) = self.periodic.lock() {
            if let Some(registration) = guard.as_ref() {
                registration.handle.abort();
            }
        }
    }
}
