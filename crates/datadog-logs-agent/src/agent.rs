// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent facade: the public logging surface applications call.
//!
//! Every call enriches the record, appends it to the durable queue and lets
//! the scheduler decide whether to trigger a flush. The call path never
//! performs network I/O and never panics the host application: a storage
//! failure is logged and the record dropped.

use crate::config::LogsConfig;
use crate::dispatcher::{
    FlushConstraints, FlushJob, NetworkRequirement, TriggerDispatcher, TriggerKind,
};
use crate::errors::AgentError;
use crate::platform::{
    self, DeviceStateProbe, HostDeviceState, HostMetadata, LocationProvider, MetadataProvider,
};
use crate::queue::DurableQueue;
use crate::record::{Record, RecordEnricher};
use crate::scheduler::FlushScheduler;
use crate::transport::HttpFlushWorker;
use serde_json::Value;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Host integration points injected at agent construction. The defaults are
/// safe for environments without a platform integration.
pub struct PlatformHooks {
    pub metadata: Arc<dyn MetadataProvider>,
    pub location: Option<Arc<dyn LocationProvider>>,
    pub device_state: Arc<dyn DeviceStateProbe>,
    /// Agent-scoped default metadata merged into every built `meta` field.
    pub default_meta: Option<Record>,
}

impl Default for PlatformHooks {
    fn default() -> Self {
        Self {
            metadata: Arc::new(HostMetadata),
            location: None,
            device_state: Arc::new(HostDeviceState),
            default_meta: None,
        }
    }
}

/// Ships structured log records from the application to the receiver.
pub struct LogsAgent {
    queue: Arc<Mutex<DurableQueue>>,
    enricher: RecordEnricher,
    scheduler: FlushScheduler,
    dispatcher: Arc<TriggerDispatcher>,
    location: Option<Arc<dyn LocationProvider>>,
}

#[allow(clippy::expect_used)]
impl LogsAgent {
    /// Creates an agent with default platform hooks. Must be called within a
    /// tokio runtime; the periodic flush trigger is registered here.
    pub fn new(config: LogsConfig) -> Result<Self, AgentError> {
        Self::with_hooks(config, PlatformHooks::default())
    }

    pub fn with_hooks(config: LogsConfig, hooks: PlatformHooks) -> Result<Self, AgentError> {
        config.validate()?;
        config.log_summary();

        let install_id = platform::install_id(&config.storage_dir)?;
        let queue = Arc::new(Mutex::new(DurableQueue::open(
            &config.storage_dir,
            config.max_offline_messages,
        )?));
        let enricher = RecordEnricher::new(hooks.metadata, install_id, hooks.default_meta);
        let scheduler = FlushScheduler::new(config.min_batch_size, config.min_time_delay);

        let worker = Arc::new(HttpFlushWorker::new(Arc::clone(&queue), hooks.device_state));
        let job = FlushJob {
            receiver_url: config.receiver_url.clone(),
            app_token: config.app_token.clone(),
            stream_type: config.stream_type.clone(),
        };
        let constraints = FlushConstraints {
            network: if config.requires_unmetered_network {
                NetworkRequirement::UnmeteredOnly
            } else {
                NetworkRequirement::AnyConnected
            },
            requires_device_idle: config.requires_device_idle,
            requires_battery_not_low: config.requires_battery_not_low,
        };
        let dispatcher = Arc::new(TriggerDispatcher::new(job, constraints, worker));
        dispatcher.register_periodic(config.time_interval);

        Ok(Self {
            queue,
            enricher,
            scheduler,
            dispatcher,
            location: hooks.location,
        })
    }

    /// Logs a simple message.
    pub fn log(&self, level: &str, message: &str) {
        self.log_at(level, message, None, None);
    }

    /// Logs a message with explicit coordinates; `lat`/`lon` are folded into
    /// `geo.location` during enrichment.
    pub fn log_at(&self, level: &str, message: &str, lat: Option<f64>, lon: Option<f64>) {
        let mut record = Record::new();
        record.insert("level".to_string(), Value::String(level.to_string()));
        record.insert("message".to_string(), Value::String(message.to_string()));
        self.attach_location(&mut record);
        if let (Some(lat), Some(lon)) = (lat, lon) {
            record.insert("lat".to_string(), Value::from(lat));
            record.insert("lon".to_string(), Value::from(lon));
        }
        self.submit(record);
    }

    pub fn debug(&self, message: &str) {
        self.log("debug", message);
    }

    pub fn debug_at(&self, message: &str, lat: Option<f64>, lon: Option<f64>) {
        self.log_at("debug", message, lat, lon);
    }

    pub fn info(&self, message: &str) {
        self.log("info", message);
    }

    pub fn info_at(&self, message: &str, lat: Option<f64>, lon: Option<f64>) {
        self.log_at("info", message, lat, lon);
    }

    pub fn warn(&self, message: &str) {
        self.log("warn", message);
    }

    pub fn warn_at(&self, message: &str, lat: Option<f64>, lon: Option<f64>) {
        self.log_at("warn", message, lat, lon);
    }

    pub fn error(&self, message: &str) {
        self.log("error", message);
    }

    pub fn error_at(&self, message: &str, lat: Option<f64>, lon: Option<f64>) {
        self.log_at("error", message, lat, lon);
    }

    /// Logs an error with its type and source chain.
    pub fn report<E>(&self, level: &str, err: &E)
    where
        E: Error + ?Sized,
    {
        let mut record = Record::new();
        record.insert("level".to_string(), Value::String(level.to_string()));
        record.insert(
            "exception".to_string(),
            Value::String(std::any::type_name::<E>().to_string()),
        );
        record.insert("message".to_string(), Value::String(err.to_string()));

        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push_str("\ncaused by: ");
            trace.push_str(&cause.to_string());
            source = cause.source();
        }
        record.insert("stacktrace".to_string(), Value::String(trace));

        self.attach_location(&mut record);
        self.submit(record);
    }

    /// Sends a custom event record as-is (still enriched before queuing).
    pub fn event(&self, record: Record) {
        self.submit(record);
    }

    /// Suppresses batch-triggered flushes. Explicit and periodic flushes keep
    /// working.
    pub fn pause(&self) {
        self.scheduler.pause();
    }

    pub fn resume(&self) {
        self.scheduler.resume();
    }

    /// Best-effort flush of the queue, ignoring batch-size thresholds, the
    /// pause gate and resource constraints. Recommended before the
    /// application shuts down.
    pub fn flush(&self) {
        debug!(
            "Flushing message queue, queue size = {}",
            self.queue_size()
        );
        self.dispatcher.trigger(TriggerKind::Unconstrained);
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().expect("lock poisoned").len()
    }

    fn attach_location(&self, record: &mut Record) {
        if let Some(provider) = &self.location {
            if let Some(location) = provider.current_location() {
                record.insert("location".to_string(), Value::String(location));
            }
        }
    }

    fn submit(&self, mut record: Record) {
        self.enricher.enrich(&mut record);

        let size = {
            let mut queue = self.queue.lock().expect("lock poisoned");
            match queue.append(record) {
                Ok(()) => queue.len(),
                Err(e) => {
                    // logging must never crash the host application
                    error!("Failed to persist record, dropping it: {e}");
                    return;
                }
            }
        };

        if self.scheduler.on_enqueue(size) {
            self.dispatcher.trigger(TriggerKind::OnQueue);
        }
    }
}
