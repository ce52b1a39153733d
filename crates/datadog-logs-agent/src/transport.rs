// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upload transport: drains queued records and ships them to the receiver.
//!
//! The dispatcher hands each flush task a destination and, for constrained
//! kinds, a resource constraint set. The default worker checks constraints
//! against the device state probe, then repeatedly peeks a batch, POSTs it as
//! a newline-delimited bulk payload, and commits on success. It stops at the
//! first failure, leaving unconfirmed records queued for the next trigger;
//! retry and backoff beyond that are deliberately not implemented here.

use crate::dispatcher::{FlushConstraints, FlushJob, NetworkRequirement};
use crate::platform::DeviceStateProbe;
use crate::queue::DurableQueue;
use crate::record::Record;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// Maximum number of records shipped in a single bulk request.
pub const MAX_BATCH_RECORDS: usize = 500;

/// Executes one flush attempt. Implementations must never remove a record
/// from the queue without confirmed delivery.
#[async_trait]
pub trait FlushWorker: Send + Sync {
    /// `constraints` is `Some` for constrained trigger kinds and `None` for
    /// a best-effort unconstrained flush.
    async fn flush(&self, job: FlushJob, constraints: Option<FlushConstraints>);
}

/// Default worker shipping bulk payloads over HTTP.
pub struct HttpFlushWorker {
    client: reqwest::Client,
    queue: Arc<Mutex<DurableQueue>>,
    device: Arc<dyn DeviceStateProbe>,
}

#[allow(clippy::expect_used)]
impl HttpFlushWorker {
    pub fn new(queue: Arc<Mutex<DurableQueue>>, device: Arc<dyn DeviceStateProbe>) -> Self {
        Self {
            client: reqwest::Client::new(),
            queue,
            device,
        }
    }

    fn constraints_satisfied(&self, constraints: &FlushConstraints) -> bool {
        let network_ok = match constraints.network {
            NetworkRequirement::AnyConnected => self.device.is_connected(),
            NetworkRequirement::UnmeteredOnly => {
                self.device.is_connected() && !self.device.is_metered()
            }
        };
        let idle_ok = !constraints.requires_device_idle || self.device.is_idle();
        let battery_ok = !constraints.requires_battery_not_low || !self.device.is_battery_low();
        network_ok && idle_ok && battery_ok
    }

    /// Builds the newline-delimited bulk payload: one action line naming the
    /// app token and stream type, followed by the record source line.
    fn bulk_body(job: &FlushJob, batch: &[Record]) -> Result<String, serde_json::Error> {
        let mut body = String::new();
        for record in batch {
            let action = json!({
                "index": {
                    "_index": job.app_token,
                    "_type": job.stream_type,
                }
            });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        Ok(body)
    }

    fn peek(&self) -> (Vec<Record>, Option<u64>) {
        self.queue
            .lock()
            .expect("lock poisoned")
            .peek_batch_with_seq(MAX_BATCH_RECORDS)
    }

    // commits by sequence so an eviction racing the upload cannot shift the
    // commit onto records that were never delivered
    fn commit_through(&self, seq: u64) {
        if let Err(e) = self.queue.lock().expect("lock poisoned").commit_through(seq) {
            error!("Failed to commit delivered records through seq {seq}: {e}");
        }
    }
}

#[async_trait]
impl FlushWorker for HttpFlushWorker {
    async fn flush(&self, job: FlushJob, constraints: Option<FlushConstraints>) {
        if let Some(constraints) = &constraints {
            if !self.constraints_satisfied(constraints) {
                debug!("Flush constraints not satisfied, deferring upload");
                return;
            }
        }

        let url = format!("{}/_bulk", job.receiver_url.trim_end_matches('/'));
        loop {
            let (batch, last_seq) = self.peek();
            let Some(last_seq) = last_seq else {
                return;
            };
            let body = match Self::bulk_body(&job, &batch) {
                Ok(body) => body,
                Err(e) => {
                    error!("Failed to serialize bulk payload: {e}");
                    return;
                }
            };

            match self
                .client
                .post(&url)
                .header("Content-Type", "application/x-ndjson")
                .body(body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!("Shipped {} records", batch.len());
                    self.commit_through(last_seq);
                }
                Ok(response) => {
                    // unconfirmed records stay queued; the next trigger retries
                    error!(
                        "Receiver returned {}, upload deferred",
                        response.status()
                    );
                    return;
                }
                Err(e) => {
                    error!("Failed to ship records: {e}");
                    return;
                }
            }
        }
    }
}
