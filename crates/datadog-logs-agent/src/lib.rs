// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side log-shipping agent.
//!
//! Applications append structured log records locally; the agent enriches
//! them, buffers them in a durable capacity-bounded queue that survives
//! process restarts, and opportunistically uploads batches to a remote
//! ingestion endpoint — tolerating offline periods and resource constraints
//! (network type, device idle, battery level).
//!
//! ```no_run
//! use datadog_logs_agent::{LogsAgent, LogsConfig};
//!
//! # async fn example() -> Result<(), datadog_logs_agent::errors::AgentError> {
//! let config = LogsConfig::new("my-app-token", "example", "/var/lib/my-app/logs");
//! let agent = LogsAgent::new(config)?;
//! agent.info("application started");
//! agent.flush();
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod platform;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod transport;

pub use agent::{LogsAgent, PlatformHooks};
pub use config::LogsConfig;
pub use record::Record;
