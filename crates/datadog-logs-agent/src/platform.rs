// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host platform capability interfaces.
//!
//! The core never references the host platform directly. Application
//! metadata, location, and device resource state are sourced through these
//! small traits, injected at agent construction. The default implementations
//! are safe no-ops for environments without a real platform integration.

use crate::errors::StorageError;
use std::fs;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// Name of the file holding the stable per-install identifier.
const INSTALL_ID_FILE: &str = "install_id";

/// Sources application package metadata merged into each record's `meta`
/// field. Lookups may fail; the enricher caches the first result (or a
/// sentinel) so the host is queried at most once per field.
pub trait MetadataProvider: Send + Sync {
    /// Human-readable application version, e.g. "2.4.1".
    fn version_name(&self) -> Option<String> {
        None
    }

    /// Monotonic application version number.
    fn version_code(&self) -> Option<i64> {
        None
    }

    /// OS release string, e.g. a kernel or platform version.
    fn os_release(&self) -> String {
        std::env::consts::OS.to_string()
    }
}

/// Sources an optional current-location string attached to log records.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<String>;
}

/// Reports device resource state consulted before a constrained flush runs.
pub trait DeviceStateProbe: Send + Sync {
    /// Whether any network connection is available.
    fn is_connected(&self) -> bool {
        true
    }

    /// Whether the active network is metered.
    fn is_metered(&self) -> bool {
        false
    }

    /// Whether the device is currently idle.
    fn is_idle(&self) -> bool {
        true
    }

    /// Whether the battery is low.
    fn is_battery_low(&self) -> bool {
        false
    }
}

/// Default metadata source for non-platform environments.
pub struct HostMetadata;

impl MetadataProvider for HostMetadata {}

/// Default device state: always connected, unmetered, idle, battery fine.
pub struct HostDeviceState;

impl DeviceStateProbe for HostDeviceState {}

/// Returns the stable per-install UUID, creating and persisting it on first
/// use. The id lives next to the durable queue so it survives restarts.
pub fn install_id(storage_dir: &Path) -> Result<String, StorageError> {
    fs::create_dir_all(storage_dir)?;
    let path = storage_dir.join(INSTALL_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => {
            let id = Uuid::new_v4().to_string();
            fs::write(&path, &id)?;
            debug!("Created new install id at {}", path.display());
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_id_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = install_id(dir.path()).unwrap();
        let second = install_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_install_id_differs_per_install() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        assert_ne!(
            install_id(dir_a.path()).unwrap(),
            install_id(dir_b.path()).unwrap()
        );
    }

    #[test]
    fn test_host_defaults() {
        let device = HostDeviceState;
        assert!(device.is_connected());
        assert!(!device.is_metered());
        assert!(device.is_idle());
        assert!(!device.is_battery_low());

        let metadata = HostMetadata;
        assert!(metadata.version_name().is_none());
        assert_eq!(metadata.version_code(), None);
        assert!(!metadata.os_release().is_empty());
    }
}
