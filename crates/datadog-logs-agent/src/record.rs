// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log record representation and enrichment.
//!
//! A record is an ordered mapping of field name to JSON value. Before a
//! record is queued it is enriched exactly once with a timestamp, application
//! metadata and a folded geo location. Enrichment is idempotent and never
//! overrides caller-supplied fields.

use crate::platform::MetadataProvider;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// One structured log or event entry destined for the remote sink.
pub type Record = Map<String, Value>;

/// Constant OS-type tag stamped into record metadata.
pub const OS_TYPE: &str = std::env::consts::OS;

/// Sentinel version name used when the metadata lookup fails.
const VERSION_NAME_UNKNOWN: &str = "n/a";

/// Sentinel version code used when the metadata lookup fails.
const VERSION_CODE_UNKNOWN: i64 = -1;

/// Returns the current instant as ISO-8601 with millisecond precision and
/// UTC designator, e.g. `2025-08-29T10:12:42.123Z`.
pub fn iso8601_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Enriches raw records into the canonical wire shape.
///
/// Version name and code lookups are performed at most once per agent
/// instance; a failed lookup is cached as a sentinel so the host is not
/// queried repeatedly.
pub struct RecordEnricher {
    metadata: Arc<dyn MetadataProvider>,
    install_id: String,
    default_meta: Option<Record>,
    version_name: OnceLock<String>,
    version_code: OnceLock<i64>,
}

impl RecordEnricher {
    pub fn new(
        metadata: Arc<dyn MetadataProvider>,
        install_id: String,
        default_meta: Option<Record>,
    ) -> Self {
        Self {
            metadata,
            install_id,
            default_meta,
            version_name: OnceLock::new(),
            version_code: OnceLock::new(),
        }
    }

    /// Normalizes `record` in place. Applying this twice produces the same
    /// result as once: `@timestamp` and `meta` are only set when absent
    /// (caller-supplied values win), and `lat`/`lon` are folded into `geo`
    /// atomically so they never coexist with it.
    pub fn enrich(&self, record: &mut Record) {
        if !record.contains_key("@timestamp") {
            record.insert("@timestamp".to_string(), Value::String(iso8601_now()));
        }

        // if the caller has supplied a value for this field, we don't touch it
        if !record.contains_key("meta") {
            let mut meta = Record::new();
            meta.insert(
                "versionName".to_string(),
                Value::String(self.version_name().to_string()),
            );
            meta.insert("versionCode".to_string(), Value::from(self.version_code()));
            meta.insert(
                "osRelease".to_string(),
                Value::String(self.metadata.os_release()),
            );
            meta.insert("osType".to_string(), Value::String(OS_TYPE.to_string()));
            meta.insert(
                "uuid".to_string(),
                Value::String(self.install_id.clone()),
            );
            if let Some(defaults) = &self.default_meta {
                for (key, value) in defaults {
                    meta.insert(key.clone(), value.clone());
                }
            }
            record.insert("meta".to_string(), Value::Object(meta));
        }

        self.fold_geo(record);
    }

    /// Replaces `lat`/`lon` with a single `geo.location` field formatted as
    /// two-decimal "lat,lon". Non-numeric coordinates are a caller contract
    /// violation; the record is left untouched rather than corrupted.
    fn fold_geo(&self, record: &mut Record) {
        if !(record.contains_key("lat") && record.contains_key("lon")) {
            return;
        }
        let lat = record.get("lat").and_then(Value::as_f64);
        let lon = record.get("lon").and_then(Value::as_f64);
        match (lat, lon) {
            (Some(lat), Some(lon)) => {
                record.remove("lat");
                record.remove("lon");
                let mut geo = Record::new();
                geo.insert(
                    "location".to_string(),
                    Value::String(format!("{lat:.2},{lon:.2}")),
                );
                record.insert("geo".to_string(), Value::Object(geo));
            }
            _ => warn!("Non-numeric lat/lon on record, skipping geo folding"),
        }
    }

    fn version_name(&self) -> &str {
        self.version_name.get_or_init(|| {
            self.metadata.version_name().unwrap_or_else(|| {
                // remember the failure so we don't try again
                warn!("Application version name unavailable");
                VERSION_NAME_UNKNOWN.to_string()
            })
        })
    }

    fn version_code(&self) -> i64 {
        *self.version_code.get_or_init(|| {
            self.metadata.version_code().unwrap_or_else(|| {
                warn!("Application version code unavailable");
                VERSION_CODE_UNKNOWN
            })
        })
    }
}
