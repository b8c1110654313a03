// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Template: the immutable recipe sessions are created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a session template.
    pub struct TemplateId("tpl-");
}

/// Resource quantities applied to a container.
///
/// CPU is in millicores, memory and disk in bytes. The defaults are what a
/// session gets when neither the template nor the create request says
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub disk_bytes: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_bytes: 512 * 1024 * 1024,
            disk_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Merge an optional override on top of these limits. Zero or missing
    /// fields keep the base value.
    pub fn merged(&self, over: Option<&ResourceLimits>) -> ResourceLimits {
        match over {
            None => *self,
            Some(o) => ResourceLimits {
                cpu_millis: if o.cpu_millis > 0 { o.cpu_millis } else { self.cpu_millis },
                memory_bytes: if o.memory_bytes > 0 { o.memory_bytes } else { self.memory_bytes },
                disk_bytes: if o.disk_bytes > 0 { o.disk_bytes } else { self.disk_bytes },
            },
        }
    }
}

/// Immutable recipe for creating sessions.
///
/// Templates are created by operators and referenced by sessions. A template
/// may not be deleted while any non-terminal session references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    /// Unique human-facing name (e.g. "python-basic").
    pub name: String,
    pub image_ref: String,
    pub limits: ResourceLimits,
    /// Packages baked into the image; informs dependency-install skipping.
    #[serde(default)]
    pub pre_installed: Vec<String>,
    /// Opaque security context document passed through to the driver.
    #[serde(default)]
    pub security_context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn new(name: impl Into<String>, image_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: TemplateId::new(),
            name: name.into(),
            image_ref: image_ref.into(),
            limits: ResourceLimits::default(),
            pre_installed: Vec::new(),
            security_context: serde_json::Value::Null,
            created_at: now,
        }
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
