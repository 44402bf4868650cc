//! Quota checks against externally reported usage gauges.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use stratum_core::{GovernanceConfig, ResourceLimit, ResourceType};
use tracing::{debug, warn};

use crate::rate_limit::percentage;
use crate::request::{AccessRequest, AccessResult};
use crate::traits::AccessController;

/// Usage at or above this share of the limit adds a restriction note.
const WARNING_PERCENTAGE: f64 = 80.0;

/// Point-in-time usage for one `(workspace, resource type)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub current_value: u64,
    pub max_value: u64,
    pub usage_percentage: f64,
    pub window_start: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Gauge {
    current: u64,
    window_started: Instant,
    window_start: DateTime<Utc>,
}

impl Gauge {
    fn new(current: u64, now: Instant) -> Self {
        Self {
            current,
            window_started: now,
            window_start: Utc::now(),
        }
    }

    /// Zero the gauge once its window has elapsed.
    fn roll(&mut self, limit: &ResourceLimit, now: Instant) {
        if let Some(window) = limit.window() {
            if now.saturating_duration_since(self.window_started) >= window {
                self.current = 0;
                self.window_started = now;
                self.window_start = Utc::now();
            }
        }
    }
}

pub struct ResourceLimitController {
    limits: Vec<ResourceLimit>,
    usage: Mutex<HashMap<(String, ResourceType), Gauge>>,
}

impl ResourceLimitController {
    pub fn new(limits: Vec<ResourceLimit>) -> Self {
        Self {
            limits,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self::new(config.resource_limits.clone())
    }

    pub fn limit_for(&self, workspace: &str, resource_type: ResourceType) -> Option<&ResourceLimit> {
        let mut global = None;
        for limit in self.limits.iter().filter(|l| l.resource_type == resource_type) {
            match limit.workspace.as_deref() {
                Some(name) if name == workspace => return Some(limit),
                None if global.is_none() => global = Some(limit),
                _ => {}
            }
        }
        global
    }

    /// Set the gauge for `workspace`/`resource_type` to `value`.
    pub fn update_current_usage(&self, workspace: &str, resource_type: ResourceType, value: u64) {
        self.update_at(workspace, resource_type, Instant::now(), |_| value);
    }

    /// Add `delta` to the gauge. Returns the new value.
    pub fn add_usage(&self, workspace: &str, resource_type: ResourceType, delta: u64) -> u64 {
        self.update_at(workspace, resource_type, Instant::now(), |current| {
            current.saturating_add(delta)
        })
    }

    fn update_at(
        &self,
        workspace: &str,
        resource_type: ResourceType,
        now: Instant,
        update: impl FnOnce(u64) -> u64,
    ) -> u64 {
        let mut usage = self.usage.lock();
        let gauge = usage
            .entry((workspace.to_string(), resource_type))
            .or_insert_with(|| Gauge::new(0, now));
        if let Some(limit) = self.limit_for(workspace, resource_type) {
            gauge.roll(limit, now);
        }
        gauge.current = update(gauge.current);
        debug!(
            workspace,
            resource_type = %resource_type,
            current = gauge.current,
            "Resource usage updated"
        );
        gauge.current
    }

    pub fn get_usage(&self, workspace: &str, resource_type: ResourceType) -> Option<ResourceUsage> {
        let limit = self.limit_for(workspace, resource_type)?;
        let now = Instant::now();
        let mut usage = self.usage.lock();
        let gauge = usage.get_mut(&(workspace.to_string(), resource_type))?;
        gauge.roll(limit, now);
        Some(ResourceUsage {
            current_value: gauge.current,
            max_value: limit.max_value,
            usage_percentage: percentage(gauge.current, limit.max_value),
            window_start: gauge.window_start,
        })
    }

    /// Forget every gauge of `workspace`.
    pub fn reset(&self, workspace: &str) {
        self.usage.lock().retain(|(name, _), _| name != workspace);
    }

    fn check_at(&self, request: &AccessRequest, now: Instant) -> AccessResult {
        let level = request.access_level;
        let workspace = &request.workspace_name;
        let resource_type = request.resource_type;

        let Some(limit) = self.limit_for(workspace, resource_type) else {
            return AccessResult::allow(level, "No resource limit configured");
        };

        let mut usage = self.usage.lock();
        let Some(gauge) = usage.get_mut(&(workspace.clone(), resource_type)) else {
            // Unmonitored is not the same as over quota.
            return AccessResult::allow(level, "No resource usage recorded");
        };
        gauge.roll(limit, now);
        let current = gauge.current;

        if current >= limit.max_value {
            warn!(
                workspace = %workspace,
                resource_type = %resource_type,
                current,
                limit = limit.max_value,
                "Resource limit exceeded"
            );
            return AccessResult::resource_limited(
                level,
                format!(
                    "Resource limit exceeded: {resource_type} usage {current}/{} in workspace '{workspace}'",
                    limit.max_value
                ),
                current,
                limit.max_value,
            );
        }

        let used = percentage(current, limit.max_value);
        let result = AccessResult::allow(level, "Within resource limit");
        if used >= WARNING_PERCENTAGE {
            result.with_restriction(format!(
                "{resource_type} usage at {used:.0}% of limit {}",
                limit.max_value
            ))
        } else {
            result
        }
    }
}

impl AccessController for ResourceLimitController {
    fn name(&self) -> &str {
        "resource_limit"
    }

    fn check_access(&self, request: &AccessRequest) -> AccessResult {
        self.check_at(request, Instant::now())
    }

    /// Usage is reported through [`update_current_usage`](Self::update_current_usage);
    /// admitted requests do not move the gauge.
    fn track_usage(&self, _request: &AccessRequest, _result: &AccessResult) {}
}
