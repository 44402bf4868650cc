//! Sliding-window rate limiting per `(workspace, resource type)`.
//!
//! Each key keeps the instants of its admitted requests inside the trailing
//! window. A check prunes instants older than the window and compares what
//! is left to the limit. Only admitted requests are recorded, so refused
//! attempts never consume quota.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use stratum_core::{GovernanceConfig, ResourceLimit, ResourceType};
use tracing::{debug, warn};

use crate::request::{AccessRequest, AccessResult};
use crate::traits::AccessController;

const BURST_WINDOW: Duration = Duration::from_secs(1);

type WindowKey = (String, ResourceType);

/// Point-in-time view of one rate window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateUsage {
    pub current: u64,
    pub max_value: u64,
    pub window_seconds: u64,
    pub usage_percentage: f64,
}

/// Sliding-window limiter.
///
/// Admission is checked when an access scope opens and the request is
/// recorded when it closes. Scopes that overlap on the same key are all
/// checked against the same count, so concurrent callers can together be
/// admitted past `max_value` within one window.
pub struct RateLimitController {
    limits: Vec<ResourceLimit>,
    windows: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
}

impl RateLimitController {
    /// Limits without a window are ignored.
    pub fn new(limits: Vec<ResourceLimit>) -> Self {
        let limits = limits
            .into_iter()
            .filter(|limit| limit.window_seconds.unwrap_or(0) > 0)
            .collect();
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self::new(config.rate_limits.clone())
    }

    /// The rule for `workspace`: a workspace-specific one wins over a global one.
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

    fn check_at(&self, request: &AccessRequest, now: Instant) -> AccessResult {
        let level = request.access_level;
        let workspace = &request.workspace_name;
        let resource_type = request.resource_type;

        let Some(limit) = self.limit_for(workspace, resource_type) else {
            return AccessResult::allow(level, "No rate limit configured");
        };
        let Some(window) = limit.window() else {
            return AccessResult::allow(level, "No rate limit configured");
        };

        let mut windows = self.windows.lock();
        let key = (workspace.clone(), resource_type);
        let current = match windows.get_mut(&key) {
            Some(times) => {
                prune(times, now, window);
                times.len() as u64
            }
            None => 0,
        };

        if current >= limit.max_value {
            warn!(
                workspace = %workspace,
                resource_type = %resource_type,
                current,
                limit = limit.max_value,
                "Rate limit exceeded"
            );
            return AccessResult::rate_limited(
                level,
                format!(
                    "Rate limit exceeded: {current}/{} {resource_type} requests in workspace '{workspace}' within {}s",
                    limit.max_value,
                    window.as_secs()
                ),
                current,
                limit.max_value,
            );
        }

        if let Some(burst) = limit.burst_limit {
            let recent = windows
                .get(&key)
                .map(|times| {
                    times
                        .iter()
                        .filter(|t| now.saturating_duration_since(**t) < BURST_WINDOW)
                        .count() as u64
                })
                .unwrap_or(0);
            if recent >= burst {
                return AccessResult::rate_limited(
                    level,
                    format!(
                        "Rate limit exceeded: burst of {burst} {resource_type} requests per second in workspace '{workspace}'"
                    ),
                    recent,
                    burst,
                );
            }
        }

        let remaining = limit.max_value - current;
        AccessResult::allow(level, "Within rate limit")
            .with_restriction(format!("{remaining} requests remaining in window"))
    }

    fn record_at(&self, request: &AccessRequest, now: Instant) {
        if self
            .limit_for(&request.workspace_name, request.resource_type)
            .is_none()
        {
            return;
        }
        self.windows
            .lock()
            .entry((request.workspace_name.clone(), request.resource_type))
            .or_default()
            .push_back(now);
    }

    fn usage_at(
        &self,
        workspace: &str,
        resource_type: ResourceType,
        now: Instant,
    ) -> Option<RateUsage> {
        let limit = self.limit_for(workspace, resource_type)?;
        let window = limit.window()?;
        let mut windows = self.windows.lock();
        let current = match windows.get_mut(&(workspace.to_string(), resource_type)) {
            Some(times) => {
                prune(times, now, window);
                times.len() as u64
            }
            None => 0,
        };
        Some(RateUsage {
            current,
            max_value: limit.max_value,
            window_seconds: window.as_secs(),
            usage_percentage: percentage(current, limit.max_value),
        })
    }

    /// Requests admitted in the current window, `None` when no limit applies.
    pub fn get_usage(&self, workspace: &str, resource_type: ResourceType) -> Option<RateUsage> {
        self.usage_at(workspace, resource_type, Instant::now())
    }

    /// Forget every window of `workspace`.
    pub fn reset(&self, workspace: &str) {
        self.windows.lock().retain(|(name, _), _| name != workspace);
        debug!(workspace, "Rate limit windows reset");
    }

    pub fn reset_all(&self) {
        self.windows.lock().clear();
    }
}

fn prune(times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = times.front() {
        if now.saturating_duration_since(*oldest) >= window {
            times.pop_front();
        } else {
            break;
        }
    }
}

pub(crate) fn percentage(current: u64, max: u64) -> f64 {
    if max == 0 {
        100.0
    } else {
        current as f64 / max as f64 * 100.0
    }
}

impl AccessController for RateLimitController {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn check_access(&self, request: &AccessRequest) -> AccessResult {
        self.check_at(request, Instant::now())
    }

    fn track_usage(&self, request: &AccessRequest, result: &AccessResult) {
        if result.allowed {
            self.record_at(request, Instant::now());
        }
    }
}
