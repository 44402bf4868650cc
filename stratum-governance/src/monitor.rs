//! Repeated-violation detection over governance decisions.
//!
//! Every refusal is recorded against its `(workspace, user)` pair. When the
//! number of refusals inside the trailing window reaches the configured
//! threshold an alert is raised, and raised again with a higher severity at
//! 2x, 4x and 8x the threshold.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use stratum_core::MonitorSettings;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::request::{AccessRequest, AccessResult};

const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Severity for `count` violations, `None` below the threshold.
    pub fn for_count(count: usize, threshold: usize) -> Option<Self> {
        let threshold = threshold.max(1);
        match count / threshold {
            0 => None,
            1 => Some(AlertSeverity::Low),
            2 | 3 => Some(AlertSeverity::Medium),
            4..=7 => Some(AlertSeverity::High),
            _ => Some(AlertSeverity::Critical),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    pub workspace: String,
    pub user_id: Option<String>,
    pub severity: AlertSeverity,
    pub violation_count: usize,
    pub window_secs: u64,
    pub resource_id: String,
    /// Reason of the refusal that triggered the alert.
    pub reason: String,
    pub raised_at: DateTime<Utc>,
}

type ViolationKey = (String, Option<String>);

#[derive(Debug, Default)]
struct Violations {
    times: VecDeque<Instant>,
    last_severity: Option<AlertSeverity>,
}

pub struct SecurityMonitor {
    settings: MonitorSettings,
    violations: Mutex<HashMap<ViolationKey, Violations>>,
    alerts: Mutex<VecDeque<SecurityAlert>>,
    sender: broadcast::Sender<SecurityAlert>,
}

impl SecurityMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        let (sender, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            settings,
            violations: Mutex::new(HashMap::new()),
            alerts: Mutex::new(VecDeque::new()),
            sender,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.settings.window_secs)
    }

    /// Receive alerts as they are raised.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityAlert> {
        self.sender.subscribe()
    }

    /// Feed one governance decision. Returns the alert it raised, if any.
    pub fn observe(&self, request: &AccessRequest, result: &AccessResult) -> Option<SecurityAlert> {
        if result.allowed {
            return None;
        }
        self.record_violation(request, &result.reason)
    }

    pub fn record_violation(&self, request: &AccessRequest, reason: &str) -> Option<SecurityAlert> {
        self.record_violation_at(request, reason, Instant::now())
    }

    fn record_violation_at(
        &self,
        request: &AccessRequest,
        reason: &str,
        now: Instant,
    ) -> Option<SecurityAlert> {
        if !self.settings.enabled {
            return None;
        }
        let window = self.window();
        let threshold = self.settings.violation_threshold as usize;

        let (count, severity) = {
            let mut violations = self.violations.lock();
            // Drop keys whose window emptied; this also resets their severity.
            violations.retain(|_, entry| {
                prune(&mut entry.times, now, window);
                !entry.times.is_empty()
            });
            let entry = violations
                .entry((request.workspace_name.clone(), request.user_id.clone()))
                .or_default();
            entry.times.push_back(now);

            let count = entry.times.len();
            let severity = AlertSeverity::for_count(count, threshold);
            // Only escalations raise a new alert.
            if severity.is_none() || severity <= entry.last_severity {
                return None;
            }
            entry.last_severity = severity;
            (count, severity?)
        };

        let alert = SecurityAlert {
            alert_id: Uuid::now_v7(),
            workspace: request.workspace_name.clone(),
            user_id: request.user_id.clone(),
            severity,
            violation_count: count,
            window_secs: self.settings.window_secs,
            resource_id: request.resource_id.clone(),
            reason: reason.to_string(),
            raised_at: Utc::now(),
        };

        warn!(
            workspace = %alert.workspace,
            user = ?alert.user_id,
            severity = ?alert.severity,
            violations = count,
            reason = %alert.reason,
            "Security alert raised"
        );

        {
            let mut alerts = self.alerts.lock();
            alerts.push_back(alert.clone());
            while alerts.len() > self.settings.max_alerts {
                alerts.pop_front();
            }
        }
        // No subscribers is fine.
        let _ = self.sender.send(alert.clone());
        Some(alert)
    }

    /// Violations inside the current window for `workspace`/`user_id`.
    pub fn violation_count(&self, workspace: &str, user_id: Option<&str>) -> usize {
        let window = self.window();
        let now = Instant::now();
        let key = (workspace.to_string(), user_id.map(str::to_string));
        let mut violations = self.violations.lock();
        let Some(entry) = violations.get_mut(&key) else {
            return 0;
        };
        prune(&mut entry.times, now, window);
        let count = entry.times.len();
        if count == 0 {
            violations.remove(&key);
        }
        count
    }

    /// Up to `limit` alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<SecurityAlert> {
        self.alerts.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn clear(&self) {
        self.violations.lock().clear();
        self.alerts.lock().clear();
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
