//! Stratum Governance
//!
//! Decides whether an operation on a workspace may proceed. Three controllers
//! share one contract ([`AccessController`]):
//!
//! - [`WorkspaceAccessController`]: allow-list, per-workspace access ceiling,
//!   path containment and read-only enforcement.
//! - [`RateLimitController`]: sliding-window request counting.
//! - [`ResourceLimitController`]: quotas against reported usage gauges.
//!
//! [`AccessControlManager`] composes them unanimously, raises typed
//! [`AccessError`](stratum_core::AccessError)s and feeds refusals to the
//! [`SecurityMonitor`].

pub mod composite;
pub mod manager;
pub mod monitor;
pub mod rate_limit;
pub mod request;
pub mod resource_limit;
pub mod traits;
pub mod workspace;

pub use composite::CompositeAccessController;
pub use manager::{AccessControlManager, AccessScope, DEFAULT_CONTROLLER};
pub use monitor::{AlertSeverity, SecurityAlert, SecurityMonitor};
pub use rate_limit::{RateLimitController, RateUsage};
pub use request::{AccessRequest, AccessResult, DenialKind};
pub use resource_limit::{ResourceLimitController, ResourceUsage};
pub use traits::AccessController;
pub use workspace::{resolve_within, WorkspaceAccessController};
