//! Reconciliation settings.

use serde::{Deserialize, Serialize};

use crate::poller::PollSettings;
use crate::retry::RetryPolicy;

/// Retry and polling budgets. Every field has a default, so a partial JSON
/// document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub retry: RetryPolicy,
    /// Instance lifecycle waits (create, stop, resize, terminate).
    pub lifecycle_poll: PollSettings,
    /// Vxnet join/leave waits.
    pub network_poll: PollSettings,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lifecycle_poll: PollSettings::lifecycle(),
            network_poll: PollSettings::network(),
        }
    }
}

impl ReconcileConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
