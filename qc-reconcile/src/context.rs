//! Explicit reconciliation context.

use std::sync::Arc;

use crate::clients::CloudApi;
use crate::config::ReconcileConfig;
use crate::poller::PollSettings;
use crate::retry::RetryExecutor;

/// Everything an orchestrator or reconciler needs to reach the control plane.
///
/// Built once from a [`ReconcileConfig`] and passed by reference into every
/// call; nothing is read from globals.
#[derive(Clone)]
pub struct Context {
    pub api: Arc<dyn CloudApi>,
    pub retry: RetryExecutor,
    pub lifecycle_poll: PollSettings,
    pub network_poll: PollSettings,
}

impl Context {
    pub fn new(api: Arc<dyn CloudApi>, config: &ReconcileConfig) -> Self {
        Self {
            api,
            retry: RetryExecutor::new(config.retry.clone()),
            lifecycle_poll: config.lifecycle_poll.clone(),
            network_poll: config.network_poll.clone(),
        }
    }
}
