//! State transition poller.
//!
//! Blocks the calling flow until an instance leaves a transitional status.
//! Two probes exist because the instance lifecycle and its vxnet membership
//! change asynchronously and independently on the remote side.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::model::{InstanceId, InstanceStatus, NetworkStatus, ObservedInstanceState};

/// Interval and wait budget for one kind of poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl PollSettings {
    pub fn lifecycle() -> Self {
        Self {
            interval_ms: 3_000,
            timeout_ms: 600_000,
        }
    }

    pub fn network() -> Self {
        Self {
            interval_ms: 2_000,
            timeout_ms: 300_000,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What a vanished resource means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentPolicy {
    /// Teardown flows: the resource is gone, which is the goal.
    Terminal,
    /// Live flows: the resource was expected to exist.
    Error,
}

/// Extracts the status a poll loop waits on.
pub trait StatusProbe {
    type Status: Copy + PartialEq + fmt::Display + fmt::Debug;

    fn status(observed: &ObservedInstanceState) -> Self::Status;
}

/// Instance power/lifecycle status.
pub struct LifecycleProbe;

impl StatusProbe for LifecycleProbe {
    type Status = InstanceStatus;

    fn status(observed: &ObservedInstanceState) -> InstanceStatus {
        observed.status
    }
}

/// Vxnet membership status.
pub struct NetworkProbe;

impl StatusProbe for NetworkProbe {
    type Status = NetworkStatus;

    fn status(observed: &ObservedInstanceState) -> NetworkStatus {
        observed.network_status()
    }
}

/// A single wait, built per call and dropped once it resolves.
#[derive(Debug, Clone)]
pub struct TransitionRequest<S> {
    pub instance_id: InstanceId,
    pub transitional: Vec<S>,
    pub failure: Vec<S>,
    /// Statuses that mean the resource is gone; handled like absence.
    pub gone: Vec<S>,
    pub interval: Duration,
    pub timeout: Duration,
    pub on_absent: AbsentPolicy,
}

impl TransitionRequest<InstanceStatus> {
    /// Wait for a live instance to settle. Suspension fails the wait; a
    /// terminated or ceased instance counts as vanished.
    pub fn lifecycle(instance_id: &InstanceId, settings: &PollSettings) -> Self {
        Self {
            instance_id: instance_id.clone(),
            transitional: InstanceStatus::TRANSITIONAL.to_vec(),
            failure: vec![InstanceStatus::Suspended],
            gone: vec![InstanceStatus::Terminated, InstanceStatus::Ceased],
            interval: settings.interval(),
            timeout: settings.timeout(),
            on_absent: AbsentPolicy::Error,
        }
    }

    /// Wait during teardown. Any stable status, suspended included, lets
    /// teardown proceed; termination and absence are both success.
    pub fn teardown(instance_id: &InstanceId, settings: &PollSettings) -> Self {
        Self {
            failure: vec![],
            on_absent: AbsentPolicy::Terminal,
            ..Self::lifecycle(instance_id, settings)
        }
    }
}

impl TransitionRequest<NetworkStatus> {
    pub fn network(instance_id: &InstanceId, settings: &PollSettings) -> Self {
        Self {
            instance_id: instance_id.clone(),
            transitional: NetworkStatus::TRANSITIONAL.to_vec(),
            failure: vec![],
            gone: vec![],
            interval: settings.interval(),
            timeout: settings.timeout(),
            on_absent: AbsentPolicy::Error,
        }
    }

    pub fn on_absent(mut self, policy: AbsentPolicy) -> Self {
        self.on_absent = policy;
        self
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<S> {
    Resolved {
        status: S,
        observed: ObservedInstanceState,
    },
    /// The instance no longer exists and the request treats that as terminal.
    Absent,
}

/// Poll until the probed status leaves the transitional set.
pub async fn wait_for<P: StatusProbe>(
    ctx: &Context,
    operation: &'static str,
    request: &TransitionRequest<P::Status>,
) -> Result<PollOutcome<P::Status>> {
    let start = Instant::now();
    let id = &request.instance_id;
    let mut polls = 0u32;

    loop {
        polls += 1;
        let observed = ctx
            .retry
            .execute(operation, id.as_str(), || ctx.api.describe_instance(id))
            .await?;

        let observed = observed.filter(|o| !request.gone.contains(&P::status(o)));
        let Some(observed) = observed else {
            return match request.on_absent {
                AbsentPolicy::Terminal => {
                    debug!(instance_id = %id, operation, "Instance gone, treating as terminal");
                    Ok(PollOutcome::Absent)
                }
                AbsentPolicy::Error => Err(ReconcileError::Vanished {
                    operation,
                    resource: id.to_string(),
                }),
            };
        };

        let status = P::status(&observed);
        if request.failure.contains(&status) {
            warn!(instance_id = %id, operation, status = %status, "Entered failure status");
            return Err(ReconcileError::TransitionFailed {
                operation,
                resource: id.to_string(),
                status: status.to_string(),
            });
        }

        if !request.transitional.contains(&status) {
            info!(
                instance_id = %id,
                operation,
                status = %status,
                polls,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Transition resolved"
            );
            return Ok(PollOutcome::Resolved { status, observed });
        }

        let waited = start.elapsed();
        if waited + request.interval > request.timeout {
            warn!(instance_id = %id, operation, status = %status, waited_ms = waited.as_millis() as u64, "Transition timed out");
            return Err(ReconcileError::TransitionTimeout {
                operation,
                resource: id.to_string(),
                status: status.to_string(),
                waited,
            });
        }

        debug!(instance_id = %id, operation, status = %status, polls, "Still transitioning");
        tokio::time::sleep(request.interval).await;
    }
}

/// Wait for a live instance's lifecycle status to settle.
pub async fn await_lifecycle(
    ctx: &Context,
    operation: &'static str,
    id: &InstanceId,
) -> Result<ObservedInstanceState> {
    let request = TransitionRequest::lifecycle(id, &ctx.lifecycle_poll);
    resolved(operation, id, wait_for::<LifecycleProbe>(ctx, operation, &request).await?)
}

/// Wait for a live instance's vxnet membership change to settle.
pub async fn await_network(
    ctx: &Context,
    operation: &'static str,
    id: &InstanceId,
) -> Result<ObservedInstanceState> {
    let request = TransitionRequest::network(id, &ctx.network_poll);
    resolved(operation, id, wait_for::<NetworkProbe>(ctx, operation, &request).await?)
}

fn resolved<S>(
    operation: &'static str,
    id: &InstanceId,
    outcome: PollOutcome<S>,
) -> Result<ObservedInstanceState> {
    match outcome {
        PollOutcome::Resolved { observed, .. } => Ok(observed),
        PollOutcome::Absent => Err(ReconcileError::Vanished {
            operation,
            resource: id.to_string(),
        }),
    }
}
