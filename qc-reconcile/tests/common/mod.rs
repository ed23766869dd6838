//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use qc_reconcile::clients::Call;
use qc_reconcile::poller::PollSettings;
use qc_reconcile::{Context, DeclaredResourceSpec, InstanceOrchestrator, ReconcileConfig, SimulatedCloud};

/// Millisecond budgets so tests run in real time.
pub fn fast_config() -> ReconcileConfig {
    let mut config = ReconcileConfig::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config.lifecycle_poll = PollSettings {
        interval_ms: 1,
        timeout_ms: 2_000,
    };
    config.network_poll = PollSettings {
        interval_ms: 1,
        timeout_ms: 2_000,
    };
    config
}

pub fn context(cloud: &Arc<SimulatedCloud>) -> Context {
    Context::new(cloud.clone(), &fast_config())
}

pub fn setup() -> (Arc<SimulatedCloud>, InstanceOrchestrator) {
    let cloud = Arc::new(SimulatedCloud::new());
    let orchestrator = InstanceOrchestrator::new(context(&cloud));
    (cloud, orchestrator)
}

pub fn spec() -> DeclaredResourceSpec {
    DeclaredResourceSpec {
        image_id: "img-1".to_string(),
        cpu: 2,
        memory: 2048,
        security_group_id: "sg-1".to_string(),
        keypair_ids: ["kp-1".to_string()].into_iter().collect(),
        ..Default::default()
    }
}

/// A call log condensed to mutations and runs of describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Poll,
    Mutate(&'static str),
}

pub fn timeline(calls: &[Call]) -> Vec<Step> {
    let mut steps = Vec::new();
    for call in calls {
        let step = match call {
            Call::DescribeInstance { .. } | Call::DescribeSecurityGroup { .. } => Step::Poll,
            other => Step::Mutate(action(other)),
        };
        if step == Step::Poll && steps.last() == Some(&Step::Poll) {
            continue;
        }
        steps.push(step);
    }
    steps
}

/// Names of the mutating calls, in order.
pub fn actions(calls: &[Call]) -> Vec<&'static str> {
    calls
        .iter()
        .filter(|c| c.is_mutation())
        .map(action)
        .collect()
}

fn action(call: &Call) -> &'static str {
    match call {
        Call::RunInstance { .. } => "run_instance",
        Call::ModifyInstance { mutation, .. } => mutation.action(),
        Call::TerminateInstance { .. } => "terminate",
        Call::CreateSecurityGroup { .. } => "create_security_group",
        Call::ModifySecurityGroup { .. } => "modify_security_group",
        Call::DeleteSecurityGroup { .. } => "delete_security_group",
        Call::DescribeInstance { .. } => "describe_instance",
        Call::DescribeSecurityGroup { .. } => "describe_security_group",
    }
}
