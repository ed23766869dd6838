//! Attribute reconcilers run one at a time against a settled instance.

mod common;

use std::sync::Arc;

use qc_reconcile::clients::{Call, CallKind, Mutation};
use qc_reconcile::reconciler::{AttributeStep, Outcome, UPDATE_ORDER};
use qc_reconcile::{
    ApiError, Context, DeclaredResourceSpec, InstanceStatus, ObservedInstanceState,
    ReconcileError, SimulatedCloud,
};

use common::{actions, setup, spec, timeline, Step};

struct Fixture {
    cloud: Arc<SimulatedCloud>,
    ctx: Context,
    observed: ObservedInstanceState,
}

/// A running instance created from `declared`, with the call log cleared.
async fn fixture(declared: &DeclaredResourceSpec) -> Fixture {
    let (cloud, orchestrator) = setup();
    let created = orchestrator.create(declared).await.unwrap();
    let observed = orchestrator.update(&created.id, declared).await.unwrap().observed;
    cloud.clear_calls().await;
    Fixture {
        cloud,
        ctx: orchestrator.context().clone(),
        observed,
    }
}

impl Fixture {
    async fn run(&self, step: AttributeStep, declared: &DeclaredResourceSpec) -> Outcome {
        step.reconciler()
            .reconcile(&self.ctx, &self.observed.id, declared, &self.observed)
            .await
            .unwrap()
    }

    async fn refresh(&mut self) {
        self.observed = self.cloud.peek(&self.observed.id).await.unwrap();
    }
}

fn attached_spec() -> DeclaredResourceSpec {
    let mut declared = spec();
    declared.name = Some("web".to_string());
    declared.managed_vxnet_id = Some("vxnet-a".to_string());
    declared.eip_id = Some("eip-1".to_string());
    declared
}

#[tokio::test]
async fn test_matching_state_issues_no_calls() {
    let declared = attached_spec();
    let f = fixture(&declared).await;

    for step in UPDATE_ORDER {
        assert_eq!(f.run(step, &declared).await, Outcome::Unchanged, "{}", step.name());
    }
    assert!(f.cloud.calls().await.is_empty());
}

#[tokio::test]
async fn test_attributes_send_only_changed_fields() {
    let mut declared = attached_spec();
    let f = fixture(&declared).await;

    declared.description = Some("frontend".to_string());
    assert_eq!(f.run(AttributeStep::CoreAttributes, &declared).await, Outcome::Applied);

    assert_eq!(
        f.cloud.mutations().await,
        vec![Call::ModifyInstance {
            id: f.observed.id.clone(),
            mutation: Mutation::ModifyAttributes {
                name: None,
                description: Some("frontend".to_string()),
            },
        }]
    );
}

#[tokio::test]
async fn test_unset_name_clears_it() {
    let mut declared = attached_spec();
    let mut f = fixture(&declared).await;

    declared.name = None;
    f.run(AttributeStep::CoreAttributes, &declared).await;
    f.refresh().await;
    assert_eq!(f.observed.name, "");
}

#[tokio::test]
async fn test_vxnet_switch_leaves_then_joins() {
    let mut declared = spec();
    declared.managed_vxnet_id = Some("vxnet-a".to_string());
    let mut f = fixture(&declared).await;

    declared.managed_vxnet_id = Some("vxnet-b".to_string());
    assert_eq!(f.run(AttributeStep::Vxnet, &declared).await, Outcome::Applied);

    assert_eq!(
        timeline(&f.cloud.calls().await),
        vec![
            Step::Poll,
            Step::Mutate("leave_vxnet"),
            Step::Poll,
            Step::Mutate("join_vxnet"),
            Step::Poll,
        ]
    );
    f.refresh().await;
    assert_eq!(f.observed.managed_vxnet_id(), Some("vxnet-b"));
}

#[tokio::test]
async fn test_vxnet_removed_only_leaves() {
    let mut declared = spec();
    declared.managed_vxnet_id = Some("vxnet-a".to_string());
    let mut f = fixture(&declared).await;

    declared.managed_vxnet_id = Some(String::new());
    f.run(AttributeStep::Vxnet, &declared).await;

    assert_eq!(actions(&f.cloud.calls().await), vec!["leave_vxnet"]);
    f.refresh().await;
    assert!(f.observed.vxnet.is_none());
}

#[tokio::test]
async fn test_security_group_reassigned_once() {
    let mut declared = spec();
    let f = fixture(&declared).await;

    declared.security_group_id = "sg-2".to_string();
    assert_eq!(f.run(AttributeStep::SecurityGroup, &declared).await, Outcome::Applied);
    assert_eq!(actions(&f.cloud.calls().await), vec!["apply_security_group"]);
}

#[tokio::test]
async fn test_eip_swap_dissociates_first() {
    let mut declared = attached_spec();
    let mut f = fixture(&declared).await;

    declared.eip_id = Some("eip-2".to_string());
    f.run(AttributeStep::Eip, &declared).await;

    assert_eq!(
        actions(&f.cloud.calls().await),
        vec!["dissociate_eip", "associate_eip"]
    );
    f.refresh().await;
    assert_eq!(f.observed.eip_id(), Some("eip-2"));
}

#[tokio::test]
async fn test_keypairs_apply_set_difference() {
    let mut declared = spec();
    let mut f = fixture(&declared).await;

    declared.keypair_ids = ["kp-2".to_string()].into_iter().collect();
    f.run(AttributeStep::KeyPairs, &declared).await;

    let mutations: Vec<Mutation> = f
        .cloud
        .mutations()
        .await
        .into_iter()
        .filter_map(|c| match c {
            Call::ModifyInstance { mutation, .. } => Some(mutation),
            _ => None,
        })
        .collect();
    assert_eq!(
        mutations,
        vec![
            Mutation::AttachKeyPairs {
                keypair_ids: vec!["kp-2".to_string()]
            },
            Mutation::DetachKeyPairs {
                keypair_ids: vec!["kp-1".to_string()]
            },
        ]
    );
    f.refresh().await;
    assert_eq!(f.observed.keypair_ids, declared.keypair_ids);
}

#[tokio::test]
async fn test_resize_running_instance_restarts_it() {
    let mut declared = spec();
    let mut f = fixture(&declared).await;

    declared.cpu = 4;
    declared.memory = 4096;
    f.run(AttributeStep::Resize, &declared).await;

    assert_eq!(
        timeline(&f.cloud.calls().await),
        vec![
            Step::Mutate("stop"),
            Step::Poll,
            Step::Mutate("resize"),
            Step::Poll,
            Step::Mutate("start"),
            Step::Poll,
        ]
    );
    f.refresh().await;
    assert_eq!(f.observed.status, InstanceStatus::Running);
    assert_eq!((f.observed.cpu, f.observed.memory), (4, 4096));
}

#[tokio::test]
async fn test_resize_stopped_instance_stays_stopped() {
    let mut declared = spec();
    let mut f = fixture(&declared).await;
    f.cloud.set_status(&f.observed.id, InstanceStatus::Stopped).await;
    f.refresh().await;

    declared.memory = 4096;
    f.run(AttributeStep::Resize, &declared).await;

    assert_eq!(actions(&f.cloud.calls().await), vec!["resize"]);
    f.refresh().await;
    assert_eq!(f.observed.status, InstanceStatus::Stopped);
    assert_eq!(f.observed.memory, 4096);
}

#[tokio::test]
async fn test_resize_retries_busy_stop() {
    let mut declared = spec();
    let f = fixture(&declared).await;
    f.cloud
        .inject_fault(CallKind::ModifyInstance, ApiError::ServerBusy("busy".into()))
        .await;

    declared.cpu = 4;
    f.run(AttributeStep::Resize, &declared).await;
    assert_eq!(
        actions(&f.cloud.calls().await),
        vec!["stop", "stop", "resize", "start"]
    );
}

#[tokio::test]
async fn test_resize_refuses_suspended_instance() {
    let mut declared = spec();
    let mut f = fixture(&declared).await;
    f.cloud.set_status(&f.observed.id, InstanceStatus::Suspended).await;
    f.refresh().await;

    declared.cpu = 8;
    let err = AttributeStep::Resize
        .reconciler()
        .reconcile(&f.ctx, &f.observed.id, &declared, &f.observed)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::PreconditionViolation { .. }));
    assert!(f.cloud.calls().await.is_empty());
}
