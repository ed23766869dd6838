//! Attribute reconcilers.
//!
//! Each reconciler compares one attribute group of the declared spec with the
//! observed instance and issues the minimal corrective remote call. Update
//! runs them in [`UPDATE_ORDER`].

pub mod attributes;
pub mod eip;
pub mod keypair;
pub mod resize;
pub mod security_group;
pub mod vxnet;

use async_trait::async_trait;
use tracing::info;

use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};

/// Result of a single reconciler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Declared and observed already matched; no remote call was made.
    Unchanged,
    Applied,
}

/// Trait for attribute reconcilers.
#[async_trait]
pub trait AttributeReconciler: Send + Sync {
    /// Compare declared vs observed and converge the instance if they differ.
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome>;
}

/// Attribute groups in the order Update applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeStep {
    CoreAttributes,
    Vxnet,
    SecurityGroup,
    Eip,
    KeyPairs,
    Resize,
}

/// Vxnet before eip (an eip needs a network), resize last since it restarts the instance.
pub const UPDATE_ORDER: [AttributeStep; 6] = [
    AttributeStep::CoreAttributes,
    AttributeStep::Vxnet,
    AttributeStep::SecurityGroup,
    AttributeStep::Eip,
    AttributeStep::KeyPairs,
    AttributeStep::Resize,
];

impl AttributeStep {
    pub fn name(self) -> &'static str {
        match self {
            AttributeStep::CoreAttributes => "attributes",
            AttributeStep::Vxnet => "vxnet",
            AttributeStep::SecurityGroup => "security_group",
            AttributeStep::Eip => "eip",
            AttributeStep::KeyPairs => "keypairs",
            AttributeStep::Resize => "resize",
        }
    }

    pub fn reconciler(self) -> &'static dyn AttributeReconciler {
        match self {
            AttributeStep::CoreAttributes => &attributes::CoreAttributesReconciler,
            AttributeStep::Vxnet => &vxnet::VxnetReconciler,
            AttributeStep::SecurityGroup => &security_group::SecurityGroupReconciler,
            AttributeStep::Eip => &eip::EipReconciler,
            AttributeStep::KeyPairs => &keypair::KeyPairReconciler,
            AttributeStep::Resize => &resize::ResizeReconciler,
        }
    }
}

/// Issue one instance mutation through the retry executor.
pub(crate) async fn modify(
    ctx: &Context,
    operation: &'static str,
    id: &InstanceId,
    mutation: Mutation,
) -> Result<()> {
    info!(instance_id = %id, action = mutation.action(), "Modifying instance");
    ctx.retry
        .execute(operation, id.as_str(), || {
            ctx.api.modify_instance(id, mutation.clone())
        })
        .await
}
