//! Security group reconciler - reassigns the instance's security group.

use async_trait::async_trait;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};

pub struct SecurityGroupReconciler;

#[async_trait]
impl AttributeReconciler for SecurityGroupReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        if observed.security_group_id.as_deref() == Some(declared.security_group_id.as_str()) {
            return Ok(Outcome::Unchanged);
        }

        modify(
            ctx,
            "apply security group",
            id,
            Mutation::ApplySecurityGroup {
                security_group_id: declared.security_group_id.clone(),
            },
        )
        .await?;
        Ok(Outcome::Applied)
    }
}
