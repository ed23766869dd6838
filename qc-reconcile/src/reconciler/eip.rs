//! Elastic IP reconciler.

use async_trait::async_trait;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};
use crate::poller;

pub struct EipReconciler;

#[async_trait]
impl AttributeReconciler for EipReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        let target = declared.eip();
        if target == observed.eip_id() {
            return Ok(Outcome::Unchanged);
        }

        if let Some(current) = observed.eip_id() {
            modify(
                ctx,
                "dissociate eip",
                id,
                Mutation::DissociateEip {
                    eip_id: current.to_string(),
                },
            )
            .await?;
            poller::await_lifecycle(ctx, "dissociate eip", id).await?;
        }

        if let Some(eip_id) = target {
            modify(
                ctx,
                "associate eip",
                id,
                Mutation::AssociateEip {
                    eip_id: eip_id.to_string(),
                },
            )
            .await?;
            poller::await_lifecycle(ctx, "associate eip", id).await?;
        }

        Ok(Outcome::Applied)
    }
}
