//! Key pair reconciler - attaches and detaches only the set difference.

use async_trait::async_trait;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};
use crate::poller;

pub struct KeyPairReconciler;

#[async_trait]
impl AttributeReconciler for KeyPairReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        let attach: Vec<String> = declared
            .keypair_ids
            .difference(&observed.keypair_ids)
            .cloned()
            .collect();
        let detach: Vec<String> = observed
            .keypair_ids
            .difference(&declared.keypair_ids)
            .cloned()
            .collect();
        if attach.is_empty() && detach.is_empty() {
            return Ok(Outcome::Unchanged);
        }

        if !attach.is_empty() {
            modify(
                ctx,
                "attach keypairs",
                id,
                Mutation::AttachKeyPairs {
                    keypair_ids: attach,
                },
            )
            .await?;
            poller::await_lifecycle(ctx, "attach keypairs", id).await?;
        }

        if !detach.is_empty() {
            modify(
                ctx,
                "detach keypairs",
                id,
                Mutation::DetachKeyPairs {
                    keypair_ids: detach,
                },
            )
            .await?;
            poller::await_lifecycle(ctx, "detach keypairs", id).await?;
        }

        Ok(Outcome::Applied)
    }
}
