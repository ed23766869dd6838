//! Vxnet reconciler - moves the instance between managed vxnets.
//!
//! Membership changes complete asynchronously and are awaited with the
//! network poller, separately from the instance lifecycle. An attached eip is
//! released before leaving the current vxnet.

use async_trait::async_trait;
use tracing::info;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};
use crate::poller;

pub struct VxnetReconciler;

#[async_trait]
impl AttributeReconciler for VxnetReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        let target = declared.vxnet();
        if target == observed.managed_vxnet_id() {
            return Ok(Outcome::Unchanged);
        }
        info!(
            instance_id = %id,
            from = ?observed.managed_vxnet_id(),
            to = ?target,
            "Changing vxnet"
        );

        poller::await_lifecycle(ctx, "change vxnet", id).await?;

        if let Some(current) = &observed.vxnet {
            // The platform refuses to leave a vxnet while an eip is bound to it.
            // The eip step re-associates it afterwards.
            if let Some(eip_id) = observed.eip_id() {
                modify(
                    ctx,
                    "dissociate eip",
                    id,
                    Mutation::DissociateEip {
                        eip_id: eip_id.to_string(),
                    },
                )
                .await?;
                poller::await_lifecycle(ctx, "dissociate eip", id).await?;
            }
            modify(
                ctx,
                "leave vxnet",
                id,
                Mutation::LeaveVxnet {
                    vxnet_id: current.vxnet_id.clone(),
                },
            )
            .await?;
            poller::await_network(ctx, "leave vxnet", id).await?;
        }

        if let Some(vxnet_id) = target {
            modify(
                ctx,
                "join vxnet",
                id,
                Mutation::JoinVxnet {
                    vxnet_id: vxnet_id.to_string(),
                    static_ip: declared.static_ip.clone().filter(|ip| !ip.is_empty()),
                },
            )
            .await?;
            poller::await_network(ctx, "join vxnet", id).await?;
        }

        Ok(Outcome::Applied)
    }
}
