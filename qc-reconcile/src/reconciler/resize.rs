//! Resize reconciler - changes the CPU/memory class.
//!
//! Resizing requires a stopped instance. A running instance is stopped,
//! resized and started again; every step is awaited and any failure aborts
//! the whole reconciler.

use async_trait::async_trait;
use tracing::info;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::model::{DeclaredResourceSpec, InstanceId, InstanceStatus, ObservedInstanceState};
use crate::poller;

pub struct ResizeReconciler;

#[async_trait]
impl AttributeReconciler for ResizeReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        if declared.cpu == observed.cpu && declared.memory == observed.memory {
            return Ok(Outcome::Unchanged);
        }
        info!(
            instance_id = %id,
            cpu = declared.cpu,
            memory = declared.memory,
            status = %observed.status,
            "Resizing instance"
        );

        let was_running = match observed.status {
            InstanceStatus::Running => true,
            InstanceStatus::Stopped => false,
            other => {
                return Err(ReconcileError::PreconditionViolation {
                    operation: "resize instance",
                    resource: id.to_string(),
                    reason: format!("cannot resize while {}", other),
                })
            }
        };

        if was_running {
            modify(ctx, "stop instance", id, Mutation::Stop).await?;
            poller::await_lifecycle(ctx, "stop instance", id).await?;
        }

        modify(
            ctx,
            "resize instance",
            id,
            Mutation::Resize {
                cpu: declared.cpu,
                memory: declared.memory,
            },
        )
        .await?;
        poller::await_lifecycle(ctx, "resize instance", id).await?;

        if was_running {
            modify(ctx, "start instance", id, Mutation::Start).await?;
            poller::await_lifecycle(ctx, "start instance", id).await?;
        }

        Ok(Outcome::Applied)
    }
}
