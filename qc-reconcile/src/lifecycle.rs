//! Instance lifecycle orchestrator.
//!
//! ```text
//! [absent] -> creating -> running <-> (update cycles) -> terminating -> [absent]
//! ```
//!
//! Every step runs strictly in sequence: the status a step waits for is the
//! precondition of the next one. Callers must not run two orchestrations
//! against the same instance id at once.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::clients::{Mutation, RunInstanceRequest};
use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};
use crate::poller::{self, LifecycleProbe, NetworkProbe, PollOutcome, TransitionRequest};
use crate::reconciler::{self, AttributeStep, Outcome, UPDATE_ORDER};
use crate::tags::{NoTagSync, TagSync};

/// Steps of Delete. Attachments are released in reverse dependency order:
/// elastic IP, then vxnet membership, then the instance itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    DissociateEip,
    AwaitLifecycle,
    LeaveVxnet,
    AwaitNetwork,
    Terminate,
    AwaitTerminated,
}

pub const TEARDOWN_ORDER: [TeardownStep; 6] = [
    TeardownStep::DissociateEip,
    TeardownStep::AwaitLifecycle,
    TeardownStep::LeaveVxnet,
    TeardownStep::AwaitNetwork,
    TeardownStep::Terminate,
    TeardownStep::AwaitTerminated,
];

/// Result of an Update run.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    /// Steps that issued at least one remote mutation, in execution order.
    pub applied: Vec<AttributeStep>,
    /// State read back after all steps completed.
    pub observed: ObservedInstanceState,
}

/// Drives Create, Read, Update and Delete for one instance resource.
pub struct InstanceOrchestrator {
    ctx: Context,
    tags: Arc<dyn TagSync>,
}

impl InstanceOrchestrator {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            tags: Arc::new(NoTagSync),
        }
    }

    pub fn with_tag_sync(mut self, tags: Arc<dyn TagSync>) -> Self {
        self.tags = tags;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Launch an instance, wait for it to settle and join the declared vxnet.
    ///
    /// A failure after launch leaves the instance in place; cleaning it up is
    /// up to the caller.
    pub async fn create(&self, declared: &DeclaredResourceSpec) -> Result<ObservedInstanceState> {
        declared.validate()?;

        let request = RunInstanceRequest {
            name: declared.name.clone(),
            image_id: declared.image_id.clone(),
            cpu: declared.cpu,
            memory: declared.memory,
            security_group_id: declared.security_group_id.clone(),
            login_keypair: declared.login_keypair().map(str::to_string),
        };
        let label = declared.name.as_deref().unwrap_or(&declared.image_id);
        let id = self
            .ctx
            .retry
            .execute("run instance", label, || self.ctx.api.run_instance(&request))
            .await?;
        info!(instance_id = %id, image_id = %declared.image_id, "Instance launched");

        let observed = poller::await_lifecycle(&self.ctx, "create instance", &id).await?;

        // A fresh instance has no membership to diff against, so this is
        // part of create rather than update.
        AttributeStep::Vxnet
            .reconciler()
            .reconcile(&self.ctx, &id, declared, &observed)
            .await?;

        let observed = self.require(&id, "create instance").await?;
        info!(instance_id = %id, status = %observed.status, "Instance created");
        Ok(observed)
    }

    /// Fetch the current state. `None` means the instance no longer exists.
    pub async fn read(&self, id: &InstanceId) -> Result<Option<ObservedInstanceState>> {
        let observed = self
            .ctx
            .retry
            .execute("describe instance", id.as_str(), || {
                self.ctx.api.describe_instance(id)
            })
            .await?;
        Ok(observed.filter(|o| !o.status.is_gone()))
    }

    /// Run every attribute reconciler in [`UPDATE_ORDER`], stopping at the
    /// first failure. Steps already applied are not rolled back.
    pub async fn update(
        &self,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
    ) -> Result<UpdateReport> {
        declared.validate()?;
        info!(instance_id = %id, "Updating instance");

        let mut observed = poller::await_lifecycle(&self.ctx, "update instance", id).await?;

        let mut applied = Vec::new();
        for step in UPDATE_ORDER {
            let outcome = step
                .reconciler()
                .reconcile(&self.ctx, id, declared, &observed)
                .await
                .map_err(|e| {
                    error!(instance_id = %id, step = step.name(), error = %e, "Update aborted");
                    e
                })?;
            debug!(instance_id = %id, step = step.name(), ?outcome, "Step reconciled");
            if outcome == Outcome::Applied {
                applied.push(step);
                // Later steps diff against what this one left behind.
                observed = poller::await_lifecycle(&self.ctx, "update instance", id).await?;
            }
        }

        self.tags
            .sync_tags(id, &declared.tag_ids, &observed.tags)
            .await?;

        let observed = self.require(id, "update instance").await?;
        info!(instance_id = %id, applied = applied.len(), "Instance updated");
        Ok(UpdateReport { applied, observed })
    }

    /// Tear the instance down in [`TEARDOWN_ORDER`].
    ///
    /// Safe to call again after a failure; deleting an absent instance is a
    /// no-op.
    pub async fn delete(&self, id: &InstanceId) -> Result<()> {
        let Some(mut observed) = self.read(id).await? else {
            info!(instance_id = %id, "Instance already absent");
            return Ok(());
        };

        for step in TEARDOWN_ORDER {
            debug!(instance_id = %id, ?step, "Teardown step");
            match self.teardown(step, id, &observed).await {
                Ok(Some(fresh)) => observed = fresh,
                Ok(None) => break,
                Err(e) => {
                    error!(instance_id = %id, ?step, error = %e, "Delete aborted");
                    return Err(e);
                }
            }
        }

        info!(instance_id = %id, "Instance deleted");
        Ok(())
    }

    /// Run one teardown step. `None` means the instance is gone.
    async fn teardown(
        &self,
        step: TeardownStep,
        id: &InstanceId,
        observed: &ObservedInstanceState,
    ) -> Result<Option<ObservedInstanceState>> {
        let ctx = &self.ctx;
        match step {
            TeardownStep::DissociateEip => {
                if let Some(eip_id) = observed.eip_id() {
                    reconciler::modify(
                        ctx,
                        "dissociate eip",
                        id,
                        Mutation::DissociateEip {
                            eip_id: eip_id.to_string(),
                        },
                    )
                    .await?;
                }
                Ok(Some(observed.clone()))
            }
            TeardownStep::AwaitLifecycle => {
                let request = TransitionRequest::teardown(id, &ctx.lifecycle_poll);
                match poller::wait_for::<LifecycleProbe>(ctx, "delete instance", &request).await? {
                    PollOutcome::Resolved { observed, .. } => Ok(Some(observed)),
                    PollOutcome::Absent => Ok(None),
                }
            }
            TeardownStep::LeaveVxnet => {
                if observed.has_non_default_vxnet() {
                    if let Some(vxnet) = &observed.vxnet {
                        reconciler::modify(
                            ctx,
                            "leave vxnet",
                            id,
                            Mutation::LeaveVxnet {
                                vxnet_id: vxnet.vxnet_id.clone(),
                            },
                        )
                        .await?;
                    }
                }
                Ok(Some(observed.clone()))
            }
            TeardownStep::AwaitNetwork => {
                let request = TransitionRequest::network(id, &ctx.network_poll)
                    .on_absent(poller::AbsentPolicy::Terminal);
                match poller::wait_for::<NetworkProbe>(ctx, "delete instance", &request).await? {
                    PollOutcome::Resolved { observed, .. } => Ok(Some(observed)),
                    PollOutcome::Absent => Ok(None),
                }
            }
            TeardownStep::Terminate => {
                ctx.retry
                    .execute("terminate instance", id.as_str(), || {
                        ctx.api.terminate_instance(id)
                    })
                    .await?;
                Ok(Some(observed.clone()))
            }
            TeardownStep::AwaitTerminated => {
                let request = TransitionRequest::teardown(id, &ctx.lifecycle_poll);
                match poller::wait_for::<LifecycleProbe>(ctx, "delete instance", &request).await? {
                    PollOutcome::Resolved { status, .. } => Err(ReconcileError::TransitionFailed {
                        operation: "delete instance",
                        resource: id.to_string(),
                        status: status.to_string(),
                    }),
                    PollOutcome::Absent => Ok(None),
                }
            }
        }
    }

    async fn require(
        &self,
        id: &InstanceId,
        operation: &'static str,
    ) -> Result<ObservedInstanceState> {
        self.read(id).await?.ok_or_else(|| ReconcileError::Vanished {
            operation,
            resource: id.to_string(),
        })
    }
}
