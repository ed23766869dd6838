//! Security group lifecycle.
//!
//! Security groups have no asynchronous transitions; every call still goes
//! through the retry executor.

use tracing::{info, warn};

use crate::context::Context;
use crate::error::{ReconcileError, Result};
use crate::model::{SecurityGroupSpec, SecurityGroupState};

pub struct SecurityGroupOrchestrator {
    ctx: Context,
}

impl SecurityGroupOrchestrator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Create the group, then converge its attributes.
    pub async fn create(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroupState> {
        if spec.name.is_empty() {
            return Err(ReconcileError::InvalidSpec(
                "security group name is required".to_string(),
            ));
        }
        let id = self
            .ctx
            .retry
            .execute("create security group", &spec.name, || {
                self.ctx.api.create_security_group(&spec.name)
            })
            .await?;
        info!(security_group_id = %id, name = %spec.name, "Security group created");
        self.update(&id, spec).await
    }

    pub async fn read(&self, id: &str) -> Result<Option<SecurityGroupState>> {
        self.ctx
            .retry
            .execute("describe security group", id, || {
                self.ctx.api.describe_security_group(id)
            })
            .await
    }

    /// Modify name and description where they differ, then read back.
    pub async fn update(&self, id: &str, spec: &SecurityGroupSpec) -> Result<SecurityGroupState> {
        let current = self.require(id, "update security group").await?;

        let name = (spec.name != current.name).then(|| spec.name.clone());
        let declared_description = spec.description.clone().unwrap_or_default();
        let description =
            (declared_description != current.description).then_some(declared_description);

        if name.is_some() || description.is_some() {
            self.ctx
                .retry
                .execute("modify security group", id, || {
                    self.ctx
                        .api
                        .modify_security_group_attributes(id, name.clone(), description.clone())
                })
                .await?;
            info!(security_group_id = %id, "Security group attributes updated");
        }

        self.require(id, "update security group").await
    }

    /// Delete the group. Refuses while any resource still uses it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(current) = self.read(id).await? else {
            info!(security_group_id = %id, "Security group already absent");
            return Ok(());
        };

        if !current.resource_ids.is_empty() {
            warn!(
                security_group_id = %id,
                resources = ?current.resource_ids,
                "Security group still in use"
            );
            return Err(ReconcileError::PreconditionViolation {
                operation: "delete security group",
                resource: id.to_string(),
                reason: format!(
                    "security group is in use by {}",
                    current.resource_ids.join(", ")
                ),
            });
        }

        self.ctx
            .retry
            .execute("delete security group", id, || {
                self.ctx.api.delete_security_group(id)
            })
            .await?;
        info!(security_group_id = %id, "Security group deleted");
        Ok(())
    }

    async fn require(&self, id: &str, operation: &'static str) -> Result<SecurityGroupState> {
        self.read(id).await?.ok_or_else(|| ReconcileError::Vanished {
            operation,
            resource: id.to_string(),
        })
    }
}
