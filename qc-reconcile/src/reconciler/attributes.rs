//! Core attribute reconciler - instance name and description.

use async_trait::async_trait;

use super::{modify, AttributeReconciler, Outcome};
use crate::clients::Mutation;
use crate::context::Context;
use crate::error::Result;
use crate::model::{DeclaredResourceSpec, InstanceId, ObservedInstanceState};

pub struct CoreAttributesReconciler;

#[async_trait]
impl AttributeReconciler for CoreAttributesReconciler {
    async fn reconcile(
        &self,
        ctx: &Context,
        id: &InstanceId,
        declared: &DeclaredResourceSpec,
        observed: &ObservedInstanceState,
    ) -> Result<Outcome> {
        let name = changed(declared.name.as_deref(), &observed.name);
        let description = changed(declared.description.as_deref(), &observed.description);
        if name.is_none() && description.is_none() {
            return Ok(Outcome::Unchanged);
        }

        modify(
            ctx,
            "modify instance attributes",
            id,
            Mutation::ModifyAttributes { name, description },
        )
        .await?;
        Ok(Outcome::Applied)
    }
}

/// Declared value if it differs from the observed one. Unset means empty.
fn changed(declared: Option<&str>, observed: &str) -> Option<String> {
    let declared = declared.unwrap_or_default();
    (declared != observed).then(|| declared.to_string())
}
