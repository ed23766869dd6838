//! Tag association hook.
//!
//! Tag bookkeeping lives outside this crate; the orchestrator only calls the
//! collaborator after the attribute reconcilers have run.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{InstanceId, Tag};

#[async_trait]
pub trait TagSync: Send + Sync {
    async fn sync_tags(&self, id: &InstanceId, declared: &BTreeSet<String>, observed: &[Tag])
        -> Result<()>;
}

/// Leaves tags untouched.
pub struct NoTagSync;

#[async_trait]
impl TagSync for NoTagSync {
    async fn sync_tags(
        &self,
        _id: &InstanceId,
        _declared: &BTreeSet<String>,
        _observed: &[Tag],
    ) -> Result<()> {
        Ok(())
    }
}
