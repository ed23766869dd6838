//! qc-reconcile: reconciles declared QingCloud instances with the control plane.
//!
//! - [`retry`]: re-issues single remote calls on transient errors
//! - [`poller`]: waits for asynchronous status transitions to settle
//! - [`reconciler`]: one reconciler per mutable attribute group
//! - [`lifecycle`]: Create/Read/Update/Delete orchestration for instances
//! - [`security_group`]: Create/Read/Update/Delete for security groups

pub mod clients;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod security_group;
pub mod tags;

pub use clients::{ApiError, CloudApi, Mutation, SimulatedCloud};
pub use config::ReconcileConfig;
pub use context::Context;
pub use error::{ReconcileError, Result};
pub use lifecycle::{InstanceOrchestrator, UpdateReport};
pub use model::{DeclaredResourceSpec, InstanceId, InstanceStatus, ObservedInstanceState};
pub use security_group::SecurityGroupOrchestrator;
