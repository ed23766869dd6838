//! Control plane API boundary.
//!
//! `CloudApi` is the contract the orchestrators use to talk to the remote
//! control plane:
//! - instances: run, describe, modify, terminate
//! - security groups: create, describe, modify, delete
//!
//! Each call maps to exactly one remote request. `SimulatedCloud` is an
//! in-process implementation with asynchronous transitions.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{InstanceId, ObservedInstanceState, SecurityGroupState};

pub use simulated::{Call, CallKind, SimulatedCloud};

/// Error returned by a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("server busy: {0}")]
    ServerBusy(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource in use: {0}")]
    InUse(String),

    #[error("unexpected response (code {code}): {message}")]
    Unexpected { code: i32, message: String },
}

/// Retry classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Safe to re-issue: the backend refused the call without acting on it.
    Transient,
    Permanent,
}

impl ApiError {
    /// Only overload and rate-limit responses are worth retrying.
    pub fn classify(&self) -> ErrorClass {
        match self {
            ApiError::ServerBusy(_) | ApiError::RateLimited(_) => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// Parameters of a run-instances call. Always launches exactly one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstanceRequest {
    pub name: Option<String>,
    pub image_id: String,
    pub cpu: u32,
    pub memory: u32,
    pub security_group_id: String,
    /// Key pair used for keypair login mode.
    pub login_keypair: Option<String>,
}

/// A single mutation of a live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Mutation {
    ModifyAttributes {
        name: Option<String>,
        description: Option<String>,
    },
    JoinVxnet {
        vxnet_id: String,
        static_ip: Option<String>,
    },
    LeaveVxnet {
        vxnet_id: String,
    },
    ApplySecurityGroup {
        security_group_id: String,
    },
    AssociateEip {
        eip_id: String,
    },
    DissociateEip {
        eip_id: String,
    },
    AttachKeyPairs {
        keypair_ids: Vec<String>,
    },
    DetachKeyPairs {
        keypair_ids: Vec<String>,
    },
    Stop,
    Start,
    Resize {
        cpu: u32,
        memory: u32,
    },
}

impl Mutation {
    pub fn action(&self) -> &'static str {
        match self {
            Mutation::ModifyAttributes { .. } => "modify_attributes",
            Mutation::JoinVxnet { .. } => "join_vxnet",
            Mutation::LeaveVxnet { .. } => "leave_vxnet",
            Mutation::ApplySecurityGroup { .. } => "apply_security_group",
            Mutation::AssociateEip { .. } => "associate_eip",
            Mutation::DissociateEip { .. } => "dissociate_eip",
            Mutation::AttachKeyPairs { .. } => "attach_keypairs",
            Mutation::DetachKeyPairs { .. } => "detach_keypairs",
            Mutation::Stop => "stop",
            Mutation::Start => "start",
            Mutation::Resize { .. } => "resize",
        }
    }
}

/// Remote calls against the control plane.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Launch one instance and return its id.
    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<InstanceId, ApiError>;

    /// Fetch the current state, `None` if the instance does not exist.
    async fn describe_instance(
        &self,
        id: &InstanceId,
    ) -> Result<Option<ObservedInstanceState>, ApiError>;

    async fn modify_instance(&self, id: &InstanceId, mutation: Mutation) -> Result<(), ApiError>;

    async fn terminate_instance(&self, id: &InstanceId) -> Result<(), ApiError>;

    async fn create_security_group(&self, name: &str) -> Result<String, ApiError>;

    /// Fetch a security group including the resources using it.
    async fn describe_security_group(
        &self,
        id: &str,
    ) -> Result<Option<SecurityGroupState>, ApiError>;

    async fn modify_security_group_attributes(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<(), ApiError>;

    async fn delete_security_group(&self, id: &str) -> Result<(), ApiError>;
}
