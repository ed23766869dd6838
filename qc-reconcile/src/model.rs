//! Declared and observed instance state.
//!
//! `DeclaredResourceSpec` is what the caller wants; `ObservedInstanceState`
//! is what the control plane reported on the last describe call. The two are
//! only ever correlated through an [`InstanceId`].

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// The platform's default (basic) network.
pub const DEFAULT_VXNET_ID: &str = "vxnet-0";

/// Allowed CPU core counts.
pub const VALID_CPUS: [u32; 5] = [1, 2, 4, 8, 16];

/// Allowed memory sizes in MB.
pub const VALID_MEMORY_MB: [u32; 9] = [1024, 2048, 4096, 6144, 8192, 12288, 16384, 24576, 32768];

/// Identifier assigned by the control plane when an instance is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle status of an instance as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Restarting,
    Resizing,
    Suspended,
    Terminating,
    Terminated,
    Ceased,
}

impl InstanceStatus {
    /// Statuses after which further mutation is unsafe until they resolve.
    pub const TRANSITIONAL: [InstanceStatus; 6] = [
        InstanceStatus::Pending,
        InstanceStatus::Starting,
        InstanceStatus::Stopping,
        InstanceStatus::Restarting,
        InstanceStatus::Resizing,
        InstanceStatus::Terminating,
    ];

    pub fn is_transitional(self) -> bool {
        Self::TRANSITIONAL.contains(&self)
    }

    /// Terminated and ceased instances are treated as no longer existing.
    pub fn is_gone(self) -> bool {
        matches!(self, InstanceStatus::Terminated | InstanceStatus::Ceased)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Resizing => "resizing",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Terminating => "terminating",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Ceased => "ceased",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the instance's vxnet membership. Joining and leaving run as a
/// separate asynchronous process from the instance lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Detached,
    Joining,
    Attached,
    Leaving,
}

impl NetworkStatus {
    pub const TRANSITIONAL: [NetworkStatus; 2] = [NetworkStatus::Joining, NetworkStatus::Leaving];
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkStatus::Detached => "detached",
            NetworkStatus::Joining => "joining",
            NetworkStatus::Attached => "attached",
            NetworkStatus::Leaving => "leaving",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VxnetType {
    /// Managed by the user, with DHCP from the platform router.
    Managed,
    /// The platform's basic network.
    Basic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VxnetAttachment {
    pub vxnet_id: String,
    pub vxnet_type: VxnetType,
    pub private_ip: Option<String>,
    pub status: NetworkStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EipAttachment {
    pub eip_id: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_id: String,
    pub tag_name: String,
}

/// Target state declared by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaredResourceSpec {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_id: String,
    pub cpu: u32,
    pub memory: u32,
    pub managed_vxnet_id: Option<String>,
    pub static_ip: Option<String>,
    pub security_group_id: String,
    pub eip_id: Option<String>,
    pub keypair_ids: BTreeSet<String>,
    /// Carried for callers that manage volume attachment themselves; no
    /// reconciler acts on it.
    pub volume_ids: BTreeSet<String>,
    pub tag_ids: BTreeSet<String>,
}

impl DeclaredResourceSpec {
    /// Reject specs the control plane would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.image_id.is_empty() {
            return Err(ReconcileError::InvalidSpec("image_id is required".to_string()));
        }
        if self.security_group_id.is_empty() {
            return Err(ReconcileError::InvalidSpec(
                "security_group_id is required".to_string(),
            ));
        }
        if !VALID_CPUS.contains(&self.cpu) {
            return Err(ReconcileError::InvalidSpec(format!(
                "cpu must be one of {:?}, got {}",
                VALID_CPUS, self.cpu
            )));
        }
        if !VALID_MEMORY_MB.contains(&self.memory) {
            return Err(ReconcileError::InvalidSpec(format!(
                "memory must be one of {:?}, got {}",
                VALID_MEMORY_MB, self.memory
            )));
        }
        Ok(())
    }

    /// Declared vxnet, with an empty string meaning "none".
    pub fn vxnet(&self) -> Option<&str> {
        self.managed_vxnet_id.as_deref().filter(|v| !v.is_empty())
    }

    /// Declared elastic IP, with an empty string meaning "none".
    pub fn eip(&self) -> Option<&str> {
        self.eip_id.as_deref().filter(|v| !v.is_empty())
    }

    /// Key pair used as the login credential at creation time.
    pub fn login_keypair(&self) -> Option<&str> {
        self.keypair_ids.iter().next().map(String::as_str)
    }
}

/// Remote state as of one describe call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedInstanceState {
    pub id: InstanceId,
    pub name: String,
    pub description: String,
    pub image_id: String,
    pub status: InstanceStatus,
    pub cpu: u32,
    pub memory: u32,
    pub vxnet: Option<VxnetAttachment>,
    pub eip: Option<EipAttachment>,
    pub security_group_id: Option<String>,
    pub keypair_ids: BTreeSet<String>,
    pub tags: Vec<Tag>,
    pub fetched_at: DateTime<Utc>,
}

impl ObservedInstanceState {
    /// Vxnet id as the caller declares it; the basic network reports as `vxnet-0`.
    pub fn managed_vxnet_id(&self) -> Option<&str> {
        self.vxnet.as_ref().map(|v| match v.vxnet_type {
            VxnetType::Basic => DEFAULT_VXNET_ID,
            VxnetType::Managed => v.vxnet_id.as_str(),
        })
    }

    /// True when the instance sits in a vxnet other than the default one.
    pub fn has_non_default_vxnet(&self) -> bool {
        self.managed_vxnet_id()
            .is_some_and(|id| id != DEFAULT_VXNET_ID)
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.vxnet
            .as_ref()
            .map(|v| v.status)
            .unwrap_or(NetworkStatus::Detached)
    }

    pub fn eip_id(&self) -> Option<&str> {
        self.eip.as_ref().map(|e| e.eip_id.as_str())
    }

    pub fn private_ip(&self) -> Option<&str> {
        self.vxnet.as_ref().and_then(|v| v.private_ip.as_deref())
    }

    pub fn public_ip(&self) -> Option<&str> {
        self.eip.as_ref().map(|e| e.address.as_str())
    }
}

/// Desired state of a security group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: Option<String>,
}

/// Remote state of a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupState {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Resources (instances) currently using the group.
    pub resource_ids: Vec<String>,
    pub tags: Vec<Tag>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DeclaredResourceSpec {
        DeclaredResourceSpec {
            image_id: "img-1".to_string(),
            cpu: 2,
            memory: 2048,
            security_group_id: "sg-1".to_string(),
            ..Default::default()
        }
    }

    fn observed(vxnet: Option<VxnetAttachment>) -> ObservedInstanceState {
        ObservedInstanceState {
            id: InstanceId::from("i-1"),
            name: String::new(),
            description: String::new(),
            image_id: "img-1".to_string(),
            status: InstanceStatus::Running,
            cpu: 1,
            memory: 1024,
            vxnet,
            eip: None,
            security_group_id: None,
            keypair_ids: BTreeSet::new(),
            tags: vec![],
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_accepts_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_cpu() {
        let mut s = spec();
        s.cpu = 3;
        match s.validate() {
            Err(ReconcileError::InvalidSpec(msg)) => assert!(msg.contains("cpu")),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_memory() {
        let mut s = spec();
        s.memory = 3000;
        assert!(matches!(s.validate(), Err(ReconcileError::InvalidSpec(_))));
    }

    #[test]
    fn test_validate_requires_image_and_security_group() {
        let mut s = spec();
        s.image_id.clear();
        assert!(s.validate().is_err());

        let mut s = spec();
        s.security_group_id.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_transitional_statuses() {
        assert!(InstanceStatus::Pending.is_transitional());
        assert!(InstanceStatus::Terminating.is_transitional());
        assert!(!InstanceStatus::Running.is_transitional());
        assert!(!InstanceStatus::Stopped.is_transitional());
        assert!(InstanceStatus::Ceased.is_gone());
        assert!(!InstanceStatus::Suspended.is_gone());
    }

    #[test]
    fn test_basic_vxnet_reports_as_default() {
        let o = observed(Some(VxnetAttachment {
            vxnet_id: "vxnet-basic-xyz".to_string(),
            vxnet_type: VxnetType::Basic,
            private_ip: Some("10.0.0.2".to_string()),
            status: NetworkStatus::Attached,
        }));
        assert_eq!(o.managed_vxnet_id(), Some(DEFAULT_VXNET_ID));
        assert!(!o.has_non_default_vxnet());
        assert_eq!(o.private_ip(), Some("10.0.0.2"));
    }

    #[test]
    fn test_managed_vxnet_reports_its_id() {
        let o = observed(Some(VxnetAttachment {
            vxnet_id: "vxnet-abc".to_string(),
            vxnet_type: VxnetType::Managed,
            private_ip: None,
            status: NetworkStatus::Joining,
        }));
        assert_eq!(o.managed_vxnet_id(), Some("vxnet-abc"));
        assert!(o.has_non_default_vxnet());
        assert_eq!(o.network_status(), NetworkStatus::Joining);
        assert_eq!(observed(None).network_status(), NetworkStatus::Detached);
    }

    #[test]
    fn test_empty_declared_ids_mean_none() {
        let mut s = spec();
        s.managed_vxnet_id = Some(String::new());
        s.eip_id = Some(String::new());
        assert_eq!(s.vxnet(), None);
        assert_eq!(s.eip(), None);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let s: DeclaredResourceSpec = serde_json::from_str(
            r#"{"image_id":"img-1","cpu":2,"memory":2048,"security_group_id":"sg-1","keypair_ids":["kp-2","kp-1"]}"#,
        )
        .unwrap();
        assert_eq!(s.login_keypair(), Some("kp-1"));
        assert!(s.volume_ids.is_empty());
        assert_eq!(s.name, None);
    }
}
