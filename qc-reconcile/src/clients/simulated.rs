//! In-process control plane.
//!
//! Behaves like the remote API from the orchestrator's point of view:
//! mutations are accepted synchronously and complete after a configurable
//! number of describe calls. Every call is recorded, and faults can be
//! queued per call kind.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ApiError, CloudApi, Mutation, RunInstanceRequest};
use crate::model::{
    EipAttachment, InstanceId, InstanceStatus, NetworkStatus, ObservedInstanceState,
    SecurityGroupState, VxnetAttachment, VxnetType, DEFAULT_VXNET_ID,
};

/// Number of describe calls a transition reports its interim status for.
const DEFAULT_TRANSITION_DESCRIBES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    RunInstance,
    DescribeInstance,
    ModifyInstance,
    TerminateInstance,
    CreateSecurityGroup,
    DescribeSecurityGroup,
    ModifySecurityGroup,
    DeleteSecurityGroup,
}

/// A recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    RunInstance { request: RunInstanceRequest },
    DescribeInstance { id: InstanceId },
    ModifyInstance { id: InstanceId, mutation: Mutation },
    TerminateInstance { id: InstanceId },
    CreateSecurityGroup { name: String },
    DescribeSecurityGroup { id: String },
    ModifySecurityGroup {
        id: String,
        name: Option<String>,
        description: Option<String>,
    },
    DeleteSecurityGroup { id: String },
}

impl Call {
    pub fn kind(&self) -> CallKind {
        match self {
            Call::RunInstance { .. } => CallKind::RunInstance,
            Call::DescribeInstance { .. } => CallKind::DescribeInstance,
            Call::ModifyInstance { .. } => CallKind::ModifyInstance,
            Call::TerminateInstance { .. } => CallKind::TerminateInstance,
            Call::CreateSecurityGroup { .. } => CallKind::CreateSecurityGroup,
            Call::DescribeSecurityGroup { .. } => CallKind::DescribeSecurityGroup,
            Call::ModifySecurityGroup { .. } => CallKind::ModifySecurityGroup,
            Call::DeleteSecurityGroup { .. } => CallKind::DeleteSecurityGroup,
        }
    }

    /// Everything except describes changes remote state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::DescribeInstance { .. } | Call::DescribeSecurityGroup { .. }
        )
    }
}

struct Transition<T> {
    remaining: u32,
    target: T,
}

struct SimInstance {
    state: ObservedInstanceState,
    lifecycle: Option<Transition<InstanceStatus>>,
    network: Option<Transition<Option<VxnetAttachment>>>,
}

impl SimInstance {
    /// Advance pending transitions by one describe.
    fn tick(&mut self) {
        match self.lifecycle.take() {
            Some(t) if t.remaining == 0 => {
                self.state.status = t.target;
                if t.target.is_gone() {
                    self.state.vxnet = None;
                    self.state.eip = None;
                }
            }
            Some(mut t) => {
                t.remaining -= 1;
                self.lifecycle = Some(t);
            }
            None => {}
        }
        match self.network.take() {
            Some(t) if t.remaining == 0 => self.state.vxnet = t.target,
            Some(mut t) => {
                t.remaining -= 1;
                self.network = Some(t);
            }
            None => {}
        }
    }
}

struct SimSecurityGroup {
    name: String,
    description: String,
}

#[derive(Default)]
struct SimState {
    instances: HashMap<InstanceId, SimInstance>,
    security_groups: HashMap<String, SimSecurityGroup>,
    calls: Vec<Call>,
    faults: VecDeque<(CallKind, ApiError)>,
    queued_ids: VecDeque<String>,
    stalled: bool,
    next_address: u32,
}

impl SimState {
    /// Record the call, then fail it if a fault is queued for its kind.
    fn begin(&mut self, call: Call) -> Result<(), ApiError> {
        let kind = call.kind();
        self.calls.push(call);
        match self.faults.iter().position(|(k, _)| *k == kind) {
            Some(pos) => match self.faults.remove(pos) {
                Some((_, error)) => Err(error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn next_address(&mut self) -> u32 {
        self.next_address += 1;
        self.next_address
    }

    fn live_instance(&mut self, id: &InstanceId) -> Result<&mut SimInstance, ApiError> {
        match self.instances.get_mut(id) {
            Some(inst) if !inst.state.status.is_gone() => Ok(inst),
            _ => Err(ApiError::NotFound(id.to_string())),
        }
    }
}

/// Simulated control plane.
pub struct SimulatedCloud {
    state: Mutex<SimState>,
    transition_describes: u32,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::with_transition_describes(DEFAULT_TRANSITION_DESCRIBES)
    }

    /// Transitions report their interim status for `describes` describe calls
    /// before settling.
    pub fn with_transition_describes(describes: u32) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            transition_describes: describes,
        }
    }

    /// Id handed out by the next run-instance call.
    pub async fn queue_instance_id(&self, id: &str) {
        self.state.lock().await.queued_ids.push_back(id.to_string());
    }

    /// Fail the next call of `kind` with `error`.
    pub async fn inject_fault(&self, kind: CallKind, error: ApiError) {
        self.state.lock().await.faults.push_back((kind, error));
    }

    /// While stalled, pending transitions never settle.
    pub async fn set_stalled(&self, stalled: bool) {
        self.state.lock().await.stalled = stalled;
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutations(&self) -> Vec<Call> {
        self.calls()
            .await
            .into_iter()
            .filter(Call::is_mutation)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Current state without recording a call or advancing transitions.
    pub async fn peek(&self, id: &InstanceId) -> Option<ObservedInstanceState> {
        self.state
            .lock()
            .await
            .instances
            .get(id)
            .map(|i| i.state.clone())
    }

    /// Force an instance into `status`, dropping any pending lifecycle transition.
    pub async fn set_status(&self, id: &InstanceId, status: InstanceStatus) {
        if let Some(inst) = self.state.lock().await.instances.get_mut(id) {
            inst.state.status = status;
            inst.lifecycle = None;
        }
    }

    /// Remove an instance as if it was deleted out of band.
    pub async fn forget(&self, id: &InstanceId) {
        self.state.lock().await.instances.remove(id);
    }

    fn lifecycle(&self, target: InstanceStatus) -> Option<Transition<InstanceStatus>> {
        Some(Transition {
            remaining: self.transition_describes,
            target,
        })
    }
}

#[async_trait]
impl CloudApi for SimulatedCloud {
    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<InstanceId, ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::RunInstance {
            request: request.clone(),
        })?;
        if request.image_id.is_empty() {
            return Err(ApiError::InvalidParameter("image_id is required".to_string()));
        }

        let id = match st.queued_ids.pop_front() {
            Some(id) => InstanceId::new(id),
            None => InstanceId::new(format!("i-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])),
        };
        debug!(instance_id = %id, "simulated run_instance");

        let state = ObservedInstanceState {
            id: id.clone(),
            name: request.name.clone().unwrap_or_default(),
            description: String::new(),
            image_id: request.image_id.clone(),
            status: InstanceStatus::Pending,
            cpu: request.cpu,
            memory: request.memory,
            vxnet: None,
            eip: None,
            security_group_id: Some(request.security_group_id.clone()),
            keypair_ids: request.login_keypair.iter().cloned().collect::<BTreeSet<_>>(),
            tags: vec![],
            fetched_at: Utc::now(),
        };
        st.instances.insert(
            id.clone(),
            SimInstance {
                state,
                lifecycle: self.lifecycle(InstanceStatus::Running),
                network: None,
            },
        );
        Ok(id)
    }

    async fn describe_instance(
        &self,
        id: &InstanceId,
    ) -> Result<Option<ObservedInstanceState>, ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::DescribeInstance { id: id.clone() })?;
        let stalled = st.stalled;
        Ok(st.instances.get_mut(id).map(|inst| {
            if !stalled {
                inst.tick();
            }
            let mut state = inst.state.clone();
            state.fetched_at = Utc::now();
            state
        }))
    }

    async fn modify_instance(&self, id: &InstanceId, mutation: Mutation) -> Result<(), ApiError> {
        let describes = self.transition_describes;
        let mut st = self.state.lock().await;
        st.begin(Call::ModifyInstance {
            id: id.clone(),
            mutation: mutation.clone(),
        })?;
        let address = st.next_address();
        let inst = st.live_instance(id)?;
        if inst.state.status.is_transitional() {
            return Err(ApiError::Conflict(format!(
                "instance {} is {}",
                id, inst.state.status
            )));
        }

        match mutation {
            Mutation::ModifyAttributes { name, description } => {
                if let Some(name) = name {
                    inst.state.name = name;
                }
                if let Some(description) = description {
                    inst.state.description = description;
                }
            }
            Mutation::JoinVxnet {
                vxnet_id,
                static_ip,
            } => {
                if inst.state.vxnet.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "instance {} is already in a vxnet",
                        id
                    )));
                }
                let vxnet_type = if vxnet_id == DEFAULT_VXNET_ID {
                    VxnetType::Basic
                } else {
                    VxnetType::Managed
                };
                let attachment = VxnetAttachment {
                    vxnet_id,
                    vxnet_type,
                    private_ip: Some(
                        static_ip.unwrap_or_else(|| format!("192.168.0.{}", address % 250 + 2)),
                    ),
                    status: NetworkStatus::Joining,
                };
                inst.state.vxnet = Some(attachment.clone());
                inst.network = Some(Transition {
                    remaining: describes,
                    target: Some(VxnetAttachment {
                        status: NetworkStatus::Attached,
                        ..attachment
                    }),
                });
            }
            Mutation::LeaveVxnet { vxnet_id } => {
                if inst.network.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "instance {} has a pending vxnet change",
                        id
                    )));
                }
                if inst.state.eip.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "dissociate the eip of {} before leaving {}",
                        id, vxnet_id
                    )));
                }
                match inst.state.vxnet.as_mut() {
                    Some(v) if v.vxnet_id == vxnet_id => v.status = NetworkStatus::Leaving,
                    _ => return Err(ApiError::NotFound(vxnet_id)),
                }
                inst.network = Some(Transition {
                    remaining: describes,
                    target: None,
                });
            }
            Mutation::ApplySecurityGroup { security_group_id } => {
                inst.state.security_group_id = Some(security_group_id);
            }
            Mutation::AssociateEip { eip_id } => {
                if inst.state.eip.is_some() {
                    return Err(ApiError::Conflict(format!(
                        "instance {} already has an eip",
                        id
                    )));
                }
                inst.state.eip = Some(EipAttachment {
                    eip_id,
                    address: format!("139.198.{}.{}", address / 250, address % 250 + 1),
                });
            }
            Mutation::DissociateEip { eip_id } => match inst.state.eip_id() {
                Some(current) if current == eip_id => inst.state.eip = None,
                Some(_) => return Err(ApiError::NotFound(eip_id)),
                None => {}
            },
            Mutation::AttachKeyPairs { keypair_ids } => {
                inst.state.keypair_ids.extend(keypair_ids);
            }
            Mutation::DetachKeyPairs { keypair_ids } => {
                for kp in &keypair_ids {
                    inst.state.keypair_ids.remove(kp);
                }
            }
            Mutation::Stop => {
                if inst.state.status != InstanceStatus::Running {
                    return Err(ApiError::Conflict(format!(
                        "cannot stop {} while {}",
                        id, inst.state.status
                    )));
                }
                inst.state.status = InstanceStatus::Stopping;
                inst.lifecycle = Some(Transition {
                    remaining: describes,
                    target: InstanceStatus::Stopped,
                });
            }
            Mutation::Start => {
                if inst.state.status != InstanceStatus::Stopped {
                    return Err(ApiError::Conflict(format!(
                        "cannot start {} while {}",
                        id, inst.state.status
                    )));
                }
                inst.state.status = InstanceStatus::Starting;
                inst.lifecycle = Some(Transition {
                    remaining: describes,
                    target: InstanceStatus::Running,
                });
            }
            Mutation::Resize { cpu, memory } => {
                if inst.state.status != InstanceStatus::Stopped {
                    return Err(ApiError::Conflict(format!(
                        "instance {} must be stopped to resize",
                        id
                    )));
                }
                inst.state.cpu = cpu;
                inst.state.memory = memory;
                inst.state.status = InstanceStatus::Resizing;
                inst.lifecycle = Some(Transition {
                    remaining: describes,
                    target: InstanceStatus::Stopped,
                });
            }
        }
        Ok(())
    }

    async fn terminate_instance(&self, id: &InstanceId) -> Result<(), ApiError> {
        let describes = self.transition_describes;
        let mut st = self.state.lock().await;
        st.begin(Call::TerminateInstance { id: id.clone() })?;
        let inst = st.live_instance(id)?;
        if inst.state.status.is_transitional() {
            return Err(ApiError::Conflict(format!(
                "instance {} is {}",
                id, inst.state.status
            )));
        }
        if inst.state.has_non_default_vxnet() {
            return Err(ApiError::Conflict(format!(
                "instance {} must leave its vxnet before termination",
                id
            )));
        }
        inst.state.status = InstanceStatus::Terminating;
        inst.lifecycle = Some(Transition {
            remaining: describes,
            target: InstanceStatus::Terminated,
        });
        Ok(())
    }

    async fn create_security_group(&self, name: &str) -> Result<String, ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::CreateSecurityGroup {
            name: name.to_string(),
        })?;
        let id = format!("sg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        st.security_groups.insert(
            id.clone(),
            SimSecurityGroup {
                name: name.to_string(),
                description: String::new(),
            },
        );
        Ok(id)
    }

    async fn describe_security_group(
        &self,
        id: &str,
    ) -> Result<Option<SecurityGroupState>, ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::DescribeSecurityGroup { id: id.to_string() })?;
        let Some(sg) = st.security_groups.get(id) else {
            return Ok(None);
        };
        let mut resource_ids: Vec<String> = st
            .instances
            .values()
            .filter(|i| !i.state.status.is_gone())
            .filter(|i| i.state.security_group_id.as_deref() == Some(id))
            .map(|i| i.state.id.to_string())
            .collect();
        resource_ids.sort();
        Ok(Some(SecurityGroupState {
            id: id.to_string(),
            name: sg.name.clone(),
            description: sg.description.clone(),
            resource_ids,
            tags: vec![],
        }))
    }

    async fn modify_security_group_attributes(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<(), ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::ModifySecurityGroup {
            id: id.to_string(),
            name: name.clone(),
            description: description.clone(),
        })?;
        let sg = st
            .security_groups
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        if let Some(name) = name {
            sg.name = name;
        }
        if let Some(description) = description {
            sg.description = description;
        }
        Ok(())
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), ApiError> {
        let mut st = self.state.lock().await;
        st.begin(Call::DeleteSecurityGroup { id: id.to_string() })?;
        let in_use = st.instances.values().any(|i| {
            !i.state.status.is_gone() && i.state.security_group_id.as_deref() == Some(id)
        });
        if in_use {
            return Err(ApiError::InUse(id.to_string()));
        }
        st.security_groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }
}
