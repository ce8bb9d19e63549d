//! Dispatch table from `(action, apiVersion, kind)` to a cluster operation.

use std::collections::HashMap;
use std::fmt;

use castor_api::resources::{
    APPS_V1BETA1_DEPLOYMENTS, CORE_V1_PERSISTENT_VOLUME_CLAIMS, CORE_V1_PODS, CORE_V1_SERVICES,
    EXTENSIONS_V1BETA1_DEPLOYMENTS, OPENEBS_V1ALPHA1_STORAGE_POOLS,
};
use castor_api::ResourceRef;
use castor_types::TaskAction;
use once_cell::sync::Lazy;

use crate::EngineError;

/// Identity of a dispatch: action plus resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub action: TaskAction,
    pub api_version: String,
    /// Lowercased kind.
    pub kind: String,
}

impl DispatchKey {
    pub fn new(action: TaskAction, api_version: &str, kind: &str) -> Self {
        Self {
            action,
            api_version: api_version.trim().to_string(),
            kind: kind.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.action, self.api_version, self.kind)
    }
}

/// What a task does against the cluster once its key is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Render the body as the object and create it.
    Create(ResourceRef),
    /// Patch `objectName` with the task's patch.
    Patch(ResourceRef),
    /// Delete every comma-separated `objectName`.
    Delete(ResourceRef),
    /// List per run namespace.
    List(ResourceRef),
    /// Get `objectName`.
    Get(ResourceRef),
}

impl Operation {
    pub fn resource(&self) -> &ResourceRef {
        match self {
            Operation::Create(resource)
            | Operation::Patch(resource)
            | Operation::Delete(resource)
            | Operation::List(resource)
            | Operation::Get(resource) => resource,
        }
    }
}

static DISPATCH_TABLE: Lazy<HashMap<DispatchKey, Operation>> = Lazy::new(|| {
    let deployments = [APPS_V1BETA1_DEPLOYMENTS, EXTENSIONS_V1BETA1_DEPLOYMENTS];
    let mut table = HashMap::new();
    let mut register = |action: TaskAction, resource: ResourceRef, operation: Operation| {
        table.insert(DispatchKey::new(action, &resource.api_version(), resource.kind), operation);
    };

    for deployment in deployments {
        register(TaskAction::Put, deployment, Operation::Create(deployment));
        register(TaskAction::Patch, deployment, Operation::Patch(deployment));
        register(TaskAction::Delete, deployment, Operation::Delete(deployment));
        register(TaskAction::List, deployment, Operation::List(deployment));
    }
    register(TaskAction::Put, CORE_V1_SERVICES, Operation::Create(CORE_V1_SERVICES));
    register(TaskAction::Delete, CORE_V1_SERVICES, Operation::Delete(CORE_V1_SERVICES));
    register(TaskAction::List, CORE_V1_SERVICES, Operation::List(CORE_V1_SERVICES));
    register(TaskAction::List, CORE_V1_PODS, Operation::List(CORE_V1_PODS));
    register(TaskAction::Get, OPENEBS_V1ALPHA1_STORAGE_POOLS, Operation::Get(OPENEBS_V1ALPHA1_STORAGE_POOLS));
    register(
        TaskAction::Get,
        CORE_V1_PERSISTENT_VOLUME_CLAIMS,
        Operation::Get(CORE_V1_PERSISTENT_VOLUME_CLAIMS),
    );
    table
});

/// Resolve the operation for a task; unknown keys are [`EngineError::Dispatch`].
pub fn resolve(action: TaskAction, api_version: &str, kind: &str) -> Result<Operation, EngineError> {
    let key = DispatchKey::new(action, api_version, kind);
    DISPATCH_TABLE
        .get(&key)
        .copied()
        .ok_or_else(|| EngineError::Dispatch(format!("no dispatch registered for '{}'", key)))
}
