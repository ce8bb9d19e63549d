//! Resource endpoints known to the client.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'%').add(b'/').add(b'?');

/// REST coordinates of one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// API group; empty for the core group.
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceRef {
    /// Collection path, e.g. `/apis/apps/v1beta1/namespaces/default/deployments`.
    pub fn collection_path(&self, namespace: &str) -> String {
        let prefix = if self.group.is_empty() {
            format!("/api/{}", self.version)
        } else {
            format!("/apis/{}/{}", self.group, self.version)
        };
        if self.namespaced && !namespace.is_empty() {
            format!("{}/namespaces/{}/{}", prefix, encode_segment(namespace), self.plural)
        } else {
            format!("{}/{}", prefix, self.plural)
        }
    }

    /// Item path for a named object.
    pub fn item_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), encode_segment(name))
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

pub const APPS_V1BETA1_DEPLOYMENTS: ResourceRef = ResourceRef {
    group: "apps",
    version: "v1beta1",
    kind: "Deployment",
    plural: "deployments",
    namespaced: true,
};

pub const EXTENSIONS_V1BETA1_DEPLOYMENTS: ResourceRef = ResourceRef {
    group: "extensions",
    version: "v1beta1",
    kind: "Deployment",
    plural: "deployments",
    namespaced: true,
};

pub const CORE_V1_SERVICES: ResourceRef = ResourceRef {
    group: "",
    version: "v1",
    kind: "Service",
    plural: "services",
    namespaced: true,
};

pub const CORE_V1_PODS: ResourceRef = ResourceRef {
    group: "",
    version: "v1",
    kind: "Pod",
    plural: "pods",
    namespaced: true,
};

pub const CORE_V1_PERSISTENT_VOLUME_CLAIMS: ResourceRef = ResourceRef {
    group: "",
    version: "v1",
    kind: "PersistentVolumeClaim",
    plural: "persistentvolumeclaims",
    namespaced: true,
};

pub const CORE_V1_CONFIG_MAPS: ResourceRef = ResourceRef {
    group: "",
    version: "v1",
    kind: "ConfigMap",
    plural: "configmaps",
    namespaced: true,
};

pub const OPENEBS_V1ALPHA1_STORAGE_POOLS: ResourceRef = ResourceRef {
    group: "openebs.io",
    version: "v1alpha1",
    kind: "StoragePool",
    plural: "storagepools",
    namespaced: false,
};

pub const OPENEBS_V1ALPHA1_RUN_TASKS: ResourceRef = ResourceRef {
    group: "openebs.io",
    version: "v1alpha1",
    kind: "RunTask",
    plural: "runtasks",
    namespaced: true,
};

pub const OPENEBS_V1ALPHA1_COMPOSITE_TEMPLATES: ResourceRef = ResourceRef {
    group: "openebs.io",
    version: "v1alpha1",
    kind: "CASTemplate",
    plural: "castemplates",
    namespaced: false,
};

/// Selector options for list calls, decoded from a task's `options`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub field_selector: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ListOptions {
    /// Query pairs for the list request.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(selector) = self.label_selector.as_deref().filter(|value| !value.trim().is_empty()) {
            pairs.push(("labelSelector", selector.trim().to_string()));
        }
        if let Some(selector) = self.field_selector.as_deref().filter(|value| !value.trim().is_empty()) {
            pairs.push(("fieldSelector", selector.trim().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_core_and_group_paths() {
        assert_eq!(CORE_V1_PODS.collection_path("default"), "/api/v1/namespaces/default/pods");
        assert_eq!(
            EXTENSIONS_V1BETA1_DEPLOYMENTS.item_path("openebs", "ctrl"),
            "/apis/extensions/v1beta1/namespaces/openebs/deployments/ctrl"
        );
        assert_eq!(OPENEBS_V1ALPHA1_STORAGE_POOLS.item_path("ignored", "default"), "/apis/openebs.io/v1alpha1/storagepools/default");
    }

    #[test]
    fn escapes_path_segments() {
        assert_eq!(CORE_V1_SERVICES.item_path("default", "a/b"), "/api/v1/namespaces/default/services/a%2Fb");
    }

    #[test]
    fn list_options_skip_blank_selectors() {
        let options = ListOptions {
            label_selector: Some("app=jiva".into()),
            field_selector: Some("  ".into()),
            limit: None,
        };
        assert_eq!(options.query_pairs(), vec![("labelSelector", "app=jiva".to_string())]);
    }
}
