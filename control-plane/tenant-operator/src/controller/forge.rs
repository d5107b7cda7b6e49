//! Desired state of the cluster objects owned by a Workspace.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::crd::{MANAGED_BY_LABEL, TYPE_LABEL};
use crate::label::KvLabel;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

pub const MANAGE_INSTANCES_ROLE: &str = "crownlabs-manage-instances";
pub const MANAGE_TENANTS_ROLE: &str = "crownlabs-manage-tenants";
pub const VIEW_TEMPLATES_ROLE: &str = "crownlabs-view-templates";
pub const MANAGE_TEMPLATES_ROLE: &str = "crownlabs-manage-templates";
pub const MANAGE_SHAREDVOLUMES_ROLE: &str = "crownlabs-manage-sharedvolumes";

/// ClusterRoles bound cluster-wide to the workspace managers.
pub const CLUSTER_ROLES: [&str; 2] = [MANAGE_INSTANCES_ROLE, MANAGE_TENANTS_ROLE];

/// ClusterRoles bound inside the workspace namespace; the flag marks user-facing ones.
pub const NAMESPACE_ROLES: [(&str, bool); 3] = [
    (VIEW_TEMPLATES_ROLE, true),
    (MANAGE_TEMPLATES_ROLE, false),
    (MANAGE_SHAREDVOLUMES_ROLE, false),
];

pub fn namespace_name(workspace: &str) -> String {
    format!("workspace-{workspace}")
}

pub fn cluster_role_binding_name(role: &str, workspace: &str) -> String {
    format!("{role}-{workspace}")
}

/// Group of the workspace managers as seen by the API server.
pub fn manager_group(workspace: &str) -> String {
    format!("kubernetes:workspace-{workspace}:manager")
}

pub fn user_group(workspace: &str) -> String {
    format!("kubernetes:workspace-{workspace}:user")
}

fn managed_labels(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.insert(MANAGED_BY_LABEL.to_string(), "workspace".to_string());
    labels
}

fn group_subject(group: String) -> Subject {
    Subject {
        kind: "Group".into(),
        name: group,
        api_group: Some(RBAC_GROUP.into()),
        namespace: None,
    }
}

fn cluster_role_ref(name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_GROUP.into(),
        kind: "ClusterRole".into(),
        name: name.into(),
    }
}

pub fn namespace(
    workspace: &str,
    target: &KvLabel,
    owner: Option<OwnerReference>,
) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(namespace_name(workspace)),
            labels: Some(managed_labels(&[
                (target.key(), target.value()),
                (TYPE_LABEL, "workspace"),
            ])),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn cluster_role_bindings(
    workspace: &str,
    owner: Option<OwnerReference>,
) -> Vec<ClusterRoleBinding> {
    CLUSTER_ROLES
        .iter()
        .map(|role| ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(cluster_role_binding_name(role, workspace)),
                labels: Some(managed_labels(&[])),
                owner_references: owner.clone().map(|o| vec![o]),
                ..Default::default()
            },
            role_ref: cluster_role_ref(role),
            subjects: Some(vec![group_subject(manager_group(workspace))]),
        })
        .collect()
}

pub fn role_bindings(
    workspace: &str,
    owner: Option<OwnerReference>,
) -> Vec<RoleBinding> {
    let ns = namespace_name(workspace);
    NAMESPACE_ROLES
        .iter()
        .map(|(role, for_users)| {
            let group = if *for_users {
                user_group(workspace)
            } else {
                manager_group(workspace)
            };
            RoleBinding {
                metadata: ObjectMeta {
                    name: Some(role.to_string()),
                    namespace: Some(ns.clone()),
                    labels: Some(managed_labels(&[])),
                    owner_references: owner.clone().map(|o| vec![o]),
                    ..Default::default()
                },
                role_ref: cluster_role_ref(role),
                subjects: Some(vec![group_subject(group)]),
            }
        })
        .collect()
}
