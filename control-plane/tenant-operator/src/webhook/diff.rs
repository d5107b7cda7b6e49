use std::collections::BTreeMap;

use crate::crd::tenant::{TenantWorkspaceEntry, WorkspaceRole};

fn roles(entries: &[TenantWorkspaceEntry]) -> BTreeMap<&str, WorkspaceRole> {
    entries.iter().map(|e| (e.name.as_str(), e.role)).collect()
}

/// Workspaces that were added, removed or had their role changed between
/// the two membership lists. Every reported name maps to `true`.
pub fn calculate_workspaces_diff(
    a: &[TenantWorkspaceEntry],
    b: &[TenantWorkspaceEntry],
) -> BTreeMap<String, bool> {
    let (ra, rb) = (roles(a), roles(b));
    let mut changed = BTreeMap::new();
    for (name, role) in &ra {
        if rb.get(name) != Some(role) {
            changed.insert(name.to_string(), true);
        }
    }
    for (name, role) in &rb {
        if ra.get(name) != Some(role) {
            changed.insert(name.to_string(), true);
        }
    }
    changed
}
