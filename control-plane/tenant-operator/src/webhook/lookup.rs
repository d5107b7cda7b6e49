use async_trait::async_trait;
use kube::{Api, Client};

use crate::crd::tenant::Tenant;
use crate::crd::workspace::Workspace;

/// Read access to the objects the validator consults.
#[async_trait]
pub trait TenantLookup: Send + Sync {
    async fn get_tenant(&self, name: &str) -> anyhow::Result<Option<Tenant>>;
    async fn get_workspace(&self, name: &str) -> anyhow::Result<Option<Workspace>>;
}

pub struct KubeLookup {
    client: Client,
}

impl KubeLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TenantLookup for KubeLookup {
    async fn get_tenant(&self, name: &str) -> anyhow::Result<Option<Tenant>> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_workspace(&self, name: &str) -> anyhow::Result<Option<Workspace>> {
        let api: Api<Workspace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::BTreeMap;

    use super::*;

    /// In-memory lookup; names listed in `broken` fail to load.
    #[derive(Default)]
    pub struct MemoryLookup {
        pub tenants: BTreeMap<String, Tenant>,
        pub workspaces: BTreeMap<String, Workspace>,
        pub broken: Vec<String>,
    }

    impl MemoryLookup {
        pub fn with_tenant(mut self, tn: Tenant) -> Self {
            self.tenants.insert(kube::ResourceExt::name_any(&tn), tn);
            self
        }

        pub fn with_workspace(mut self, ws: Workspace) -> Self {
            self.workspaces.insert(kube::ResourceExt::name_any(&ws), ws);
            self
        }
    }

    #[async_trait]
    impl TenantLookup for MemoryLookup {
        async fn get_tenant(&self, name: &str) -> anyhow::Result<Option<Tenant>> {
            if self.broken.iter().any(|b| b == name) {
                anyhow::bail!("tenant {name} unavailable");
            }
            Ok(self.tenants.get(name).cloned())
        }

        async fn get_workspace(&self, name: &str) -> anyhow::Result<Option<Workspace>> {
            if self.broken.iter().any(|b| b == name) {
                anyhow::bail!("workspace {name} unavailable");
            }
            Ok(self.workspaces.get(name).cloned())
        }
    }
}
