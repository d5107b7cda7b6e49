//! Role management in the external identity provider.
//!
//! Callers check [`IdentityActor::is_initialized`] before any sync and treat an
//! uninitialized actor as a degraded dependency, not as a failure.

mod keycloak;

use async_trait::async_trait;
use serde::Deserialize;

pub use keycloak::{KeycloakActor, token_needs_refresh};

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("identity actor not initialized")]
    NotInitialized,
    #[error("invalid identity configuration: {0}")]
    Config(String),
    #[error("identity provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl IdentityError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IdentityError::NotFound(_))
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IdentityRole {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[async_trait]
pub trait IdentityActor: Send + Sync {
    fn is_initialized(&self) -> bool;

    /// Returns [`IdentityError::NotFound`] when the role does not exist.
    async fn get_role(&self, name: &str) -> Result<IdentityRole, IdentityError>;

    /// Creates the role and returns its internal id.
    async fn create_role(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, IdentityError>;

    /// Deleting an absent role succeeds.
    async fn delete_role(&self, name: &str) -> Result<(), IdentityError>;
}

/// Stand-in used when no identity provider is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopIdentity;

#[async_trait]
impl IdentityActor for NoopIdentity {
    fn is_initialized(&self) -> bool {
        false
    }

    async fn get_role(&self, _name: &str) -> Result<IdentityRole, IdentityError> {
        Err(IdentityError::NotInitialized)
    }

    async fn create_role(
        &self,
        _name: &str,
        _description: &str,
    ) -> Result<String, IdentityError> {
        Err(IdentityError::NotInitialized)
    }

    async fn delete_role(&self, _name: &str) -> Result<(), IdentityError> {
        Err(IdentityError::NotInitialized)
    }
}

/// `workspace-<ws>:manager`
pub fn manager_role_name(workspace: &str) -> String {
    format!("workspace-{workspace}:manager")
}

/// `workspace-<ws>:user`
pub fn user_role_name(workspace: &str) -> String {
    format!("workspace-{workspace}:user")
}

/// Makes sure the role exists, creating it when absent.
pub async fn ensure_role(
    actor: &dyn IdentityActor,
    name: &str,
    description: &str,
) -> Result<(), IdentityError> {
    match actor.get_role(name).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            actor.create_role(name, description).await.map(|_| ())
        }
        Err(e) => Err(e),
    }
}
