use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info, instrument};

use super::{IdentityActor, IdentityError, IdentityRole};
use crate::config::KeycloakConfig;

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Clone, Debug)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct ClientRepresentation {
    id: String,
}

pub fn token_needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at - ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS)
}

/// Keycloak admin REST client managing client roles of one realm.
pub struct KeycloakActor {
    base: Url,
    realm: String,
    client_id: String,
    client_secret: String,
    roles_client_id: String,
    http: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
    // clientId -> internal id
    client_ids: RwLock<HashMap<String, String>>,
    initialized: AtomicBool,
}

impl KeycloakActor {
    pub fn new(cfg: &KeycloakConfig) -> Result<Self, IdentityError> {
        let missing = |what: &str| IdentityError::Config(format!("missing {what}"));
        let url = cfg.url.as_deref().ok_or_else(|| missing("url"))?;
        let base = Url::parse(url)
            .map_err(|e| IdentityError::Config(format!("url {url:?}: {e}")))?;
        let client_id = cfg.client_id.clone().ok_or_else(|| missing("client id"))?;
        let client_secret = cfg
            .client_secret
            .clone()
            .ok_or_else(|| missing("client secret"))?;
        let roles_client_id = cfg
            .roles_client_id
            .clone()
            .unwrap_or_else(|| client_id.clone());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        Ok(Self {
            base,
            realm: cfg.realm.clone(),
            client_id,
            client_secret,
            roles_client_id,
            http,
            token: RwLock::new(None),
            client_ids: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Acquires a token and resolves the roles client. Marks the actor ready on success.
    #[instrument(level = "debug", skip(self), fields(realm = %self.realm))]
    pub async fn initialize(&self) -> Result<(), IdentityError> {
        self.access_token().await?;
        self.internal_client_id(&self.roles_client_id).await?;
        self.initialized.store(true, Ordering::SeqCst);
        info!(realm = %self.realm, client = %self.roles_client_id, "keycloak actor initialized");
        Ok(())
    }

    /// Drops cached credentials and marks the actor uninitialized.
    pub async fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.token.write().await = None;
        self.client_ids.write().await.clear();
    }

    fn url(&self, segments: &[&str]) -> Result<Url, IdentityError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| IdentityError::Config(format!("url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn admin_url(&self, segments: &[&str]) -> Result<Url, IdentityError> {
        let mut all = vec!["admin", "realms", self.realm.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    async fn access_token(&self) -> Result<String, IdentityError> {
        {
            let cached = self.token.read().await;
            if let Some(t) = cached.as_ref() {
                if !token_needs_refresh(t.expires_at, Utc::now()) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        let url = self.url(&[
            "realms",
            self.realm.as_str(),
            "protocol",
            "openid-connect",
            "token",
        ])?;
        let res = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;
        let res = check_status(res).await?;
        let body: TokenResponse = res.json().await?;
        let token = CachedToken {
            access_token: body.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        };
        debug!(expires_at = %token.expires_at, "keycloak token refreshed");
        let access = token.access_token.clone();
        *self.token.write().await = Some(token);
        Ok(access)
    }

    async fn internal_client_id(&self, client_id: &str) -> Result<String, IdentityError> {
        if let Some(id) = self.client_ids.read().await.get(client_id) {
            return Ok(id.clone());
        }

        let token = self.access_token().await?;
        let res = self
            .http
            .get(self.admin_url(&["clients"])?)
            .query(&[("clientId", client_id)])
            .bearer_auth(token)
            .send()
            .await?;
        let res = check_status(res).await?;
        let clients: Vec<ClientRepresentation> = res.json().await?;
        let id = clients
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| IdentityError::NotFound(format!("client {client_id}")))?;

        self.client_ids
            .write()
            .await
            .insert(client_id.to_string(), id.clone());
        Ok(id)
    }

    async fn role_url(&self, role: Option<&str>) -> Result<Url, IdentityError> {
        let id = self.internal_client_id(&self.roles_client_id).await?;
        let mut segments = vec!["clients", id.as_str(), "roles"];
        if let Some(role) = role {
            segments.push(role);
        }
        self.admin_url(&segments)
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, IdentityError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(IdentityError::Api { status, body })
}

#[async_trait]
impl IdentityActor for KeycloakActor {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn get_role(&self, name: &str) -> Result<IdentityRole, IdentityError> {
        let url = self.role_url(Some(name)).await?;
        let token = self.access_token().await?;
        let res = self.http.get(url).bearer_auth(token).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(IdentityError::NotFound(format!("role {name}")));
        }
        let res = check_status(res).await?;
        Ok(res.json().await?)
    }

    async fn create_role(&self, name: &str, description: &str) -> Result<String, IdentityError> {
        let url = self.role_url(None).await?;
        let token = self.access_token().await?;
        let res = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({"name": name, "description": description}))
            .send()
            .await?;
        // 409 means someone else created it in the meantime
        if res.status() != StatusCode::CONFLICT {
            check_status(res).await?;
        }
        let role = self.get_role(name).await?;
        info!(role = %name, id = %role.id, "keycloak role created");
        Ok(role.id)
    }

    async fn delete_role(&self, name: &str) -> Result<(), IdentityError> {
        let url = self.role_url(Some(name)).await?;
        let token = self.access_token().await?;
        let res = self.http.delete(url).bearer_auth(token).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            debug!(role = %name, "keycloak role already absent");
            return Ok(());
        }
        check_status(res).await?;
        info!(role = %name, "keycloak role deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(url: &str) -> KeycloakConfig {
        KeycloakConfig {
            url: Some(url.to_string()),
            realm: "crownlabs".into(),
            client_id: Some("operator".into()),
            client_secret: Some("s3cret".into()),
            roles_client_id: None,
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn refresh_margin_applies() {
        let now = Utc::now();
        assert!(!token_needs_refresh(now + ChronoDuration::seconds(60), now));
        assert!(token_needs_refresh(now + ChronoDuration::seconds(30), now));
        assert!(token_needs_refresh(now + ChronoDuration::seconds(10), now));
        assert!(token_needs_refresh(now - ChronoDuration::seconds(1), now));
    }

    #[test]
    fn roles_client_defaults_to_client_id() {
        let actor = KeycloakActor::new(&cfg("http://kc.local")).unwrap();
        assert_eq!(actor.roles_client_id, "operator");
        assert!(!actor.is_initialized());
    }

    #[test]
    fn urls_are_segment_encoded() {
        let actor = KeycloakActor::new(&cfg("http://kc.local/auth/")).unwrap();
        let url = actor
            .admin_url(&["clients", "abc", "roles", "workspace-ws1:manager"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://kc.local/auth/admin/realms/crownlabs/clients/abc/roles/workspace-ws1:manager"
        );
    }

    #[test]
    fn missing_secret_is_config_error() {
        let mut c = cfg("http://kc.local");
        c.client_secret = None;
        assert!(matches!(
            KeycloakActor::new(&c),
            Err(IdentityError::Config(_))
        ));
    }
}
