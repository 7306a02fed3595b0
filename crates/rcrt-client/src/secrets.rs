/*!
 * Secret manager.
 *
 * Client of the store's /secrets surface. Listing never exposes plaintext;
 * a decrypt call carries a reason string and is audited server-side.
 * Decrypted values live only for the duration of one invocation and are
 * scrubbed on drop.
 */

use crate::client::{map_reqwest_error, map_status, RcrtClient};
use rcrt_core::models::{BreadcrumbCreate, RequiredSecret, SecretScope};
use rcrt_core::{schemas, RcrtError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct SecretRef {
    pub id: Uuid,
    pub name: String,
    pub scope_type: SecretScope,
    #[serde(default)]
    pub scope_id: Option<Uuid>,
}

/// A decrypted secret. Never cloned, never cached; the bytes are zeroed
/// when the value goes out of scope.
pub struct SecretValue {
    bytes: Vec<u8>,
}

impl SecretValue {
    fn new(plaintext: String) -> Self {
        SecretValue {
            bytes: plaintext.into_bytes(),
        }
    }

    pub fn expose(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    fn scrub(&mut self) {
        for b in self.bytes.iter_mut() {
            *b = 0;
        }
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.scrub();
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

#[derive(Debug)]
pub enum SecretResolution {
    Found(SecretRef),
    Missing,
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSecret {
    id: Uuid,
}

#[derive(Clone)]
pub struct SecretManager {
    client: Arc<RcrtClient>,
    bootstrap_from_env: bool,
}

impl SecretManager {
    pub fn new(client: Arc<RcrtClient>, bootstrap_from_env: bool) -> Self {
        SecretManager {
            client,
            bootstrap_from_env,
        }
    }

    /// Resolve a secret by name: agent scope, then workspace, then global.
    /// First hit wins.
    pub async fn resolve(
        &self,
        name: &str,
        agent_id: Option<Uuid>,
    ) -> Result<Option<SecretRef>, RcrtError> {
        let scopes: [(SecretScope, Option<Uuid>); 3] = [
            (SecretScope::Agent, agent_id),
            (SecretScope::Workspace, None),
            (SecretScope::Global, None),
        ];
        for (scope, scope_id) in scopes {
            if scope == SecretScope::Agent && scope_id.is_none() {
                continue;
            }
            let refs = self.list(scope, scope_id).await?;
            if let Some(found) = refs.into_iter().find(|r| r.name == name) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn list(
        &self,
        scope: SecretScope,
        scope_id: Option<Uuid>,
    ) -> Result<Vec<SecretRef>, RcrtError> {
        let mut url = format!(
            "{}/secrets?scope_type={}",
            self.client.base_url(),
            scope.as_str()
        );
        if let Some(id) = scope_id {
            url.push_str(&format!("&scope_id={}", id));
        }

        let token = self.client.bearer().await?;
        let response = self
            .client
            .http()
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, None));
        }

        response
            .json::<Vec<SecretRef>>()
            .await
            .map_err(|e| RcrtError::Transport(format!("secret list malformed: {}", e)))
    }

    /// Fetch the plaintext. The reason lands in the server-side audit trail.
    pub async fn decrypt(
        &self,
        secret: &SecretRef,
        reason: &str,
    ) -> Result<SecretValue, RcrtError> {
        let url = format!("{}/secrets/{}/decrypt", self.client.base_url(), secret.id);
        let token = self.client.bearer().await?;
        let response = self
            .client
            .http()
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({ "reason": reason }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, Some(secret.id)));
        }

        let decrypted: DecryptResponse = response
            .json()
            .await
            .map_err(|e| RcrtError::Transport(format!("decrypt response malformed: {}", e)))?;
        debug!("🔓 decrypted secret '{}' ({})", secret.name, reason);
        Ok(SecretValue::new(decrypted.value))
    }

    /// Make a required secret available: resolve it, or create it once
    /// from the environment when the bootstrap flag is on and a same-named
    /// environment variable exists. Anything else is Missing and
    /// the requiring tool stays inactive.
    pub async fn ensure(
        &self,
        required: &RequiredSecret,
        agent_id: Option<Uuid>,
    ) -> Result<SecretResolution, RcrtError> {
        if let Some(found) = self.resolve(&required.name, agent_id).await? {
            return Ok(SecretResolution::Found(found));
        }

        if self.bootstrap_from_env {
            let env_name = env_var_name(&required.name);
            if let Ok(value) = std::env::var(&env_name) {
                info!(
                    "🔑 bootstrapping secret '{}' from environment variable {}",
                    required.name, env_name
                );
                let created = self.create(required, &value).await?;
                return Ok(SecretResolution::Found(created));
            }
            warn!(
                "secret '{}' missing and {} not set in environment",
                required.name, env_name
            );
        }

        Ok(SecretResolution::Missing)
    }

    async fn create(
        &self,
        required: &RequiredSecret,
        value: &str,
    ) -> Result<SecretRef, RcrtError> {
        let url = format!("{}/secrets", self.client.base_url());
        let token = self.client.bearer().await?;
        let response = self
            .client
            .http()
            .post(&url)
            .bearer_auth(&token)
            .json(&json!({
                "name": required.name,
                "scope_type": required.scope_type.as_str(),
                "scope_id": required.scope_id,
                "value": value,
            }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, None));
        }

        let created: CreatedSecret = response
            .json()
            .await
            .map_err(|e| RcrtError::Transport(format!("secret create malformed: {}", e)))?;
        Ok(SecretRef {
            id: created.id,
            name: required.name.clone(),
            scope_type: required.scope_type,
            scope_id: required.scope_id,
        })
    }

    /// Publish a tool.config.request.v1 breadcrumb enumerating the secrets
    /// a tool needs before it can activate.
    pub async fn emit_config_request(
        &self,
        workspace: &str,
        tool_name: &str,
        missing: &[RequiredSecret],
    ) -> Result<(), RcrtError> {
        let breadcrumb = BreadcrumbCreate {
            title: format!("Configuration needed for {}", tool_name),
            context: json!({
                "tool": tool_name,
                "missing_secrets": missing,
                "requested_at": chrono::Utc::now().to_rfc3339(),
            }),
            tags: vec![
                workspace.to_string(),
                schemas::tags::TOOL_CONFIG.to_string(),
                schemas::tags::tool(tool_name),
            ],
            schema_name: Some(schemas::TOOL_CONFIG_REQUEST_V1.to_string()),
            ttl: None,
        };
        self.client.create(&breadcrumb).await?;
        info!(
            "📋 published config request for '{}' ({} missing secret(s))",
            tool_name,
            missing.len()
        );
        Ok(())
    }
}

/// openrouter-api-key -> OPENROUTER_API_KEY
pub(crate) fn env_var_name(secret_name: &str) -> String {
    secret_name
        .chars()
        .map(|c| match c {
            'a'..='z' => c.to_ascii_uppercase(),
            '-' | '.' | ' ' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_name_mapping() {
        assert_eq!(env_var_name("openrouter-api-key"), "OPENROUTER_API_KEY");
        assert_eq!(env_var_name("BRAVE_API_KEY"), "BRAVE_API_KEY");
        assert_eq!(env_var_name("github.token"), "GITHUB_TOKEN");
    }

    #[test]
    fn secret_value_redacts_debug_output() {
        let value = SecretValue::new("sk-super-secret".to_string());
        assert_eq!(format!("{:?}", value), "SecretValue(***)");
        assert_eq!(value.expose(), "sk-super-secret");
    }

    #[test]
    fn scrub_zero_fills_the_buffer() {
        let mut value = SecretValue::new("hunter2".to_string());
        value.scrub();
        assert!(value.bytes.iter().all(|b| *b == 0));
        assert_eq!(value.bytes.len(), 7);
    }
}
