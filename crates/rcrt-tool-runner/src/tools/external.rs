/*!
 * External tool provider.
 *
 * Opt-in loader for tools that execute outside this process (the
 * LangChain-style ecosystem bridge). Descriptors are published as
 * tool.config.v1 breadcrumbs tagged provider:langchain; execution is
 * delegated to the configured proxy. The opt-in flag only gates whether
 * this loader runs; loaded tools go through the ordinary registry.
 */

use crate::registry::{Tool, ToolSecrets};
use async_trait::async_trait;
use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::ToolDescriptor;
use rcrt_core::{schemas, RcrtError};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const PROVIDER_TAG: &str = "provider:langchain";

pub struct ProxyTool {
    descriptor: ToolDescriptor,
    endpoint: String,
    http: reqwest::Client,
}

#[async_trait]
impl Tool for ProxyTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn execute(&self, input: JsonValue, _secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "tool": self.descriptor.name,
                "input": input,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("proxy returned {}: {}", status, body);
        }
        Ok(response.json().await?)
    }
}

/// Load external tool descriptors for a workspace. Returns an empty set
/// when none are published; fails only on transport-level trouble.
pub async fn load(
    client: &Arc<RcrtClient>,
    workspace: &str,
    proxy_url: &str,
) -> Result<Vec<Arc<dyn Tool>>, RcrtError> {
    let endpoint = format!("{}/tools/execute", proxy_url.trim_end_matches('/'));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| RcrtError::Transport(e.to_string()))?;

    let items = client
        .list(
            &ListQuery::schema(schemas::TOOL_CONFIG_V1)
                .tag(workspace)
                .tag(PROVIDER_TAG),
        )
        .await?;

    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    for item in items {
        let breadcrumb = match client.get(item.id).await {
            Ok(bc) => bc,
            Err(e) => {
                warn!("external descriptor {} unreadable: {}", item.id, e);
                continue;
            }
        };
        let descriptor = breadcrumb
            .context
            .get("descriptor")
            .cloned()
            .unwrap_or(breadcrumb.context.clone());
        match serde_json::from_value::<ToolDescriptor>(descriptor) {
            Ok(descriptor) => {
                info!("🔌 loaded external tool '{}'", descriptor.name);
                tools.push(Arc::new(ProxyTool {
                    descriptor,
                    endpoint: endpoint.clone(),
                    http: http.clone(),
                }));
            }
            Err(e) => {
                warn!("external descriptor {} malformed, skipping: {}", item.id, e);
            }
        }
    }

    Ok(tools)
}
