use crate::registry::{Tool, ToolSecrets};
use async_trait::async_trait;
use rcrt_core::models::{RequiredSecret, SecretScope, ToolDescriptor};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const SECRET_NAME: &str = "brave-api-key";

/// Web search via the Brave Search API. Stays inactive until the
/// brave-api-key secret is provisioned; the key is decrypted per
/// invocation and never stored.
pub struct WebSearchTool {
    http: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        WebSearchTool { http }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "web_search".to_string(),
            description: "Search the web and return the top results".to_string(),
            category: "web".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "count": { "type": "integer", "minimum": 1, "maximum": 10 }
                },
                "required": ["query"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "results": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "title": { "type": "string" },
                                "url": { "type": "string" },
                                "description": { "type": "string" }
                            }
                        }
                    }
                }
            }),
            examples: vec![],
            required_secrets: vec![RequiredSecret {
                name: SECRET_NAME.to_string(),
                scope_type: SecretScope::Global,
                scope_id: None,
            }],
            max_in_flight: Some(2),
        }
    }

    async fn execute(&self, input: JsonValue, secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("query is required"))?;
        let count = input.get("count").and_then(|v| v.as_u64()).unwrap_or(5).min(10);
        let key = secrets
            .get(SECRET_NAME)
            .ok_or_else(|| anyhow::anyhow!("{} was not provided to this invocation", SECRET_NAME))?;

        let response = self
            .http
            .get(BRAVE_ENDPOINT)
            .header("X-Subscription-Token", key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("search backend returned {}", status);
        }

        let body: JsonValue = response.json().await?;
        let results: Vec<JsonValue> = body
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|r| r.as_array())
            .map(|items| {
                items
                    .iter()
                    .take(count as usize)
                    .map(|item| {
                        json!({
                            "title": item.get("title").cloned().unwrap_or(JsonValue::Null),
                            "url": item.get("url").cloned().unwrap_or(JsonValue::Null),
                            "description": item.get("description").cloned().unwrap_or(JsonValue::Null),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({ "results": results }))
    }
}
