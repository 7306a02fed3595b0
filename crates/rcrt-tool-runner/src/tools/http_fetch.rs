use crate::registry::{Tool, ToolSecrets};
use async_trait::async_trait;
use rcrt_core::models::ToolDescriptor;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

const MAX_BODY_CHARS: usize = 10_000;

/// GET a URL and return status plus a truncated body.
pub struct HttpFetchTool {
    http: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        HttpFetchTool { http }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "http_fetch".to_string(),
            description: "Fetch a URL over HTTP GET and return the response body".to_string(),
            category: "web".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" }
                },
                "required": ["url"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "status": { "type": "integer" },
                    "body": { "type": "string" },
                    "truncated": { "type": "boolean" }
                }
            }),
            examples: vec![],
            required_secrets: vec![],
            max_in_flight: Some(4),
        }
    }

    async fn execute(&self, input: JsonValue, _secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
        let url = input
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("url is required"))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("only http(s) URLs are fetchable, got '{}'", url);
        }

        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let truncated = body.chars().count() > MAX_BODY_CHARS;
        let body: String = body.chars().take(MAX_BODY_CHARS).collect();

        Ok(json!({
            "status": status,
            "body": body,
            "truncated": truncated,
        }))
    }
}
