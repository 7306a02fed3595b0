use crate::registry::{Tool, ToolSecrets};
use async_trait::async_trait;
use rcrt_core::models::ToolDescriptor;
use serde_json::{json, Value as JsonValue};

/// Returns its input message unchanged. The smoke test of the whole
/// request/response loop.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "echo".to_string(),
            description: "Echo the given message back".to_string(),
            category: "utility".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                }
            }),
            examples: vec![json!({
                "input": { "message": "hi" },
                "output": { "message": "hi" }
            })],
            required_secrets: vec![],
            max_in_flight: None,
        }
    }

    async fn execute(&self, input: JsonValue, _secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
        let message = input
            .get("message")
            .cloned()
            .unwrap_or(JsonValue::Null);
        Ok(json!({ "message": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_the_message() {
        let output = EchoTool
            .execute(json!({"message": "hi"}), &ToolSecrets::default())
            .await
            .unwrap();
        assert_eq!(output, json!({"message": "hi"}));
    }
}
