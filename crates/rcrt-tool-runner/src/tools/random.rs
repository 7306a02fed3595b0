use crate::registry::{Tool, ToolSecrets};
use async_trait::async_trait;
use rcrt_core::models::ToolDescriptor;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

/// Uniform-ish random integer in an inclusive range. Entropy comes from a
/// v4 UUID; nothing here needs cryptographic quality.
pub struct RandomNumberTool;

#[async_trait]
impl Tool for RandomNumberTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "random_number".to_string(),
            description: "Pick a random integer between min and max (inclusive)".to_string(),
            category: "utility".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "min": { "type": "integer" },
                    "max": { "type": "integer" }
                }
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "number": { "type": "integer" },
                    "min": { "type": "integer" },
                    "max": { "type": "integer" }
                }
            }),
            examples: vec![json!({
                "input": { "min": 1, "max": 10 },
                "output": { "number": 7, "min": 1, "max": 10 }
            })],
            required_secrets: vec![],
            max_in_flight: None,
        }
    }

    async fn execute(&self, input: JsonValue, _secrets: &ToolSecrets) -> anyhow::Result<JsonValue> {
        let min = input.get("min").and_then(|v| v.as_i64()).unwrap_or(1);
        let max = input.get("max").and_then(|v| v.as_i64()).unwrap_or(100);
        if min > max {
            anyhow::bail!("min ({}) must not exceed max ({})", min, max);
        }

        let span = (max - min) as u128 + 1;
        let number = min + (Uuid::new_v4().as_u128() % span) as i64;
        Ok(json!({ "number": number, "min": min, "max": max }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stays_inside_the_range() {
        for _ in 0..50 {
            let output = RandomNumberTool
                .execute(json!({"min": 1, "max": 10}), &ToolSecrets::default())
                .await
                .unwrap();
            let n = output["number"].as_i64().unwrap();
            assert!((1..=10).contains(&n));
        }
    }

    #[tokio::test]
    async fn single_value_range_is_deterministic() {
        let output = RandomNumberTool
            .execute(json!({"min": 4, "max": 4}), &ToolSecrets::default())
            .await
            .unwrap();
        assert_eq!(output["number"], 4);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let err = RandomNumberTool
            .execute(json!({"min": 9, "max": 3}), &ToolSecrets::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }
}
