/*!
 * Structured reply handling.
 *
 * The LLM answers with one JSON action. Chat models wrap JSON in fences or
 * prose often enough that parsing is tolerant: fences are stripped, and a
 * failed direct parse falls back to the outermost brace span. A reply that
 * still won't parse earns exactly one repair re-prompt.
 */

use rcrt_core::RcrtError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Deserialize)]
pub struct AgentReply {
    pub action: ReplyAction,
    #[serde(default)]
    pub breadcrumb: Option<ReplyBreadcrumb>,
    #[serde(default)]
    pub breadcrumb_id: Option<Uuid>,
    #[serde(default)]
    pub expected_version: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyBreadcrumb {
    pub schema_name: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: JsonValue,
}

/// One nested tool call from the reply's context.tool_requests[].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequestSpec {
    pub tool: String,
    #[serde(default)]
    pub input: JsonValue,
    #[serde(rename = "requestId", default = "fresh_request_id")]
    pub request_id: String,
}

fn fresh_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn parse_reply(raw: &str) -> Result<AgentReply, RcrtError> {
    let stripped = strip_fences(raw);

    match serde_json::from_str::<AgentReply>(stripped) {
        Ok(reply) => Ok(reply),
        Err(first_error) => {
            // Prose around the object: take the outermost brace span.
            if let Some(span) = brace_span(stripped) {
                if let Ok(reply) = serde_json::from_str::<AgentReply>(span) {
                    return Ok(reply);
                }
            }
            Err(RcrtError::LlmParse(first_error.to_string()))
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language marker line (```json) and the closing fence.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// The re-prompt sent after an unparseable reply, carrying the parse error
/// so the model can correct itself.
pub fn repair_prompt(error: &str) -> String {
    format!(
        "Your previous reply was not valid JSON ({}). Respond again with ONLY the JSON object, no fences and no prose.",
        error
    )
}

/// Pull tool_requests[] out of a reply breadcrumb's context. Malformed
/// entries are skipped, not fatal; an entry without a requestId gets a
/// fresh one.
pub fn extract_tool_requests(context: &JsonValue) -> Vec<ToolRequestSpec> {
    let Some(entries) = context.get("tool_requests").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value(entry.clone()) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("tool_requests entry skipped: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_parses() {
        let reply = parse_reply(
            r#"{"action": "create", "breadcrumb": {"schema_name": "agent.response.v1", "title": "Hi", "tags": [], "context": {"message": "hello"}}}"#,
        )
        .unwrap();
        assert_eq!(reply.action, ReplyAction::Create);
        assert_eq!(
            reply.breadcrumb.unwrap().schema_name,
            "agent.response.v1"
        );
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "```json\n{\"action\": \"create\", \"breadcrumb\": {\"schema_name\": \"agent.response.v1\", \"title\": \"Hi\", \"context\": {}}}\n```";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.action, ReplyAction::Create);
    }

    #[test]
    fn json_surrounded_by_prose_parses() {
        let raw = "Sure! Here is the action:\n{\"action\": \"delete\", \"breadcrumb_id\": \"6ff95bbe-9fd5-4e69-8d12-2f586e71e77a\"}\nLet me know if that works.";
        let reply = parse_reply(raw).unwrap();
        assert_eq!(reply.action, ReplyAction::Delete);
        assert!(reply.breadcrumb_id.is_some());
    }

    #[test]
    fn update_carries_id_and_expected_version() {
        let reply = parse_reply(
            r#"{"action": "update", "breadcrumb_id": "6ff95bbe-9fd5-4e69-8d12-2f586e71e77a", "expected_version": 3, "breadcrumb": {"schema_name": "agent.context.v1", "title": "ctx", "context": {"k": "v"}}}"#,
        )
        .unwrap();
        assert_eq!(reply.action, ReplyAction::Update);
        assert_eq!(reply.expected_version, Some(3));
    }

    #[test]
    fn garbage_is_an_llm_parse_error() {
        let err = parse_reply("I could not decide what to do.").unwrap_err();
        assert!(matches!(err, RcrtError::LlmParse(_)));
        assert_eq!(err.kind(), "llm-parse");
    }

    #[test]
    fn tool_requests_extraction() {
        let context = json!({
            "message": "working on it",
            "tool_requests": [
                {"tool": "random_number", "input": {"min": 1, "max": 10}, "requestId": "req-1"},
                {"tool": "echo", "input": {"message": "7"}, "requestId": "req-2"},
                {"input": {"no": "tool name"}},
            ]
        });
        let specs = extract_tool_requests(&context);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].tool, "random_number");
        assert_eq!(specs[0].request_id, "req-1");
        assert_eq!(specs[1].tool, "echo");
    }

    #[test]
    fn missing_request_id_gets_a_generated_one() {
        let context = json!({
            "tool_requests": [{"tool": "echo", "input": {}}]
        });
        let specs = extract_tool_requests(&context);
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].request_id.is_empty());
    }

    #[test]
    fn no_tool_requests_is_empty() {
        assert!(extract_tool_requests(&json!({"message": "plain"})).is_empty());
        assert!(extract_tool_requests(&json!("scalar")).is_empty());
    }
}
