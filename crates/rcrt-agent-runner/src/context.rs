/*!
 * Context window assembly.
 *
 * The prompt for one activation: the agent's system prompt plus the reply
 * contract, the active session context, recent session breadcrumbs, and
 * finally the triggering breadcrumb. Bounded by breadcrumb count and a
 * token budget (~3 chars per token, same estimate the store uses).
 */

use crate::definition::AgentDefinition;
use crate::llm::ChatMessage;
use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::Breadcrumb;
use rcrt_core::{schemas, RcrtError};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appended to every agent's system prompt so replies come back in the
/// one-action JSON shape the worker executes.
pub const REPLY_CONTRACT: &str = r#"Reply with a single JSON object and nothing else:
{
  "action": "create" | "update" | "delete",
  "breadcrumb": { "schema_name": string, "title": string, "tags": [string], "context": object },
  "breadcrumb_id": string (update/delete only),
  "expected_version": integer (update only)
}
To call tools, put a "tool_requests" array inside breadcrumb.context; each entry is { "tool": string, "input": object, "requestId": string }. Tool responses will arrive as later events correlated by requestId."#;

pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 3
}

pub struct ContextBuilder {
    client: Arc<RcrtClient>,
}

impl ContextBuilder {
    pub fn new(client: Arc<RcrtClient>) -> Self {
        ContextBuilder { client }
    }

    pub async fn build(
        &self,
        definition: &AgentDefinition,
        trigger: &Breadcrumb,
    ) -> Result<Vec<ChatMessage>, RcrtError> {
        let mut messages = Vec::new();
        let mut budget = definition.context_budget.max_tokens;

        let system = format!("{}\n\n{}", definition.system_prompt, REPLY_CONTRACT);
        budget = budget.saturating_sub(estimate_tokens(&system));
        messages.push(ChatMessage::system(system));

        // Active session context, if the agent has one.
        if let Some(session_context) = self.active_session_context(&definition.name).await? {
            let text = format!("Current session context:\n{}", session_context);
            budget = budget.saturating_sub(estimate_tokens(&text));
            messages.push(ChatMessage::system(text));
        }

        // Recent breadcrumbs from the trigger's session, oldest first,
        // until count or budget runs out.
        if let Some(session_tag) = schemas::tags::session_of(&trigger.tags) {
            let history = self
                .session_history(session_tag, trigger, definition, &mut budget)
                .await?;
            if !history.is_empty() {
                messages.push(ChatMessage::system(format!(
                    "Recent activity in this session:\n{}",
                    history.join("\n")
                )));
            }
        }

        messages.push(ChatMessage::user(render_breadcrumb(trigger)));
        debug!(
            "context for {}: {} message(s), ~{} tokens left of budget",
            definition.name,
            messages.len(),
            budget
        );
        Ok(messages)
    }

    async fn active_session_context(&self, agent_name: &str) -> Result<Option<String>, RcrtError> {
        let consumer_tag = schemas::tags::consumer(agent_name);
        let items = self
            .client
            .list(&ListQuery::schema(schemas::AGENT_CONTEXT_V1).tag(&consumer_tag))
            .await?;
        let Some(item) = items.first() else {
            return Ok(None);
        };

        let breadcrumb = self.client.get(item.id).await?;
        // Context-builder output carries a pre-formatted block; fall back
        // to the raw context when it is absent.
        let text = breadcrumb
            .context
            .get("formatted_context")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| breadcrumb.context.to_string());
        Ok(Some(text))
    }

    async fn session_history(
        &self,
        session_tag: &str,
        trigger: &Breadcrumb,
        definition: &AgentDefinition,
        budget: &mut usize,
    ) -> Result<Vec<String>, RcrtError> {
        let mut items = self
            .client
            .list(&ListQuery::default().tag(session_tag))
            .await?;
        items.sort_by_key(|item| item.updated_at);

        // Newest entries win the budget; render order stays oldest-first.
        let mut rendered = Vec::new();
        for item in items.iter().rev() {
            if rendered.len() >= definition.context_budget.max_breadcrumbs {
                break;
            }
            if item.id == trigger.id {
                continue;
            }
            // Session history is conversational; skip the plumbing schemas.
            match item.schema_name.as_deref() {
                Some(schemas::USER_MESSAGE_V1)
                | Some(schemas::AGENT_RESPONSE_V1)
                | Some(schemas::TOOL_RESPONSE_V1) => {}
                _ => continue,
            }

            let breadcrumb = match self.client.get(item.id).await {
                Ok(bc) => bc,
                Err(e) => {
                    warn!("history breadcrumb {} unreadable: {}", item.id, e);
                    continue;
                }
            };
            let line = render_breadcrumb(&breadcrumb);
            let cost = estimate_tokens(&line);
            if cost > *budget {
                break;
            }
            *budget -= cost;
            rendered.push(line);
        }

        rendered.reverse();
        Ok(rendered)
    }
}

fn render_breadcrumb(breadcrumb: &Breadcrumb) -> String {
    json!({
        "breadcrumb_id": breadcrumb.id,
        "schema_name": breadcrumb.schema_name,
        "title": breadcrumb.title,
        "tags": breadcrumb.tags,
        "version": breadcrumb.version,
        "context": breadcrumb.context,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_tracks_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdef"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(3000)), 1000);
    }

    #[test]
    fn reply_contract_mentions_every_action() {
        for action in ["create", "update", "delete", "tool_requests", "requestId"] {
            assert!(REPLY_CONTRACT.contains(action), "missing {}", action);
        }
    }
}
