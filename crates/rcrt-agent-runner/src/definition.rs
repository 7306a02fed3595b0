/*!
 * Agent definition loader.
 *
 * An agent.def.v1 breadcrumb carries everything a worker needs: the model,
 * sampling parameters, system prompt, capability flags, and the selectors
 * the agent subscribes with. Parsing is tolerant; anything optional falls
 * back to a sensible default so a sparse definition still runs.
 */

use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::{Breadcrumb, Selector};
use rcrt_core::{schemas, RcrtError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_iterations() -> u32 {
    8
}

fn default_max_breadcrumbs() -> usize {
    30
}

fn default_max_context_tokens() -> usize {
    8000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentDefinition {
    #[serde(alias = "agent_id")]
    pub name: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub capabilities: Capabilities,

    #[serde(default)]
    pub subscriptions: Subscriptions,

    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default)]
    pub context_budget: ContextBudget,
}

fn default_model() -> String {
    "openrouter/auto".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub can_delete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Subscriptions {
    #[serde(default)]
    pub selectors: Vec<Selector>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextBudget {
    #[serde(default = "default_max_breadcrumbs")]
    pub max_breadcrumbs: usize,
    #[serde(default = "default_max_context_tokens")]
    pub max_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        ContextBudget {
            max_breadcrumbs: default_max_breadcrumbs(),
            max_tokens: default_max_context_tokens(),
        }
    }
}

impl AgentDefinition {
    pub fn parse(breadcrumb: &Breadcrumb) -> Result<AgentDefinition, RcrtError> {
        serde_json::from_value(breadcrumb.context.clone())
            .map_err(|e| RcrtError::Validation(format!("agent.def.v1 malformed: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct LoadedAgent {
    pub definition_id: Uuid,
    pub definition: AgentDefinition,
}

/// Load every agent definition in the workspace. Malformed definitions are
/// skipped with a warning rather than taking the runner down.
pub async fn load_all(
    client: &Arc<RcrtClient>,
    workspace: &str,
) -> Result<Vec<LoadedAgent>, RcrtError> {
    let items = client
        .list(&ListQuery::schema(schemas::AGENT_DEF_V1).tag(workspace))
        .await?;

    let mut agents = Vec::new();
    for item in items {
        let breadcrumb = match client.get(item.id).await {
            Ok(bc) => bc,
            Err(e) => {
                warn!("agent definition {} unreadable: {}", item.id, e);
                continue;
            }
        };
        match AgentDefinition::parse(&breadcrumb) {
            Ok(definition) => agents.push(LoadedAgent {
                definition_id: item.id,
                definition,
            }),
            Err(e) => warn!("agent definition {} skipped: {}", item.id, e),
        }
    }
    Ok(agents)
}
