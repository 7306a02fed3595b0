/*!
 * Schema names and tag conventions recognized across the runners.
 */

pub const TOOL_REQUEST_V1: &str = "tool.request.v1";
pub const TOOL_RESPONSE_V1: &str = "tool.response.v1";
pub const TOOL_CATALOG_V1: &str = "tool.catalog.v1";
pub const TOOL_CONFIG_V1: &str = "tool.config.v1";
pub const TOOL_CONFIG_REQUEST_V1: &str = "tool.config.request.v1";
pub const AGENT_DEF_V1: &str = "agent.def.v1";
pub const AGENT_CONTEXT_V1: &str = "agent.context.v1";
pub const AGENT_RESPONSE_V1: &str = "agent.response.v1";
pub const USER_MESSAGE_V1: &str = "user.message.v1";
pub const SYSTEM_MESSAGE_V1: &str = "system.message.v1";
pub const PROMPT_SYSTEM_V1: &str = "prompt.system.v1";
pub const UI_PLAN_V1: &str = "ui.plan.v1";

pub const DEFAULT_WORKSPACE: &str = "workspace:tools";

pub mod tags {
    pub const TOOL_REQUEST: &str = "tool:request";
    pub const TOOL_RESPONSE: &str = "tool:response";
    pub const TOOL_CATALOG: &str = "tool:catalog";
    pub const TOOL_CONFIG: &str = "tool:config";
    pub const AGENT_DEF: &str = "agent:def";
    pub const AGENT_RESPONSE: &str = "agent:response";
    pub const AGENT_ERROR: &str = "agent:error";
    pub const USER_MESSAGE: &str = "user:message";
    pub const SYSTEM_BOOTSTRAP: &str = "system:bootstrap";

    pub fn tool(name: &str) -> String {
        format!("tool:{}", name)
    }

    pub fn agent(name: &str) -> String {
        format!("agent:{}", name)
    }

    pub fn session(id: &str) -> String {
        format!("session:{}", id)
    }

    /// Active-consumer tag carried by exactly one agent.context.v1 per consumer.
    pub fn consumer(id: &str) -> String {
        format!("consumer:{}", id)
    }

    pub fn consumer_paused(id: &str) -> String {
        format!("consumer:{}-paused", id)
    }

    pub fn is_workspace(tag: &str) -> bool {
        tag.starts_with("workspace:")
    }

    pub fn session_of(tags: &[String]) -> Option<&str> {
        tags.iter()
            .find(|t| t.starts_with("session:"))
            .map(|t| t.as_str())
    }
}
