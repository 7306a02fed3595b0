/*!
 * Configuration for the agent runner service.
 */

use rcrt_core::schemas;
use rcrt_core::RcrtError;
use std::path::PathBuf;
use uuid::Uuid;

pub const DEFAULT_LLM_SECRET: &str = "openrouter-api-key";

#[derive(Debug, Clone)]
pub struct Config {
    /// Breadcrumb store base URL
    pub base_url: String,

    /// Workspace tag this runner serves
    pub workspace: String,

    /// Owner ID for authentication
    pub owner_id: String,

    /// Agent ID for this service
    pub agent_id: String,

    pub secret_bootstrap_from_env: bool,

    /// Dedup journal retention window
    pub retention_hours: i64,

    pub journal_path: PathBuf,

    /// LLM provider endpoint (OpenRouter-compatible chat completions)
    pub llm_base_url: String,

    /// Secret name holding the LLM API key
    pub llm_secret_name: String,

    pub llm_referer: Option<String>,
    pub llm_site_title: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, RcrtError> {
        dotenvy::dotenv().ok();

        let config = Config {
            base_url: std::env::var("RCRT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            workspace: std::env::var("WORKSPACE")
                .unwrap_or_else(|_| schemas::DEFAULT_WORKSPACE.to_string()),
            owner_id: std::env::var("OWNER_ID")
                .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".to_string()),
            agent_id: std::env::var("AGENT_ID").unwrap_or_else(|_| "agent-runner".to_string()),
            secret_bootstrap_from_env: env_flag("SECRET_BOOTSTRAP_FROM_ENV", false),
            retention_hours: env_parse("JOURNAL_RETENTION_HOURS", 24),
            journal_path: std::env::var("JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("agent-runner-journal.jsonl")),
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            llm_secret_name: std::env::var("LLM_SECRET_NAME")
                .unwrap_or_else(|_| DEFAULT_LLM_SECRET.to_string()),
            llm_referer: std::env::var("OPENROUTER_REFERER").ok(),
            llm_site_title: std::env::var("OPENROUTER_SITE_TITLE").ok(),
        };

        if config.retention_hours <= 0 {
            return Err(RcrtError::Validation(
                "JOURNAL_RETENTION_HOURS must be positive".into(),
            ));
        }

        Ok(config)
    }

    pub fn agent_scope_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.agent_id).ok()
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
