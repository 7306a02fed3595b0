/*!
 * Configuration for the tool runner service.
 */

use rcrt_core::schemas;
use rcrt_core::RcrtError;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    /// Breadcrumb store base URL
    pub base_url: String,

    /// External tool proxy, used by the LangChain-style provider
    pub proxy_url: Option<String>,

    /// Workspace tag this runner serves
    pub workspace: String,

    /// Owner ID for authentication
    pub owner_id: String,

    /// Agent ID for this service
    pub agent_id: String,

    pub enable_builtin_tools: bool,
    pub enable_langchain_tools: bool,
    pub secret_bootstrap_from_env: bool,

    /// Dedup journal retention window
    pub retention_hours: i64,

    /// Default per-tool execution timeout
    pub tool_timeout_secs: u64,

    pub journal_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, RcrtError> {
        dotenvy::dotenv().ok();

        let config = Config {
            base_url: std::env::var("RCRT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            proxy_url: std::env::var("RCRT_PROXY_URL").ok(),
            workspace: std::env::var("WORKSPACE")
                .unwrap_or_else(|_| schemas::DEFAULT_WORKSPACE.to_string()),
            owner_id: std::env::var("OWNER_ID")
                .unwrap_or_else(|_| "00000000-0000-0000-0000-000000000001".to_string()),
            agent_id: std::env::var("AGENT_ID").unwrap_or_else(|_| "tool-runner".to_string()),
            enable_builtin_tools: env_flag("ENABLE_BUILTIN_TOOLS", true),
            enable_langchain_tools: env_flag("ENABLE_LANGCHAIN_TOOLS", false),
            secret_bootstrap_from_env: env_flag("SECRET_BOOTSTRAP_FROM_ENV", false),
            retention_hours: env_parse("JOURNAL_RETENTION_HOURS", 24),
            tool_timeout_secs: env_parse("TOOL_TIMEOUT_SECS", 30),
            journal_path: std::env::var("JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tool-runner-journal.jsonl")),
        };

        if config.retention_hours <= 0 {
            return Err(RcrtError::Validation(
                "JOURNAL_RETENTION_HOURS must be positive".into(),
            ));
        }

        Ok(config)
    }

    /// Agent scope for secret resolution, when the configured agent id is a
    /// UUID the store knows.
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
