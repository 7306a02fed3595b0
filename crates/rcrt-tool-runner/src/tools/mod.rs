pub mod echo;
pub mod external;
pub mod http_fetch;
pub mod random;
pub mod web_search;

use crate::registry::ToolRegistry;
use std::sync::Arc;

/// Register the built-in tool set.
pub fn register_builtins(registry: &ToolRegistry) {
    registry.register(Arc::new(echo::EchoTool));
    registry.register(Arc::new(random::RandomNumberTool));
    registry.register(Arc::new(http_fetch::HttpFetchTool::new()));
    registry.register(Arc::new(web_search::WebSearchTool::new()));
}
