use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: Uuid,
    pub title: String,
    pub context: JsonValue,
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    pub version: i32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Breadcrumb {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbCreate {
    pub title: String,
    pub context: JsonValue,
    pub tags: Vec<String>,
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreadcrumbUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
}

// Lightweight shape from the list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreadcrumbListItem {
    pub id: Uuid,
    pub title: Option<String>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub schema_name: Option<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct Created {
    pub id: Uuid,
    pub version: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub any_tags: Option<Vec<String>>,   // match if overlap
    pub all_tags: Option<Vec<String>>,   // match if all contained
    pub schema_name: Option<String>,
    pub context_match: Option<Vec<ContextMatch>>, // simple ops on JSON paths
}

impl Selector {
    pub fn is_empty(&self) -> bool {
        self.any_tags.is_none()
            && self.all_tags.is_none()
            && self.schema_name.is_none()
            && self.context_match.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMatch {
    pub path: String,     // e.g. $.requestId or $.tools[0].name
    pub op: MatchOp,
    pub value: JsonValue, // comparison value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOp {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Lt,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    pub input_schema: JsonValue,
    pub output_schema: JsonValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_secrets: Vec<RequiredSecret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredSecret {
    pub name: String,
    pub scope_type: SecretScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScope {
    Global,
    Agent,
    Workspace,
}

impl SecretScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretScope::Global => "global",
            SecretScope::Agent => "agent",
            SecretScope::Workspace => "workspace",
        }
    }
}

// Context payload of a tool.request.v1 breadcrumb. requestId is mandatory
// per the request/response contract, but parsed as optional so the runner
// can reject malformed requests with a validation response instead of a
// deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub input: JsonValue,
    #[serde(rename = "requestId", default)]
    pub request_id: Option<String>,
    #[serde(rename = "requestedBy", default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

// Context payload of the echoing tool.response.v1 breadcrumb.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub tool: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "errorKind", default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub execution_time_ms: u64,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "requestedBy", default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}
