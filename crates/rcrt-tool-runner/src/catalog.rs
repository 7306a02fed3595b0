/*!
 * Workspace tool catalog.
 *
 * One tool.catalog.v1 breadcrumb per workspace is the discovery surface.
 * It is updated in place, never duplicated; cooperating runners serialize
 * through optimistic conflict-retry (read, merge tool lists, write).
 */

use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::{Breadcrumb, BreadcrumbCreate, BreadcrumbUpdate, ToolDescriptor};
use rcrt_core::{schemas, RcrtError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogTool {
    #[serde(flatten)]
    pub descriptor: ToolDescriptor,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_reason: Option<String>,
}

pub struct CatalogPublisher {
    client: Arc<RcrtClient>,
    workspace: String,
    runner_id: String,
}

impl CatalogPublisher {
    pub fn new(client: Arc<RcrtClient>, workspace: &str, runner_id: &str) -> Self {
        CatalogPublisher {
            client,
            workspace: workspace.to_string(),
            runner_id: runner_id.to_string(),
        }
    }

    /// Publish this runner's tool entries into the workspace catalog,
    /// merging with entries other runners own. Persistent conflict is an
    /// invariant failure: it is logged, surfaced to admins as a breadcrumb,
    /// and bubbles up fatal.
    pub async fn publish(&self, ours: &[CatalogTool]) -> Result<(), RcrtError> {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            match self.try_publish(ours).await {
                Ok(()) => return Ok(()),
                Err(RcrtError::Conflict { id, .. }) => {
                    warn!(
                        "catalog write conflict on {} (attempt {}/{}), re-reading",
                        id, attempt, MAX_CONFLICT_RETRIES
                    );
                }
                Err(e) => return Err(e),
            }
        }

        error!("catalog for {} would not converge after {} attempts", self.workspace, MAX_CONFLICT_RETRIES);
        self.emit_admin_alert().await;
        Err(RcrtError::Fatal(format!(
            "catalog update for {} kept conflicting",
            self.workspace
        )))
    }

    async fn try_publish(&self, ours: &[CatalogTool]) -> Result<(), RcrtError> {
        let catalogs = self.find_catalogs().await?;

        let Some((canonical, duplicates)) = catalogs.split_first() else {
            let breadcrumb = BreadcrumbCreate {
                title: format!("Tool catalog for {}", self.workspace),
                context: self.catalog_context(ours.to_vec()),
                tags: vec![
                    self.workspace.clone(),
                    schemas::tags::TOOL_CATALOG.to_string(),
                ],
                schema_name: Some(schemas::TOOL_CATALOG_V1.to_string()),
                ttl: None,
            };
            let created = self.client.create(&breadcrumb).await?;
            info!("📚 created catalog {} with {} tool(s)", created.id, ours.len());
            return Ok(());
        };

        // Single-per-workspace is enforced here, at write time: whatever
        // raced a duplicate into existence, the oldest catalog wins and the
        // rest are removed.
        for dup in duplicates {
            warn!("deleting duplicate catalog {}", dup.id);
            match self.client.delete(dup.id).await {
                Ok(()) | Err(RcrtError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let merged = merge_tools(existing_tools(canonical), ours);
        let count = merged.len();
        self.client
            .update(
                canonical.id,
                canonical.version,
                &BreadcrumbUpdate {
                    context: Some(self.catalog_context(merged)),
                    ..Default::default()
                },
            )
            .await?;
        info!("📚 catalog {} now lists {} tool(s)", canonical.id, count);
        Ok(())
    }

    /// All catalog breadcrumbs for the workspace, oldest first.
    async fn find_catalogs(&self) -> Result<Vec<Breadcrumb>, RcrtError> {
        let items = self
            .client
            .list(
                &ListQuery::schema(schemas::TOOL_CATALOG_V1)
                    .tag(&self.workspace),
            )
            .await?;

        let mut catalogs = Vec::with_capacity(items.len());
        for item in items {
            match self.client.get(item.id).await {
                Ok(bc) => catalogs.push(bc),
                Err(RcrtError::NotFound(_)) => {} // purged between list and get
                Err(e) => return Err(e),
            }
        }
        catalogs.sort_by_key(|bc| bc.created_at.unwrap_or(bc.updated_at));
        Ok(catalogs)
    }

    fn catalog_context(&self, tools: Vec<CatalogTool>) -> serde_json::Value {
        json!({
            "workspace": self.workspace,
            "tools": tools,
            "updated_by": self.runner_id,
            "updated_at": chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn emit_admin_alert(&self) {
        let alert = BreadcrumbCreate {
            title: format!("Catalog update stuck for {}", self.workspace),
            context: json!({
                "message": "tool.catalog.v1 kept conflicting; operator attention required",
                "workspace": self.workspace,
                "runner": self.runner_id,
                "error_kind": "fatal",
            }),
            tags: vec![
                self.workspace.clone(),
                schemas::tags::AGENT_ERROR.to_string(),
            ],
            schema_name: Some(schemas::SYSTEM_MESSAGE_V1.to_string()),
            ttl: None,
        };
        if let Err(e) = self.client.create(&alert).await {
            error!("failed to surface catalog alert: {}", e);
        }
    }
}

fn existing_tools(catalog: &Breadcrumb) -> Vec<CatalogTool> {
    catalog
        .context
        .get("tools")
        .and_then(|tools| serde_json::from_value(tools.clone()).ok())
        .unwrap_or_default()
}

/// Replace same-named entries with ours, keep everything another runner
/// registered, append what is new. Existing order is preserved so the
/// catalog stays stable across republishes.
fn merge_tools(existing: Vec<CatalogTool>, ours: &[CatalogTool]) -> Vec<CatalogTool> {
    let mut merged: Vec<CatalogTool> = existing
        .into_iter()
        .map(|entry| {
            ours.iter()
                .find(|t| t.descriptor.name == entry.descriptor.name)
                .cloned()
                .unwrap_or(entry)
        })
        .collect();

    for tool in ours {
        if !merged.iter().any(|t| t.descriptor.name == tool.descriptor.name) {
            merged.push(tool.clone());
        }
    }
    merged
}
