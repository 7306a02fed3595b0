/*!
 * Tool runner event loop.
 *
 * Consumes tool.request.v1 breadcrumbs from the workspace stream, executes
 * the named tool, and publishes the echoing tool.response.v1. One bad
 * breadcrumb never stops the loop; every recoverable failure becomes an
 * error response so it stays visible on the bus.
 */

use crate::catalog::{CatalogPublisher, CatalogTool};
use crate::config::Config;
use crate::registry::{RegisteredTool, ToolRegistry, ToolSecrets};
use rcrt_client::{BusEvent, EventStream, ListQuery, RcrtClient, SecretManager, SecretResolution};
use rcrt_core::journal::DedupJournal;
use rcrt_core::models::{
    BreadcrumbCreate, Selector, ToolRequest, ToolResponse, ToolStatus,
};
use rcrt_core::{schemas, RcrtError};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DRAIN_GRACE: Duration = Duration::from_secs(10);

pub struct ToolRunner {
    client: Arc<RcrtClient>,
    registry: Arc<ToolRegistry>,
    secrets: SecretManager,
    journal: Arc<DedupJournal>,
    catalog: CatalogPublisher,
    config: Config,
}

impl ToolRunner {
    pub fn new(
        client: Arc<RcrtClient>,
        registry: Arc<ToolRegistry>,
        secrets: SecretManager,
        journal: Arc<DedupJournal>,
        config: Config,
    ) -> Self {
        let catalog = CatalogPublisher::new(client.clone(), &config.workspace, &config.agent_id);
        ToolRunner {
            client,
            registry,
            secrets,
            journal,
            catalog,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Startup sequence: resolve secrets, mark tools (in)active, publish
    /// the catalog.
    pub async fn startup(&self) -> Result<(), RcrtError> {
        let agent_scope = self.config.agent_scope_id();

        for name in self.registry.names() {
            let Some(reg) = self.registry.get(&name) else { continue };
            let required = reg.descriptor.required_secrets.clone();
            if required.is_empty() {
                self.registry.set_active(&name, Vec::new());
                continue;
            }

            let mut resolved = Vec::new();
            let mut missing = Vec::new();
            for requirement in &required {
                match self.secrets.ensure(requirement, agent_scope).await? {
                    SecretResolution::Found(secret_ref) => resolved.push(secret_ref),
                    SecretResolution::Missing => missing.push(requirement.clone()),
                }
            }

            if missing.is_empty() {
                self.registry.set_active(&name, resolved);
            } else {
                let names: Vec<_> = missing.iter().map(|m| m.name.clone()).collect();
                warn!("tool '{}' inactive, missing secrets: {:?}", name, names);
                self.registry
                    .set_inactive(&name, &format!("missing secrets: {}", names.join(", ")));
                self.secrets
                    .emit_config_request(&self.config.workspace, &name, &missing)
                    .await?;
            }
        }

        self.catalog.publish(&self.catalog_entries()).await?;
        info!(
            "🔧 tool runner ready: {} tool(s) registered in {}",
            self.registry.len(),
            self.config.workspace
        );
        Ok(())
    }

    fn catalog_entries(&self) -> Vec<CatalogTool> {
        self.registry
            .names()
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|reg| CatalogTool {
                descriptor: reg.descriptor.clone(),
                active: reg.active,
                inactive_reason: reg.inactive_reason.clone(),
            })
            .collect()
    }

    fn request_selector(&self) -> Selector {
        Selector {
            all_tags: Some(vec![
                self.config.workspace.clone(),
                schemas::tags::TOOL_REQUEST.to_string(),
            ]),
            schema_name: Some(schemas::TOOL_REQUEST_V1.to_string()),
            ..Default::default()
        }
    }

    pub async fn run(&self) -> Result<(), RcrtError> {
        self.startup().await?;

        let (mut stream, handle) = EventStream::open(self.client.clone(), self.request_selector());
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!("📡 listening for tool requests...");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("🛑 shutdown requested");
                    break;
                }
                event = stream.recv() => {
                    let Some(event) = event else {
                        return Err(RcrtError::Transport("event stream closed".into()));
                    };
                    self.on_event(event, &mut in_flight).await;
                }
            }
        }

        handle.cancel();
        self.shutdown(in_flight).await;
        Ok(())
    }

    async fn on_event(&self, event: BusEvent, in_flight: &mut JoinSet<()>) {
        match event.event_type.as_str() {
            "breadcrumb.created" | "breadcrumb.updated" => {}
            "system" => {
                if let Some(message) = &event.message {
                    debug!("stream: {}", message);
                }
                return;
            }
            _ => return,
        }
        let Some(id) = event.breadcrumb_id else { return };

        if let Err(e) = self.dispatch(id, in_flight).await {
            // Recoverable per-request failure; the loop keeps going.
            error!("request {} not dispatched: {}", id, e);
        }
    }

    /// Process a single request breadcrumb to completion. The event loop
    /// dispatches concurrently; this sequential variant backs tests and
    /// one-shot invocations.
    pub async fn process_request(&self, id: Uuid) -> Result<(), RcrtError> {
        let mut set = JoinSet::new();
        self.dispatch(id, &mut set).await?;
        while set.join_next().await.is_some() {}
        Ok(())
    }

    async fn dispatch(&self, id: Uuid, in_flight: &mut JoinSet<()>) -> Result<(), RcrtError> {
        let breadcrumb = self.client.get(id).await?;
        let request: ToolRequest = match serde_json::from_value(breadcrumb.context.clone()) {
            Ok(request) => request,
            Err(e) => {
                // Even a malformed request gets a visible error response;
                // correlate on whatever is salvageable.
                let tool = breadcrumb
                    .context
                    .get("tool")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let request_id = breadcrumb
                    .context
                    .get("requestId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| id.to_string());
                self.publish_error(
                    &tool,
                    &request_id,
                    None,
                    "validation",
                    &format!("request context malformed: {}", e),
                    0,
                )
                .await;
                return Ok(());
            }
        };

        // requestId is the dedup key and the response correlator; without
        // one the request is rejected rather than guessed at.
        let Some(request_id) = request.request_id.clone() else {
            self.publish_error(
                &request.tool,
                &id.to_string(),
                request.requested_by.as_deref(),
                "validation",
                "requestId is required",
                0,
            )
            .await;
            return Ok(());
        };

        if self.journal.seen(&request_id) {
            debug!("request {} already served (journal), skipping", request_id);
            return Ok(());
        }
        if self.already_served(&request_id).await {
            debug!("request {} already served (store), skipping", request_id);
            self.journal.record(&request_id)?;
            return Ok(());
        }

        let Some(reg) = self.registry.get(&request.tool) else {
            self.publish_error(
                &request.tool,
                &request_id,
                request.requested_by.as_deref(),
                "not-found",
                &format!("unknown tool '{}'", request.tool),
                0,
            )
            .await;
            return Ok(());
        };

        if !reg.active {
            let reason = reg
                .inactive_reason
                .clone()
                .unwrap_or_else(|| "tool is inactive".to_string());
            self.publish_error(
                &request.tool,
                &request_id,
                request.requested_by.as_deref(),
                "config-missing",
                &reason,
                0,
            )
            .await;
            return Ok(());
        }

        if let Err(message) = reg.validate_input(&request.input) {
            self.publish_error(
                &request.tool,
                &request_id,
                request.requested_by.as_deref(),
                "validation",
                &message,
                0,
            )
            .await;
            return Ok(());
        }

        let client = self.client.clone();
        let secrets = self.secrets.clone();
        let journal = self.journal.clone();
        let workspace = self.config.workspace.clone();
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);

        in_flight.spawn(async move {
            let response =
                execute_tool(&secrets, reg, &request, &request_id, timeout).await;
            publish_response(&client, &journal, &workspace, response).await;
        });
        Ok(())
    }

    /// Cross-process already-served check: another runner may have answered
    /// this requestId before we connected. Responses carry the requestId in
    /// their title, so the summary list is enough to detect them.
    async fn already_served(&self, request_id: &str) -> bool {
        let query = ListQuery::schema(schemas::TOOL_RESPONSE_V1)
            .tag(&self.config.workspace)
            .tag(schemas::tags::TOOL_RESPONSE);
        match self.client.list(&query).await {
            Ok(items) => items.iter().any(|item| {
                item.title
                    .as_deref()
                    .map(|t| t.contains(request_id))
                    .unwrap_or(false)
            }),
            Err(e) => {
                warn!("already-served lookup failed ({}), proceeding", e);
                false
            }
        }
    }

    async fn publish_error(
        &self,
        tool: &str,
        request_id: &str,
        requested_by: Option<&str>,
        kind: &str,
        message: &str,
        execution_time_ms: u64,
    ) {
        let response = ToolResponse {
            tool: tool.to_string(),
            status: ToolStatus::Error,
            output: None,
            error: Some(message.to_string()),
            error_kind: Some(kind.to_string()),
            execution_time_ms,
            request_id: request_id.to_string(),
            requested_by: requested_by.map(|s| s.to_string()),
        };
        publish_response(&self.client, &self.journal, &self.config.workspace, response).await;
    }

    /// Mark this runner's tools inactive on the catalog, then drain
    /// in-flight executions up to the grace period.
    async fn shutdown(&self, mut in_flight: JoinSet<()>) {
        self.registry.set_all_inactive("runner shutting down");
        if let Err(e) = self.catalog.publish(&self.catalog_entries()).await {
            warn!("catalog deactivation failed during shutdown: {}", e);
        }

        let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
        while !in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, in_flight.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!("drain grace elapsed, aborting {} execution(s)", in_flight.len());
                    in_flight.abort_all();
                    break;
                }
            }
        }
        info!("🛑 tool runner stopped");
    }
}

/// Run one tool invocation: semaphore slot, per-invocation secrets, timed
/// execution with panic isolation.
async fn execute_tool(
    secrets: &SecretManager,
    reg: Arc<RegisteredTool>,
    request: &ToolRequest,
    request_id: &str,
    timeout: Duration,
) -> ToolResponse {
    let tool_name = reg.descriptor.name.clone();
    let requested_by = request.requested_by.clone();

    // FIFO per-tool concurrency bound.
    let _permit = match reg.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(&tool_name, request_id, requested_by, "executor-fault", "tool semaphore closed", 0);
        }
    };

    let started = Instant::now();

    // Secrets are decrypted for this invocation only; ToolSecrets scrubs
    // them when this function returns.
    let mut tool_secrets = ToolSecrets::default();
    for secret_ref in &reg.secret_refs {
        let reason = format!("tool invocation {} request {}", tool_name, request_id);
        match secrets.decrypt(secret_ref, &reason).await {
            Ok(value) => tool_secrets.insert(secret_ref.name.clone(), value),
            Err(e) => {
                return error_response(
                    &tool_name,
                    request_id,
                    requested_by,
                    e.kind(),
                    &format!("secret '{}' unavailable: {}", secret_ref.name, e),
                    started.elapsed().as_millis() as u64,
                );
            }
        }
    }

    let executor = reg.tool.clone();
    let input = request.input.clone();
    let task = tokio::spawn(async move { executor.execute(input, &tool_secrets).await });
    let abort = task.abort_handle();

    let outcome = tokio::time::timeout(timeout, task).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Err(_) => {
            abort.abort();
            error_response(
                &tool_name,
                request_id,
                requested_by,
                "timeout",
                &format!("execution exceeded {:?}", timeout),
                elapsed_ms,
            )
        }
        Ok(Err(join_error)) => error_response(
            &tool_name,
            request_id,
            requested_by,
            "executor-fault",
            &format!("executor panicked: {}", join_error),
            elapsed_ms,
        ),
        Ok(Ok(Err(tool_error))) => error_response(
            &tool_name,
            request_id,
            requested_by,
            "executor-fault",
            &format!("{:#}", tool_error),
            elapsed_ms,
        ),
        Ok(Ok(Ok(output))) => ToolResponse {
            tool: tool_name,
            status: ToolStatus::Success,
            output: Some(output),
            error: None,
            error_kind: None,
            execution_time_ms: elapsed_ms,
            request_id: request_id.to_string(),
            requested_by,
        },
    }
}

fn error_response(
    tool: &str,
    request_id: &str,
    requested_by: Option<String>,
    kind: &str,
    message: &str,
    execution_time_ms: u64,
) -> ToolResponse {
    ToolResponse {
        tool: tool.to_string(),
        status: ToolStatus::Error,
        output: None,
        error: Some(message.to_string()),
        error_kind: Some(kind.to_string()),
        execution_time_ms,
        request_id: request_id.to_string(),
        requested_by,
    }
}

/// Publish the response breadcrumb, then record the requestId in the
/// journal. The title carries the requestId so other runners can detect an
/// already-served request from summaries alone.
async fn publish_response(
    client: &Arc<RcrtClient>,
    journal: &Arc<DedupJournal>,
    workspace: &str,
    response: ToolResponse,
) {
    let request_id = response.request_id.clone();
    let tool = response.tool.clone();
    let status = response.status;

    let context = match serde_json::to_value(&response) {
        Ok(JsonValue::Object(map)) => JsonValue::Object(map),
        _ => {
            error!("response for {} did not serialize", request_id);
            return;
        }
    };

    let breadcrumb = BreadcrumbCreate {
        title: format!("{} response for {}", tool, request_id),
        context,
        tags: vec![
            workspace.to_string(),
            schemas::tags::TOOL_RESPONSE.to_string(),
            schemas::tags::tool(&tool),
        ],
        schema_name: Some(schemas::TOOL_RESPONSE_V1.to_string()),
        ttl: None,
    };

    match client.create(&breadcrumb).await {
        Ok(created) => {
            debug!(
                "📤 {} response for {} published as {} ({:?})",
                tool, request_id, created.id, status
            );
            if let Err(e) = journal.record(&request_id) {
                error!("journal write failed for {}: {}", request_id, e);
            }
        }
        Err(RcrtError::Conflict { .. }) => {
            // Another runner won the race; this requestId is served.
            debug!("response for {} already exists, recording as served", request_id);
            let _ = journal.record(&request_id);
        }
        Err(e) => {
            error!("response publish for {} failed: {}", request_id, e);
        }
    }
}
