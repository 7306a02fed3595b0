/*!
 * Agent worker.
 *
 * One task per agent definition, an explicit state machine:
 * Loading -> Subscribing -> Idle -> BuildingContext -> Thinking -> Acting
 * -> Idle. Triggering events are processed in bus-delivery order; tool
 * responses from concurrently-issued requests may arrive in any order and
 * correlate solely through requestId.
 */

use crate::context::ContextBuilder;
use crate::definition::AgentDefinition;
use crate::llm::{ChatMessage, LlmClient, SamplingParams};
use crate::reply::{self, AgentReply, ReplyAction};
use crate::session::SessionSwitcher;
use rcrt_client::{BusEvent, EventStream, RcrtClient};
use rcrt_core::journal::{self, DedupJournal};
use rcrt_core::models::{Breadcrumb, BreadcrumbCreate, BreadcrumbUpdate, ContextMatch, MatchOp, Selector};
use rcrt_core::{schemas, RcrtError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SWITCH_COMMAND: &str = "switch-session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Loading,
    Subscribing,
    Idle,
    BuildingContext,
    Thinking,
    Acting,
}

#[derive(Default)]
struct ActivationTable {
    // requestId -> activation that issued it
    by_request: HashMap<String, u64>,
    // activation -> LLM iterations consumed
    iterations: HashMap<u64, u32>,
    next: u64,
}

impl ActivationTable {
    fn begin(&mut self) -> u64 {
        self.next += 1;
        self.iterations.insert(self.next, 1);
        self.next
    }

    /// Resume the activation that issued this requestId, counting one more
    /// iteration. Unknown requestIds (e.g. from a previous process) start a
    /// fresh activation.
    fn resume(&mut self, request_id: &str) -> (u64, u32) {
        match self.by_request.get(request_id).copied() {
            Some(activation) => {
                let count = self.iterations.entry(activation).or_insert(0);
                *count += 1;
                (activation, *count)
            }
            None => (self.begin(), 1),
        }
    }

    fn register_request(&mut self, activation: u64, request_id: &str) {
        self.by_request.insert(request_id.to_string(), activation);
    }
}

pub struct AgentWorker {
    client: Arc<RcrtClient>,
    llm: Arc<dyn LlmClient>,
    journal: Arc<DedupJournal>,
    definition: AgentDefinition,
    workspace: String,
    contexts: ContextBuilder,
    switcher: SessionSwitcher,
    activations: Mutex<ActivationTable>,
}

impl AgentWorker {
    pub fn new(
        client: Arc<RcrtClient>,
        llm: Arc<dyn LlmClient>,
        journal: Arc<DedupJournal>,
        definition: AgentDefinition,
        workspace: String,
    ) -> Self {
        let contexts = ContextBuilder::new(client.clone());
        let switcher = SessionSwitcher::new(client.clone());
        AgentWorker {
            client,
            llm,
            journal,
            definition,
            workspace,
            contexts,
            switcher,
            activations: Mutex::new(ActivationTable::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Selectors this worker opens streams for: the definition's
    /// subscriptions plus two implicit ones, tool responses addressed to
    /// this agent and control messages (session switches).
    pub fn selectors(&self) -> Vec<Selector> {
        let mut selectors = self.definition.subscriptions.selectors.clone();
        selectors.push(Selector {
            all_tags: Some(vec![
                self.workspace.clone(),
                schemas::tags::TOOL_RESPONSE.to_string(),
            ]),
            schema_name: Some(schemas::TOOL_RESPONSE_V1.to_string()),
            context_match: Some(vec![ContextMatch {
                path: "$.requestedBy".to_string(),
                op: MatchOp::Eq,
                value: json!(self.definition.name),
            }]),
            ..Default::default()
        });
        selectors.push(Selector {
            all_tags: Some(vec![schemas::tags::agent(&self.definition.name)]),
            schema_name: Some(schemas::SYSTEM_MESSAGE_V1.to_string()),
            ..Default::default()
        });
        selectors
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), RcrtError> {
        let name = self.definition.name.clone();
        self.trace_state(AgentState::Loading);
        info!("🤖 agent '{}' starting ({})", name, self.definition.model);
        self.log_available_tools().await;

        self.trace_state(AgentState::Subscribing);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for selector in self.selectors() {
            let (mut stream, handle) = EventStream::open(self.client.clone(), selector);
            handles.push(handle);
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(event) = stream.recv().await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        self.trace_state(AgentState::Idle);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.handle_event(event).await {
                        // One bad breadcrumb never stops the loop.
                        error!("agent '{}': event handling failed: {}", name, e);
                    }
                    self.trace_state(AgentState::Idle);
                }
            }
        }

        for handle in handles {
            handle.cancel();
        }
        info!("🛑 agent '{}' stopped", name);
        Ok(())
    }

    /// Informational only: the catalog tells the operator what this agent
    /// will find when it issues tool requests, nothing gates on it.
    async fn log_available_tools(&self) {
        let query = rcrt_client::ListQuery::schema(schemas::TOOL_CATALOG_V1).tag(&self.workspace);
        match self.client.list(&query).await {
            Ok(items) if items.is_empty() => {
                debug!("agent '{}': no tool catalog in {} yet", self.definition.name, self.workspace)
            }
            Ok(items) => {
                if let Ok(catalog) = self.client.get(items[0].id).await {
                    let tools: Vec<&str> = catalog
                        .context
                        .get("tools")
                        .and_then(|t| t.as_array())
                        .map(|entries| {
                            entries
                                .iter()
                                .filter_map(|e| e.get("name").and_then(|n| n.as_str()))
                                .collect()
                        })
                        .unwrap_or_default();
                    info!("   tools available in {}: {:?}", self.workspace, tools);
                }
            }
            Err(e) => debug!("agent '{}': catalog lookup failed: {}", self.definition.name, e),
        }
    }

    pub async fn handle_event(&self, event: BusEvent) -> Result<(), RcrtError> {
        if !event.is_breadcrumb() {
            if let Some(message) = &event.message {
                debug!("agent '{}' stream: {}", self.definition.name, message);
            }
            return Ok(());
        }
        if event.event_type == "breadcrumb.deleted" {
            return Ok(());
        }
        let Some(id) = event.breadcrumb_id else {
            return Ok(());
        };

        let key = journal::event_key(
            event.schema_name.as_deref().unwrap_or("-"),
            id,
            event.timestamp.as_deref().unwrap_or(""),
        );
        if self.journal.seen(&key) {
            debug!("event {} already handled, skipping", key);
            return Ok(());
        }

        let trigger = match self.client.get(id).await {
            Ok(bc) => bc,
            Err(RcrtError::NotFound(_)) => return Ok(()), // purged underneath us
            Err(e) => return Err(e),
        };

        if self.is_own_output(&trigger) {
            return Ok(());
        }

        if trigger.schema_name.as_deref() == Some(schemas::SYSTEM_MESSAGE_V1) {
            self.handle_command(&trigger).await?;
            self.journal.record(&key)?;
            return Ok(());
        }

        let activation = match self.resolve_activation(&trigger) {
            Some(activation) => activation,
            None => {
                // Not addressed to this agent (e.g. another agent's tool
                // response that slipped through a broad selector).
                self.journal.record(&key)?;
                return Ok(());
            }
        };

        let (activation_id, iteration) = activation;
        if iteration > self.definition.max_iterations {
            warn!(
                "agent '{}': activation {} exceeded {} iterations",
                self.definition.name, activation_id, self.definition.max_iterations
            );
            self.publish_agent_error(
                "validation",
                &format!(
                    "activation exceeded max_iterations ({})",
                    self.definition.max_iterations
                ),
                &trigger,
                None,
            )
            .await;
            self.journal.record(&key)?;
            return Ok(());
        }

        self.activate(&trigger, activation_id).await?;
        self.journal.record(&key)?;
        Ok(())
    }

    fn is_own_output(&self, trigger: &Breadcrumb) -> bool {
        let own_tag = schemas::tags::agent(&self.definition.name);
        match trigger.schema_name.as_deref() {
            Some(schemas::AGENT_RESPONSE_V1) => trigger.has_tag(&own_tag),
            Some(schemas::TOOL_REQUEST_V1) => {
                trigger.context.get("requestedBy").and_then(|v| v.as_str())
                    == Some(self.definition.name.as_str())
            }
            _ => false,
        }
    }

    /// Map a trigger to its activation. Tool responses resume the
    /// activation that issued the requestId; anything else begins a new
    /// one. Returns None for responses addressed to a different agent.
    fn resolve_activation(&self, trigger: &Breadcrumb) -> Option<(u64, u32)> {
        let mut table = self.activations.lock().expect("activation lock");
        if trigger.schema_name.as_deref() == Some(schemas::TOOL_RESPONSE_V1) {
            let requested_by = trigger.context.get("requestedBy").and_then(|v| v.as_str());
            if let Some(requested_by) = requested_by {
                if requested_by != self.definition.name {
                    return None;
                }
            }
            let request_id = trigger
                .context
                .get("requestId")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            Some(table.resume(request_id))
        } else {
            Some((table.begin(), 1))
        }
    }

    async fn handle_command(&self, trigger: &Breadcrumb) -> Result<(), RcrtError> {
        let command = trigger.context.get("command").and_then(|v| v.as_str());
        match command {
            Some(SWITCH_COMMAND) => {
                let target = trigger
                    .context
                    .get("target_context_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                let Some(target) = target else {
                    self.publish_agent_error(
                        "validation",
                        "switch-session requires target_context_id",
                        trigger,
                        None,
                    )
                    .await;
                    return Ok(());
                };
                if let Err(e) = self.switcher.switch(&self.definition.name, target).await {
                    warn!("agent '{}': session switch failed: {}", self.definition.name, e);
                    self.publish_agent_error(e.kind(), &e.to_string(), trigger, None).await;
                }
                Ok(())
            }
            _ => Ok(()), // unrecognized control messages are ignored
        }
    }

    async fn activate(&self, trigger: &Breadcrumb, activation_id: u64) -> Result<(), RcrtError> {
        self.trace_state(AgentState::BuildingContext);
        let messages = self.contexts.build(&self.definition, trigger).await?;

        self.trace_state(AgentState::Thinking);
        let raw = match self.think(&messages).await {
            Ok(raw) => raw,
            Err(RcrtError::LlmTimeout(d)) => {
                self.publish_agent_error(
                    "llm-timeout",
                    &format!("llm call exceeded {:?}", d),
                    trigger,
                    None,
                )
                .await;
                return Ok(());
            }
            Err(e) => {
                self.publish_agent_error(e.kind(), &e.to_string(), trigger, None).await;
                return Ok(());
            }
        };

        self.trace_state(AgentState::Acting);
        let parsed = match reply::parse_reply(&raw) {
            Ok(parsed) => parsed,
            Err(parse_error) => match self.repair(&messages, &raw, &parse_error).await {
                Ok(parsed) => parsed,
                Err(_) => {
                    self.publish_agent_error(
                        "llm-parse",
                        "reply was not parseable after one repair attempt",
                        trigger,
                        Some(&raw),
                    )
                    .await;
                    return Ok(());
                }
            },
        };

        self.execute_reply(parsed, trigger, activation_id).await;
        Ok(())
    }

    async fn think(&self, messages: &[ChatMessage]) -> Result<String, RcrtError> {
        let params = SamplingParams {
            temperature: self.definition.temperature,
            max_tokens: self.definition.max_tokens,
        };
        let deadline = Duration::from_secs(self.definition.llm_timeout_secs);
        match tokio::time::timeout(
            deadline,
            self.llm.chat(&self.definition.model, messages, &params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RcrtError::LlmTimeout(deadline)),
        }
    }

    /// One repair attempt: replay the conversation with the bad reply and
    /// the parse error appended.
    async fn repair(
        &self,
        messages: &[ChatMessage],
        raw: &str,
        parse_error: &RcrtError,
    ) -> Result<AgentReply, RcrtError> {
        let mut repair_messages = messages.to_vec();
        repair_messages.push(ChatMessage::assistant(raw));
        repair_messages.push(ChatMessage::user(reply::repair_prompt(&parse_error.to_string())));

        let raw = self.think(&repair_messages).await?;
        reply::parse_reply(&raw)
    }

    async fn execute_reply(&self, parsed: AgentReply, trigger: &Breadcrumb, activation_id: u64) {
        match parsed.action {
            ReplyAction::Create => {
                let Some(breadcrumb) = parsed.breadcrumb else {
                    self.publish_agent_error("validation", "create action without breadcrumb", trigger, None)
                        .await;
                    return;
                };

                let tool_requests = reply::extract_tool_requests(&breadcrumb.context);

                let mut tags = breadcrumb.tags.clone();
                ensure_tag(&mut tags, &self.workspace);
                ensure_tag(&mut tags, &schemas::tags::agent(&self.definition.name));
                if let Some(session_tag) = schemas::tags::session_of(&trigger.tags) {
                    if !tags.iter().any(|t| t.starts_with("session:")) {
                        tags.push(session_tag.to_string());
                    }
                }

                let create = BreadcrumbCreate {
                    title: breadcrumb.title,
                    context: breadcrumb.context,
                    tags,
                    schema_name: Some(breadcrumb.schema_name),
                    ttl: None,
                };
                match self.client.create(&create).await {
                    Ok(created) => {
                        debug!("agent '{}' published {}", self.definition.name, created.id)
                    }
                    Err(e) => {
                        self.publish_agent_error(e.kind(), &e.to_string(), trigger, None).await;
                        return;
                    }
                }

                self.publish_tool_requests(tool_requests, trigger, activation_id).await;
            }
            ReplyAction::Update => {
                let (Some(id), Some(expected_version)) =
                    (parsed.breadcrumb_id, parsed.expected_version)
                else {
                    self.publish_agent_error(
                        "validation",
                        "update action requires breadcrumb_id and expected_version",
                        trigger,
                        None,
                    )
                    .await;
                    return;
                };
                let Some(breadcrumb) = parsed.breadcrumb else {
                    self.publish_agent_error("validation", "update action without breadcrumb", trigger, None)
                        .await;
                    return;
                };

                let tool_requests = reply::extract_tool_requests(&breadcrumb.context);
                let patch = BreadcrumbUpdate {
                    title: Some(breadcrumb.title),
                    context: Some(breadcrumb.context),
                    tags: (!breadcrumb.tags.is_empty()).then_some(breadcrumb.tags),
                    ..Default::default()
                };
                if let Err(e) = self.client.update(id, expected_version, &patch).await {
                    // Conflict handling is the agent's call: it sees the
                    // error breadcrumb and can re-read then retry.
                    self.publish_agent_error(e.kind(), &e.to_string(), trigger, None).await;
                    return;
                }

                self.publish_tool_requests(tool_requests, trigger, activation_id).await;
            }
            ReplyAction::Delete => {
                if !self.definition.capabilities.can_delete {
                    self.publish_agent_error(
                        "validation",
                        "delete action requires the can_delete capability",
                        trigger,
                        None,
                    )
                    .await;
                    return;
                }
                let Some(id) = parsed.breadcrumb_id else {
                    self.publish_agent_error("validation", "delete action requires breadcrumb_id", trigger, None)
                        .await;
                    return;
                };
                if let Err(e) = self.client.delete(id).await {
                    self.publish_agent_error(e.kind(), &e.to_string(), trigger, None).await;
                }
            }
        }
    }

    /// Emit each nested tool call as its own tool.request.v1. All requests
    /// go out before the worker returns to Idle; responses re-enter through
    /// the subscription and resume this activation by requestId.
    async fn publish_tool_requests(
        &self,
        requests: Vec<reply::ToolRequestSpec>,
        trigger: &Breadcrumb,
        activation_id: u64,
    ) {
        for spec in requests {
            let mut tags = vec![
                self.workspace.clone(),
                schemas::tags::TOOL_REQUEST.to_string(),
                schemas::tags::agent(&self.definition.name),
            ];
            if let Some(session_tag) = schemas::tags::session_of(&trigger.tags) {
                tags.push(session_tag.to_string());
            }

            let create = BreadcrumbCreate {
                title: format!("{} request {}", spec.tool, spec.request_id),
                context: json!({
                    "tool": spec.tool,
                    "input": spec.input,
                    "requestId": spec.request_id,
                    "requestedBy": self.definition.name,
                }),
                tags,
                schema_name: Some(schemas::TOOL_REQUEST_V1.to_string()),
                ttl: None,
            };

            match self.client.create(&create).await {
                Ok(created) => {
                    self.activations
                        .lock()
                        .expect("activation lock")
                        .register_request(activation_id, &spec.request_id);
                    debug!(
                        "agent '{}' requested {} as {} ({})",
                        self.definition.name, spec.tool, spec.request_id, created.id
                    );
                }
                Err(e) => {
                    error!(
                        "agent '{}': tool request {} failed to publish: {}",
                        self.definition.name, spec.request_id, e
                    );
                }
            }
        }
    }

    async fn publish_agent_error(
        &self,
        kind: &str,
        message: &str,
        trigger: &Breadcrumb,
        raw: Option<&str>,
    ) {
        let mut context = json!({
            "agent": self.definition.name,
            "error_kind": kind,
            "error": message,
            "trigger_id": trigger.id,
        });
        if let Some(session_tag) = schemas::tags::session_of(&trigger.tags) {
            context["session_id"] = json!(session_tag.trim_start_matches("session:"));
        }
        if let Some(raw) = raw {
            context["raw"] = json!(raw);
        }

        let mut tags = vec![
            self.workspace.clone(),
            schemas::tags::AGENT_ERROR.to_string(),
            schemas::tags::agent(&self.definition.name),
        ];
        if let Some(session_tag) = schemas::tags::session_of(&trigger.tags) {
            tags.push(session_tag.to_string());
        }

        let breadcrumb = BreadcrumbCreate {
            title: format!("{} error: {}", self.definition.name, kind),
            context,
            tags,
            schema_name: Some(schemas::AGENT_RESPONSE_V1.to_string()),
            ttl: None,
        };
        if let Err(e) = self.client.create(&breadcrumb).await {
            error!("agent '{}': error breadcrumb failed to publish: {}", self.definition.name, e);
        }
    }

    fn trace_state(&self, state: AgentState) {
        debug!("agent '{}' -> {:?}", self.definition.name, state);
    }
}

fn ensure_tag(tags: &mut Vec<String>, tag: &str) {
    if !tags.iter().any(|t| t == tag) {
        tags.push(tag.to_string());
    }
}
