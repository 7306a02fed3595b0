use crate::client::RcrtClient;
use futures::stream::StreamExt;
use rcrt_core::models::Selector;
use rcrt_core::{selector, RcrtError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EVENT_CREATED: &str = "breadcrumb.created";
pub const EVENT_UPDATED: &str = "breadcrumb.updated";
pub const EVENT_DELETED: &str = "breadcrumb.deleted";
pub const EVENT_PING: &str = "ping";
pub const EVENT_SYSTEM: &str = "system";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub breadcrumb_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    // Some hosts inline the context on the event; when absent and a
    // selector needs it, the stream fetches the breadcrumb.
    #[serde(default)]
    pub context: Option<JsonValue>,
    #[serde(default)]
    pub message: Option<String>,
}

impl BusEvent {
    fn system(message: &str) -> Self {
        BusEvent {
            event_type: EVENT_SYSTEM.to_string(),
            breadcrumb_id: None,
            tags: None,
            schema_name: None,
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            context: None,
            message: Some(message.to_string()),
        }
    }

    pub fn is_breadcrumb(&self) -> bool {
        self.event_type.starts_with("breadcrumb.")
    }
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// First reconnect delay; doubles per failed attempt.
    pub initial_backoff: Duration,
    /// Attempts per burst after which the delay stops growing.
    pub reconnect_cap: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            initial_backoff: Duration::from_secs(5),
            reconnect_cap: 5,
        }
    }
}

/// A lazy, infinite, cancellable sequence of bus events matching a selector.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl EventStream {
    pub fn open(client: Arc<RcrtClient>, selector: Selector) -> (EventStream, StreamHandle) {
        Self::open_with_options(client, selector, StreamOptions::default())
    }

    pub fn open_with_options(
        client: Arc<RcrtClient>,
        selector: Selector,
        options: StreamOptions,
    ) -> (EventStream, StreamHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let task = tokio::spawn(run_stream(client, selector, options, tx, token.clone()));
        (EventStream { rx }, StreamHandle { token, task })
    }

    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

/// Cancel handle for an open stream. Cancelling closes the transport and the
/// event sequence completes deterministically.
pub struct StreamHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn run_stream(
    client: Arc<RcrtClient>,
    selector: Selector,
    options: StreamOptions,
    tx: mpsc::UnboundedSender<BusEvent>,
    cancel: CancellationToken,
) {
    // The shared client carries a whole-request timeout that would sever a
    // long-lived SSE response, so the stream keeps its own connection-only
    // client.
    let http = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
    {
        Ok(http) => http,
        Err(e) => {
            error!("SSE client build failed: {}", e);
            return;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        if attempt > 0 {
            if tx.send(BusEvent::system("Reconnecting")).is_err() {
                break;
            }
            let capped = attempt.min(options.reconnect_cap);
            let delay = options.initial_backoff * 2u32.pow(capped.saturating_sub(1));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match connection(&client, &http, &selector, &tx, &cancel).await {
            Ok(true) => {
                // Stream was up and then ended; start a fresh burst.
                warn!("SSE stream ended, reconnecting...");
                attempt = 1;
            }
            Ok(false) => break, // cancelled or receiver dropped
            Err(e) => {
                if matches!(e, RcrtError::Auth(_)) {
                    debug!("SSE auth rejected, re-acquiring token");
                    if let Err(refresh_err) = client.refresh_token().await {
                        warn!("token re-acquisition failed: {}", refresh_err);
                    }
                }
                error!("SSE connection error: {}, reconnecting", e);
                attempt += 1;
            }
        }
    }
    debug!("SSE stream task finished");
}

/// One SSE connection. Returns Ok(true) when the connection was established
/// and later ended, Ok(false) when cancelled or the consumer went away.
async fn connection(
    client: &Arc<RcrtClient>,
    http: &reqwest::Client,
    selector: &Selector,
    tx: &mpsc::UnboundedSender<BusEvent>,
    cancel: &CancellationToken,
) -> Result<bool, RcrtError> {
    let token = client.bearer().await?;
    let url = format!("{}/events/stream", client.base_url());

    let response = tokio::select! {
        _ = cancel.cancelled() => return Ok(false),
        result = http
            .get(&url)
            .bearer_auth(&token)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send() => result.map_err(crate::client::map_reqwest_error)?,
    };

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(RcrtError::Auth(format!("SSE connection rejected: {}", status)));
    }
    if !status.is_success() {
        return Err(RcrtError::Transport(format!("SSE connection failed: {}", status)));
    }

    info!("✅ SSE stream connected");
    if tx.send(BusEvent::system("Connected")).is_err() {
        return Ok(false);
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            chunk = stream.next() => chunk,
        };
        let Some(chunk_result) = chunk else {
            return Ok(true); // server closed the stream
        };
        let chunk = chunk_result.map_err(|e| RcrtError::Transport(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            // Chunk delimiter used by hosts that stream LLM-style output.
            if data == "[FINAL]" {
                continue;
            }

            let event = match serde_json::from_str::<BusEvent>(data) {
                Ok(event) => event,
                Err(e) => {
                    warn!("unparseable SSE event dropped: {}", e);
                    continue;
                }
            };

            if !passes_selector(client, selector, &event).await {
                continue;
            }
            if tx.send(event).is_err() {
                debug!("event receiver dropped");
                return Ok(false);
            }
        }
    }
}

/// Full client-side selector check. The server may over-deliver (some hosts
/// filter by tags only, some not at all), so every breadcrumb event is
/// re-checked here before it surfaces.
async fn passes_selector(client: &Arc<RcrtClient>, sel: &Selector, event: &BusEvent) -> bool {
    if !event.is_breadcrumb() {
        // ping/system events always surface; consumers decide.
        return true;
    }

    let empty = Vec::new();
    let tags = event.tags.as_ref().unwrap_or(&empty);
    let schema = event.schema_name.as_deref();

    if sel.context_match.is_none() {
        return selector::matches(schema, tags, &JsonValue::Null, sel);
    }

    if let Some(context) = &event.context {
        return selector::matches(schema, tags, context, sel);
    }

    // The event carries no context but the selector needs one.
    let Some(id) = event.breadcrumb_id else {
        return false;
    };
    match client.get(id).await {
        Ok(bc) => selector::matches(bc.schema_name.as_deref(), &bc.tags, &bc.context, sel),
        Err(e) => {
            warn!("context fetch for side-filtering failed on {}: {}", id, e);
            false
        }
    }
}
