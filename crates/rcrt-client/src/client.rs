use rcrt_core::models::{
    Breadcrumb, BreadcrumbCreate, BreadcrumbListItem, BreadcrumbUpdate, Created,
};
use rcrt_core::RcrtError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const READ_RETRIES: u32 = 5;
const READ_BACKOFF: Duration = Duration::from_millis(500);
// Renew when the token has less than this much life left.
const RENEWAL_MARGIN_SECS: i64 = 600;

#[derive(Debug, Serialize)]
struct TokenRequest {
    owner_id: String,
    agent_id: String,
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    exp: Option<i64>,
}

#[derive(Debug, Clone)]
struct TokenInfo {
    token: String,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: Uuid,
}

/// Query accepted by `list`: a subset of selector fields. The server takes a
/// single tag plus schema_name as URL parameters; everything beyond that is
/// filtered client-side.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub schema_name: Option<String>,
    pub tags: Vec<String>,
}

impl ListQuery {
    pub fn schema(schema_name: &str) -> Self {
        ListQuery {
            schema_name: Some(schema_name.to_string()),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

#[derive(Debug)]
pub struct RcrtClient {
    base_url: String,
    http: reqwest::Client,
    token: Arc<RwLock<Option<TokenInfo>>>,
    owner_id: String,
    agent_id: String,
}

impl RcrtClient {
    pub async fn connect(base_url: &str, owner_id: &str, agent_id: &str) -> Result<Self, RcrtError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RcrtError::Transport(e.to_string()))?;

        let client = RcrtClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http.clone(),
            token: Arc::new(RwLock::new(None)),
            owner_id: owner_id.to_string(),
            agent_id: agent_id.to_string(),
        };

        client.refresh_token().await?;
        info!("🔐 Connected to breadcrumb store at {}", client.base_url);
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Spawn a background task that renews the bearer token before expiry.
    pub fn start_token_renewal(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                let expiring = {
                    let guard = client.token.read().await;
                    match &*guard {
                        Some(info) => info
                            .expires_at
                            .map(|exp| exp <= chrono::Utc::now().timestamp() + RENEWAL_MARGIN_SECS)
                            .unwrap_or(false),
                        None => true,
                    }
                };
                if expiring {
                    if let Err(e) = client.refresh_token().await {
                        warn!("background token renewal failed: {}", e);
                    }
                }
            }
        });
    }

    pub(crate) async fn refresh_token(&self) -> Result<(), RcrtError> {
        let request = TokenRequest {
            owner_id: self.owner_id.clone(),
            agent_id: self.agent_id.clone(),
            roles: vec!["curator".to_string(), "emitter".to_string(), "subscriber".to_string()],
        };

        let url = format!("{}/auth/token", self.base_url);
        debug!("requesting bearer token from {}", url);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RcrtError::Auth(format!("token request failed: {} - {}", status, body)));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| RcrtError::Transport(format!("token response malformed: {}", e)))?;

        *self.token.write().await = Some(TokenInfo {
            token: token_response.token,
            expires_at: token_response.exp,
        });
        Ok(())
    }

    pub(crate) async fn bearer(&self) -> Result<String, RcrtError> {
        {
            let guard = self.token.read().await;
            if let Some(info) = &*guard {
                let fresh = info
                    .expires_at
                    .map(|exp| exp > chrono::Utc::now().timestamp())
                    .unwrap_or(true);
                if fresh {
                    return Ok(info.token.clone());
                }
            }
        }
        self.refresh_token().await?;
        let guard = self.token.read().await;
        guard
            .as_ref()
            .map(|info| info.token.clone())
            .ok_or_else(|| RcrtError::Auth("no token after refresh".into()))
    }

    /// Send an authorized request. A 401 triggers exactly one token
    /// re-acquisition and replay; a second rejection surfaces as auth.
    async fn send_authed(
        &self,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RcrtError> {
        let token = self.bearer().await?;
        let response = build(&self.http, &token).send().await.map_err(map_reqwest_error)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("request rejected with 401, re-acquiring token");
        self.refresh_token().await?;
        let token = self.bearer().await?;
        let response = build(&self.http, &token).send().await.map_err(map_reqwest_error)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(RcrtError::Auth("token rejected after re-acquisition".into()));
        }
        Ok(response)
    }

    pub async fn create(&self, breadcrumb: &BreadcrumbCreate) -> Result<Created, RcrtError> {
        if breadcrumb.schema_name.is_none() {
            return Err(RcrtError::Validation("schema_name is required".into()));
        }

        let url = format!("{}/breadcrumbs", self.base_url);
        let response = self
            .send_authed(|http, token| http.post(&url).bearer_auth(token).json(breadcrumb))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, None));
        }

        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| RcrtError::Transport(format!("create response malformed: {}", e)))?;
        debug!("📤 created breadcrumb {}", created.id);
        Ok(Created {
            id: created.id,
            version: 1,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Breadcrumb, RcrtError> {
        self.with_read_retries(|| async {
            let url = format!("{}/breadcrumbs/{}", self.base_url, id);
            let response = self
                .send_authed(|http, token| http.get(&url).bearer_auth(token))
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(map_status(status, &body, Some(id)));
            }

            response
                .json::<Breadcrumb>()
                .await
                .map_err(|e| RcrtError::Transport(format!("breadcrumb malformed: {}", e)))
        })
        .await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<BreadcrumbListItem>, RcrtError> {
        self.with_read_retries(|| async {
            let mut url = format!("{}/breadcrumbs", self.base_url);
            let mut params = Vec::new();
            if let Some(schema) = &query.schema_name {
                params.push(format!("schema_name={}", schema));
            }
            // The list endpoint accepts a single tag; extra tags are
            // filtered below.
            if let Some(first) = query.tags.first() {
                params.push(format!("tag={}", first));
            }
            if !params.is_empty() {
                url = format!("{}?{}", url, params.join("&"));
            }

            let response = self
                .send_authed(|http, token| http.get(&url).bearer_auth(token))
                .await?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(map_status(status, &body, None));
            }

            let items: Vec<BreadcrumbListItem> = response
                .json()
                .await
                .map_err(|e| RcrtError::Transport(format!("list response malformed: {}", e)))?;

            Ok(items
                .into_iter()
                .filter(|item| {
                    if let Some(schema) = &query.schema_name {
                        if item.schema_name.as_deref() != Some(schema.as_str()) {
                            return false;
                        }
                    }
                    query
                        .tags
                        .iter()
                        .all(|t| item.tags.iter().any(|have| have == t))
                })
                .collect())
        })
        .await
    }

    /// Optimistic update. Fails with conflict when the server's version is
    /// not `expected_version`; the caller decides whether to re-read and
    /// retry. Returns the new version.
    pub async fn update(
        &self,
        id: Uuid,
        expected_version: i32,
        patch: &BreadcrumbUpdate,
    ) -> Result<i32, RcrtError> {
        let url = format!("{}/breadcrumbs/{}", self.base_url, id);
        let response = self
            .send_authed(|http, token| {
                http.patch(&url)
                    .bearer_auth(token)
                    .header("If-Match", expected_version.to_string())
                    .json(patch)
            })
            .await?;

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::CONFLICT {
            return Err(RcrtError::Conflict {
                id,
                expected: expected_version,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, Some(id)));
        }

        debug!("🔄 updated breadcrumb {} to v{}", id, expected_version + 1);
        Ok(expected_version + 1)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RcrtError> {
        let url = format!("{}/breadcrumbs/{}", self.base_url, id);
        let response = self
            .send_authed(|http, token| http.delete(&url).bearer_auth(token))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body, Some(id)));
        }
        Ok(())
    }

    /// Retry idempotent reads: transport errors back off exponentially for
    /// up to five attempts, timeouts get a single retry.
    async fn with_read_retries<T, F, Fut>(&self, op: F) -> Result<T, RcrtError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RcrtError>>,
    {
        let mut delay = READ_BACKOFF;
        let mut timeout_retried = false;
        for attempt in 1..=READ_RETRIES {
            match op().await {
                Ok(value) => return Ok(value),
                Err(RcrtError::Transport(msg)) if attempt < READ_RETRIES => {
                    warn!("read failed (attempt {}/{}): {}, retrying in {:?}", attempt, READ_RETRIES, msg, delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(RcrtError::Timeout(d)) if !timeout_retried => {
                    warn!("read timed out after {:?}, retrying once", d);
                    timeout_retried = true;
                }
                Err(e) => return Err(e),
            }
        }
        op().await
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> RcrtError {
    if e.is_timeout() {
        RcrtError::Timeout(HTTP_TIMEOUT)
    } else {
        RcrtError::Transport(e.to_string())
    }
}

pub(crate) fn map_status(status: StatusCode, body: &str, id: Option<Uuid>) -> RcrtError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RcrtError::Validation(format!("{} - {}", status, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RcrtError::Auth(format!("{} - {}", status, body))
        }
        StatusCode::NOT_FOUND => RcrtError::NotFound(
            id.map(|i| i.to_string()).unwrap_or_else(|| body.to_string()),
        ),
        _ => RcrtError::Transport(format!("{} - {}", status, body)),
    }
}
