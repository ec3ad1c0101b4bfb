//! HTTP-backed nodes: generic requests and outbound webhooks.
//!
//! Both nodes report a resource key so the engine can isolate a failing host
//! (or webhook endpoint) behind its own circuit breaker.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::template::{render_template, resolve_value};
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client with timeout defaults: {}", e);
            Client::new()
        })
}

#[derive(Debug, Deserialize)]
struct AuthConfig {
    /// Credential service to fetch a token for
    #[serde(default)]
    credential: Option<String>,
    /// `bearer`, `api_key`, or `header:<name>`
    #[serde(default = "default_auth_type")]
    auth_type: String,
}

fn default_auth_type() -> String {
    "bearer".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

/// Attach credentials from the run's provider, if the node asks for them.
async fn authenticate(
    request: RequestBuilder,
    auth: &AuthConfig,
    ctx: &NodeContext,
) -> Result<RequestBuilder> {
    let Some(service) = &auth.credential else {
        return Ok(request);
    };

    let provider = ctx.credentials.as_ref().ok_or_else(|| {
        Error::Credential(format!(
            "Node '{}' needs credential '{}' but no credential provider is configured",
            ctx.node_id, service
        ))
    })?;
    let user_id = ctx.user_id.as_deref().ok_or_else(|| {
        Error::Credential(format!(
            "Node '{}' needs credential '{}' but the run has no user",
            ctx.node_id, service
        ))
    })?;

    let bundle = provider.get_credentials(user_id, service).await?;
    let token = bundle.access_token.as_str();

    match auth.auth_type.as_str() {
        "bearer" => Ok(request.bearer_auth(token)),
        "api_key" => Ok(request.header("X-API-Key", token)),
        other => match other.strip_prefix("header:") {
            Some(name) if !name.is_empty() => Ok(request.header(name, token)),
            _ => Err(Error::InvalidRequest(format!(
                "Unknown auth_type '{}'. Use: bearer, api_key, or header:<name>",
                other
            ))),
        },
    }
}

fn render_body(body: &Value, ctx: &NodeContext) -> Value {
    match body {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), render_body(v, ctx)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| render_body(v, ctx)).collect()),
        _ => resolve_value(body, ctx),
    }
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| Error::InvalidRequest(format!("Invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(Error::InvalidRequest(format!(
            "Unsupported URL scheme '{}'. Only http and https are allowed.",
            scheme
        ))),
    }
}

fn header_map(response: &reqwest::Response) -> Value {
    let mut map = Map::new();
    for (k, v) in response.headers() {
        map.insert(
            k.to_string(),
            Value::String(v.to_str().unwrap_or_default().to_string()),
        );
    }
    Value::Object(map)
}

/// The node's target URL with references rendered against the call's context.
fn target_url(config: &Value, ctx: &NodeContext) -> Option<String> {
    let url = config.get("url")?.as_str()?;
    Some(render_template(url, ctx))
}

/// Parse a response body as JSON, falling back to the raw text.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// HTTP request node.
pub struct HttpRequestNode {
    client: Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HttpRequestConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    query: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(flatten)]
    auth: AuthConfig,
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make HTTP requests (GET, POST, PUT, DELETE, PATCH, HEAD)"
    }

    /// One breaker per host.
    fn resource_key(&self, config: &Value, ctx: &NodeContext) -> Option<String> {
        let url = target_url(config, ctx)?;
        let host = Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or(url);
        Some(format!("http:{}", host))
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: HttpRequestConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::InvalidRequest(format!("Invalid http_request config: {}", e)))?;

        let url = parse_url(&render_template(&config.url, ctx))?;
        let method = config.method.to_uppercase();

        debug!("HTTP {} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url.clone()),
            "POST" => self.client.post(url.clone()),
            "PUT" => self.client.put(url.clone()),
            "DELETE" => self.client.delete(url.clone()),
            "PATCH" => self.client.patch(url.clone()),
            "HEAD" => self.client.head(url.clone()),
            _ => {
                return Err(Error::InvalidRequest(format!(
                    "Unknown HTTP method: {}",
                    config.method
                )))
            }
        };

        let timeout = config
            .timeout_seconds
            .unwrap_or(ctx.config.http_timeout_seconds);
        request = request.timeout(Duration::from_secs(timeout));

        for (key, value) in &config.headers {
            request = request.header(key, value_as_text(&resolve_value(value, ctx)));
        }

        if !config.query.is_empty() {
            let pairs: Vec<(String, String)> = config
                .query
                .iter()
                .map(|(k, v)| (k.clone(), value_as_text(&resolve_value(v, ctx))))
                .collect();
            request = request.query(&pairs);
        }

        if let Some(body) = &config.body {
            request = request.json(&render_body(body, ctx));
        }

        request = authenticate(request, &config.auth, ctx).await?;

        let start = Instant::now();
        let response = request.send().await?;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let headers = header_map(&response);
        let body_text = response.text().await.map_err(|e| {
            Error::Node(format!("Failed to read HTTP response body from {}: {}", url, e))
        })?;

        if status >= 400 {
            return Err(Error::Node(format!(
                "HTTP {} {} -> {}: {}",
                method, url, status, body_text
            )));
        }

        info!("HTTP {} {} -> {} ({}ms)", method, url, status, duration.as_millis());

        Ok(NodeResult::with_metadata(
            json!({
                "success": true,
                "status": status,
                "headers": headers,
                "body": parse_body(body_text),
            }),
            json!({ "duration_ms": duration.as_millis() as u64 }),
        ))
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outbound webhook node: POSTs a JSON payload to a fixed endpoint.
pub struct WebhookNode {
    client: Client,
}

impl WebhookNode {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }
}

impl Default for WebhookNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    /// Defaults to the node's input
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(flatten)]
    auth: AuthConfig,
}

#[async_trait]
impl Node for WebhookNode {
    fn node_type(&self) -> &str {
        "webhook"
    }

    fn description(&self) -> &str {
        "POST a JSON payload to a webhook URL"
    }

    /// One breaker per distinct webhook URL.
    fn resource_key(&self, config: &Value, ctx: &NodeContext) -> Option<String> {
        target_url(config, ctx).map(|url| format!("webhook:{}", url))
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::InvalidRequest(format!("Invalid webhook config: {}", e)))?;

        let url = parse_url(&render_template(&config.url, ctx))?;
        let payload = match &config.payload {
            Some(payload) => render_body(payload, ctx),
            None => ctx.input.clone(),
        };

        let mut request = self
            .client
            .post(url.clone())
            .timeout(Duration::from_secs(ctx.config.http_timeout_seconds))
            .json(&payload);
        for (key, value) in &config.headers {
            request = request.header(key, value_as_text(&resolve_value(value, ctx)));
        }
        request = authenticate(request, &config.auth, ctx).await?;

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();

        if status >= 400 {
            return Err(Error::Node(format!(
                "Webhook {} -> {}: {}",
                url, status, body_text
            )));
        }

        info!("Webhook {} -> {}", url, status);

        Ok(NodeResult::new(json!({
            "success": true,
            "status": status,
            "body": parse_body(body_text),
        })))
    }
}
