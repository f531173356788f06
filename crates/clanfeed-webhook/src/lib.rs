// # Webhook Transport
//
// Delivers rendered log messages through chat webhooks.
//
// ## Behavior
//
// - One HTTP request per `send` / `edit` call
// - Failures are classified into `DeliveryErrorKind` and returned as-is
// - One cached handle per webhook id, rebuilt when the token changes
// - Dry-run mode logs the request and fabricates message ids
//
// ## Forbidden
//
// - Retrying, sleeping or honoring `retry_after` (owned by DispatchCore)
// - Touching the log store or the log registry
// - Spawning tasks
//
// ## Security
//
// - Webhook tokens NEVER appear in logs or Debug output
// - Request URLs contain the token, so they are never logged either
//
// ## API Reference
//
// - Execute webhook: POST `/webhooks/:id/:token?wait=true[&thread_id=]`
// - Edit message: PATCH `/webhooks/:id/:token/messages/:message_id[?thread_id=]`

use async_trait::async_trait;
use clanfeed_core::config::TransportConfig;
use clanfeed_core::model::{DeliveryTarget, MessageId, MessagePayload};
use clanfeed_core::traits::{DeliveryError, DeliveryRequest, Transport, TransportFactory};
use clanfeed_core::{Error, Result};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default webhook API base
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Platform error code for "Unknown Message"
const UNKNOWN_MESSAGE_CODE: u64 = 10008;

/// Cached per-webhook state
///
/// Holds the prebuilt base URL, which embeds the token.
pub struct WebhookHandle {
    webhook_id: u64,
    token: String,
    base_url: String,
}

impl std::fmt::Debug for WebhookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandle")
            .field("webhook_id", &self.webhook_id)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl WebhookHandle {
    fn new(api_base: &str, target: &DeliveryTarget) -> Self {
        Self {
            webhook_id: target.webhook_id,
            token: target.token.clone(),
            base_url: format!(
                "{}/webhooks/{}/{}",
                api_base.trim_end_matches('/'),
                target.webhook_id,
                target.token
            ),
        }
    }

    pub fn webhook_id(&self) -> u64 {
        self.webhook_id
    }

    fn matches(&self, target: &DeliveryTarget) -> bool {
        self.token == target.token
    }

    fn execute_url(&self, request: &DeliveryRequest) -> String {
        match request.thread_id {
            Some(thread) => format!("{}?wait=true&thread_id={}", self.base_url, thread.0),
            None => format!("{}?wait=true", self.base_url),
        }
    }

    fn edit_url(&self, request: &DeliveryRequest, message_id: &MessageId) -> String {
        let url = format!("{}/messages/{}", self.base_url, message_id.as_str());
        match request.thread_id {
            Some(thread) => format!("{}?thread_id={}", url, thread.0),
            None => url,
        }
    }
}

/// Webhook transport
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, no request leaves the process. `send` returns a
/// fabricated `dry-run-N` message id and `edit` succeeds.
pub struct WebhookTransport {
    api_base: String,
    client: reqwest::Client,
    handles: DashMap<u64, Arc<WebhookHandle>>,
    dry_run: bool,
    dry_run_ids: AtomicU64,
}

impl std::fmt::Debug for WebhookTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookTransport")
            .field("api_base", &self.api_base)
            .field("cached_handles", &self.handles.len())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl WebhookTransport {
    /// Create a new webhook transport
    ///
    /// # Errors
    ///
    /// Returns a config error if the HTTP client cannot be built.
    pub fn new(api_base: impl Into<String>, timeout: Duration, dry_run: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("clanfeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into(),
            client,
            handles: DashMap::new(),
            dry_run,
            dry_run_ids: AtomicU64::new(0),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Get the cached handle for a target, rebuilding it if the token changed
    pub fn handle(&self, target: &DeliveryTarget) -> Arc<WebhookHandle> {
        if let Some(handle) = self.handles.get(&target.webhook_id)
            && handle.matches(target)
        {
            return Arc::clone(&handle);
        }

        let handle = Arc::new(WebhookHandle::new(&self.api_base, target));
        if self
            .handles
            .insert(target.webhook_id, Arc::clone(&handle))
            .is_some()
        {
            tracing::debug!(webhook_id = target.webhook_id, "Rebuilt webhook handle");
        }
        handle
    }

    /// Number of cached webhook handles
    pub fn cached_handles(&self) -> usize {
        self.handles.len()
    }

    async fn failure(response: reqwest::Response) -> DeliveryError {
        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.unwrap_or_default();
        classify(status, retry_after_header.as_deref(), &body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

/// Map a failed HTTP response to a classified delivery error
///
/// - 401 → Unauthorized
/// - 403 → Forbidden
/// - 404 with code 10008 → MessageNotFound, any other 404 → NotFound
/// - 429 → RateLimited, `retry_after` from the body or the Retry-After header
/// - everything else → Unknown
pub fn classify(status: u16, retry_after_header: Option<&str>, body: &str) -> DeliveryError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = parsed
        .message
        .clone()
        .unwrap_or_else(|| body.chars().take(200).collect());
    let message = format!("HTTP {}: {}", status, detail);

    match status {
        401 => DeliveryError::unauthorized(message),
        403 => DeliveryError::forbidden(message),
        404 if parsed.code == Some(UNKNOWN_MESSAGE_CODE) => DeliveryError::message_not_found(message),
        404 => DeliveryError::not_found(message),
        429 => {
            let retry_after = parsed
                .retry_after
                .or_else(|| retry_after_header.and_then(|h| h.trim().parse::<f64>().ok()))
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            DeliveryError::rate_limited(retry_after, message)
        }
        _ => DeliveryError::unknown(message),
    }
}

fn request_failure(err: reqwest::Error) -> DeliveryError {
    // reqwest errors may carry the URL, which contains the token
    let err = err.without_url();
    if err.is_timeout() {
        DeliveryError::timeout(err.to_string())
    } else {
        DeliveryError::unknown(err.to_string())
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send(
        &self,
        request: &DeliveryRequest,
        payload: &MessagePayload,
    ) -> std::result::Result<MessageId, DeliveryError> {
        let handle = self.handle(&request.target);

        if self.dry_run {
            let n = self.dry_run_ids.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(
                webhook_id = handle.webhook_id,
                channel_id = %request.channel_id,
                embeds = payload.embeds.len(),
                "[DRY-RUN] Would send message"
            );
            return Ok(MessageId::new(format!("dry-run-{}", n)));
        }

        let response = self
            .client
            .post(handle.execute_url(request))
            .json(payload)
            .send()
            .await
            .map_err(request_failure)?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        let created: CreatedMessage = response
            .json()
            .await
            .map_err(|e| DeliveryError::unknown(format!("Invalid webhook response: {}", e.without_url())))?;

        tracing::debug!(
            webhook_id = handle.webhook_id,
            message_id = %created.id,
            "Message sent"
        );
        Ok(MessageId::new(created.id))
    }

    async fn edit(
        &self,
        request: &DeliveryRequest,
        message_id: &MessageId,
        payload: &MessagePayload,
    ) -> std::result::Result<(), DeliveryError> {
        let handle = self.handle(&request.target);

        if self.dry_run {
            tracing::info!(
                webhook_id = handle.webhook_id,
                message_id = %message_id,
                embeds = payload.embeds.len(),
                "[DRY-RUN] Would edit message"
            );
            return Ok(());
        }

        let response = self
            .client
            .patch(handle.edit_url(request, message_id))
            .json(payload)
            .send()
            .await
            .map_err(request_failure)?;

        if !response.status().is_success() {
            return Err(Self::failure(response).await);
        }

        tracing::debug!(
            webhook_id = handle.webhook_id,
            message_id = %message_id,
            "Message edited"
        );
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "webhook"
    }
}

/// Factory for creating webhook transports
pub struct WebhookTransportFactory;

impl TransportFactory for WebhookTransportFactory {
    fn create(&self, config: &TransportConfig) -> Result<Box<dyn Transport>> {
        config.validate()?;
        match config {
            TransportConfig::Webhook {
                api_base,
                timeout_secs,
                dry_run,
            } => {
                if *dry_run {
                    tracing::warn!("Webhook transport running in DRY-RUN mode - no messages will be posted");
                }
                Ok(Box::new(WebhookTransport::new(
                    api_base.clone(),
                    Duration::from_secs(*timeout_secs),
                    *dry_run,
                )?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clanfeed_core::model::ChannelId;
    use clanfeed_core::traits::DeliveryErrorKind;

    fn request(thread: Option<u64>) -> DeliveryRequest {
        DeliveryRequest {
            target: DeliveryTarget::new(42, "secret-token"),
            channel_id: ChannelId(7),
            thread_id: thread.map(ChannelId),
        }
    }

    fn transport(dry_run: bool) -> WebhookTransport {
        WebhookTransport::new("https://chat.example/api/", Duration::from_secs(5), dry_run).unwrap()
    }

    #[test]
    fn test_classify_auth_failures() {
        assert_eq!(
            classify(401, None, r#"{"message": "Invalid Webhook Token", "code": 50027}"#).kind,
            DeliveryErrorKind::Unauthorized
        );
        assert_eq!(
            classify(403, None, r#"{"message": "Missing Access", "code": 50001}"#).kind,
            DeliveryErrorKind::Forbidden
        );
    }

    #[test]
    fn test_classify_not_found_variants() {
        let gone = classify(404, None, r#"{"message": "Unknown Message", "code": 10008}"#);
        assert_eq!(gone.kind, DeliveryErrorKind::MessageNotFound);
        assert!(gone.message.contains("Unknown Message"));

        let webhook = classify(404, None, r#"{"message": "Unknown Webhook", "code": 10015}"#);
        assert_eq!(webhook.kind, DeliveryErrorKind::NotFound);

        assert_eq!(classify(404, None, "not json").kind, DeliveryErrorKind::NotFound);
    }

    #[test]
    fn test_classify_rate_limit() {
        let from_body = classify(429, Some("9"), r#"{"message": "slow", "retry_after": 1.5}"#);
        assert_eq!(
            from_body.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );

        let from_header = classify(429, Some("3"), "");
        assert_eq!(
            from_header.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );

        let unknown = classify(429, Some("soon"), "");
        assert_eq!(unknown.kind, DeliveryErrorKind::RateLimited { retry_after: None });
    }

    #[test]
    fn test_classify_other_statuses_are_unknown() {
        assert_eq!(classify(500, None, "boom").kind, DeliveryErrorKind::Unknown);
        assert_eq!(classify(502, None, "").kind, DeliveryErrorKind::Unknown);
        assert_eq!(classify(400, None, r#"{"message": "Invalid Form Body"}"#).kind, DeliveryErrorKind::Unknown);
    }

    #[test]
    fn test_urls_include_thread() {
        let t = transport(false);
        let plain = request(None);
        let threaded = request(Some(99));
        let handle = t.handle(&plain.target);

        assert_eq!(
            handle.execute_url(&plain),
            "https://chat.example/api/webhooks/42/secret-token?wait=true"
        );
        assert_eq!(
            handle.execute_url(&threaded),
            "https://chat.example/api/webhooks/42/secret-token?wait=true&thread_id=99"
        );
        assert_eq!(
            handle.edit_url(&threaded, &MessageId::new("m1")),
            "https://chat.example/api/webhooks/42/secret-token/messages/m1?thread_id=99"
        );
    }

    #[test]
    fn test_handle_rebuilt_on_token_change() {
        let t = transport(false);
        let first = t.handle(&DeliveryTarget::new(42, "old"));
        let again = t.handle(&DeliveryTarget::new(42, "old"));
        assert!(Arc::ptr_eq(&first, &again));

        let rotated = t.handle(&DeliveryTarget::new(42, "new"));
        assert!(!Arc::ptr_eq(&first, &rotated));
        assert!(rotated.matches(&DeliveryTarget::new(42, "new")));
        assert_eq!(t.cached_handles(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_fabricates_ids() {
        let t = transport(true);
        let payload = MessagePayload::text("hello");

        let first = t.send(&request(None), &payload).await.unwrap();
        let second = t.send(&request(Some(3)), &payload).await.unwrap();
        assert_eq!(first, MessageId::new("dry-run-1"));
        assert_eq!(second, MessageId::new("dry-run-2"));
        assert!(t.edit(&request(None), &first, &payload).await.is_ok());
    }

    #[test]
    fn test_token_not_exposed_in_debug() {
        let t = transport(false);
        let handle = t.handle(&DeliveryTarget::new(42, "secret-token"));

        let debug = format!("{:?} {:?}", t, handle);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("<REDACTED>"));
    }

    #[test]
    fn test_factory_creation() {
        let config = TransportConfig::Webhook {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: 10,
            dry_run: true,
        };
        let transport = WebhookTransportFactory.create(&config).unwrap();
        assert_eq!(transport.transport_name(), "webhook");
    }

    #[test]
    fn test_factory_rejects_bad_api_base() {
        let config = TransportConfig::Webhook {
            api_base: "ftp://nope".to_string(),
            timeout_secs: 10,
            dry_run: false,
        };
        assert!(WebhookTransportFactory.create(&config).err().unwrap().is_config());
    }
}
