//! Profile resolver client.
//!
//! The profile resolver is the trust boundary for authorization: given an
//! authenticated identity it returns the canonical role and the
//! authoritative permitted-ID sets. That computation is never performed
//! client-side; this module only transports the request and hands the raw
//! payload to `turfsync-core` for validation.
//!
//! The [`ProfileResolver`] trait is the seam the orchestrator depends on;
//! [`HttpProfileResolver`] is the production implementation. Neither
//! retries internally — retry policy belongs to the orchestrator's caller.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use secrecy::ExposeSecret;
use tracing::{debug, warn};
use turfsync_core::redact::redact_for_log;
use turfsync_core::scope::RawScopeResponse;

use crate::error::SyncError;
use crate::session::Identity;

/// Maximum accepted resolver response body, in bytes.
///
/// Enforced while the body streams in, so a misbehaving or hostile
/// endpoint can never buffer more than this.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Resolves an identity to its raw authoritative scope payload.
///
/// # Contract
///
/// - Called with a valid, non-expired identity (the orchestrator checks
///   expiry before calling).
/// - Exactly one backend call per invocation; no internal retry.
/// - Shape validation of the payload happens downstream in
///   `AuthoritativeScope::from_raw`; implementations only guarantee the
///   payload parsed as the wire structure.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Fetches the authoritative scope payload for `identity`.
    async fn resolve(&self, identity: &Identity) -> Result<RawScopeResponse, SyncError>;
}

/// HTTP/JSON implementation of [`ProfileResolver`].
///
/// POSTs `{ "subject": ... }` to the configured endpoint with the
/// identity's bearer token attached. The timeout around the whole call is
/// applied by the orchestrator, not here.
pub struct HttpProfileResolver {
    endpoint: String,
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HttpProfileResolver {
    /// Creates a resolver client for the given endpoint URL.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Self {
            endpoint: endpoint.into(),
            client: Client::builder(TokioExecutor::new()).build(https),
        }
    }
}

#[async_trait]
impl ProfileResolver for HttpProfileResolver {
    async fn resolve(&self, identity: &Identity) -> Result<RawScopeResponse, SyncError> {
        let body = serde_json::json!({ "subject": identity.subject });
        let body_bytes = serde_json::to_vec(&body).map_err(|e| SyncError::Transport {
            detail: format!("failed to encode request: {e}"),
        })?;

        let request = Request::builder()
            .method("POST")
            .uri(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", "turfsync/0.1")
            .header(
                "Authorization",
                format!("Bearer {}", identity.token.expose_secret()),
            )
            .body(Full::new(Bytes::from(body_bytes)))
            .map_err(|e| SyncError::Transport {
                detail: format!("failed to build request: {e}"),
            })?;

        debug!(endpoint = %self.endpoint, subject = %identity.subject, "resolving profile scope");

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| SyncError::Transport {
                detail: format!("resolver call failed: {e}"),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthenticated);
        }

        let bytes = read_bounded_body(response.into_body()).await?;

        if !status.is_success() {
            let body_text = String::from_utf8_lossy(&bytes);
            return Err(SyncError::Transport {
                detail: format!("resolver returned HTTP {status}: {}", redact_for_log(&body_text)),
            });
        }

        serde_json::from_slice::<RawScopeResponse>(&bytes).map_err(|e| {
            let body_text = String::from_utf8_lossy(&bytes);
            warn!(
                payload = %redact_for_log(&body_text),
                error = %e,
                "resolver payload failed to parse"
            );
            SyncError::MalformedResponse {
                detail: format!("payload did not match wire shape: {e}"),
            }
        })
    }
}

/// Collects a response body, aborting the read as soon as it exceeds
/// [`MAX_RESPONSE_BYTES`].
async fn read_bounded_body<B>(body: B) -> Result<Bytes, SyncError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(body, MAX_RESPONSE_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                SyncError::MalformedResponse {
                    detail: format!("response body exceeds {MAX_RESPONSE_BYTES} bytes"),
                }
            } else {
                SyncError::Transport {
                    detail: format!("failed to read resolver response: {e}"),
                }
            }
        })?;
    Ok(collected.to_bytes())
}
