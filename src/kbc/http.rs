//! HTTP transport for the platform's REST API families

use super::auth::Credential;
use super::codec::Payload;
use super::endpoint::{EndpointFamily, TOKEN_HEADER};
use super::error::{ApiError, ApiResult};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Response as received, status not yet interpreted
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Low-level client: resolves family URLs, attaches the token, sends bytes
#[derive(Clone)]
pub struct KbcHttpClient {
    client: Client,
    credential: Credential,
    base_urls: HashMap<EndpointFamily, String>,
}

impl KbcHttpClient {
    pub fn new(
        credential: Credential,
        base_urls: HashMap<EndpointFamily, String>,
        user_agent: &str,
        timeout: Option<Duration>,
    ) -> ApiResult<Self> {
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ApiError::Transport {
            endpoint: "client initialization".to_string(),
            source: e,
        })?;

        Ok(Self {
            client,
            credential,
            base_urls,
        })
    }

    pub fn base_url(&self, family: EndpointFamily) -> &str {
        self.base_urls
            .get(&family)
            .map(String::as_str)
            .unwrap_or_else(|| family.default_base_url())
    }

    /// Absolute URL: base URL and path concatenated as-is.
    /// Path segments must already be escaped.
    pub fn url(&self, family: EndpointFamily, path: &str) -> String {
        format!("{}{}", self.base_url(family), path)
    }

    /// Send a request. HTTP statuses are returned, not interpreted.
    pub async fn request(
        &self,
        method: Method,
        family: EndpointFamily,
        path: &str,
        body: Option<&Payload>,
    ) -> ApiResult<RawResponse> {
        let url = self.url(family, path);
        let endpoint = format!("{} {}", method, url);
        tracing::debug!("{}", endpoint);

        let mut request = self.client.request(method, &url);

        if family.sends_credential() {
            request = request.header(TOKEN_HEADER, self.credential.expose());
        }

        if let Some(payload) = body {
            request = request
                .header(CONTENT_TYPE, payload.content_type())
                .body(payload.encode()?);
        }

        let response = request.send().await.map_err(|e| ApiError::Transport {
            endpoint: endpoint.clone(),
            source: e,
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport {
                endpoint: endpoint.clone(),
                source: e,
            })?
            .to_vec();

        tracing::trace!("{} -> {} ({} bytes)", endpoint, status, body.len());

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
        assert!(sanitized.len() < 300);
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_url_is_plain_concatenation() {
        let mut urls = HashMap::new();
        urls.insert(EndpointFamily::Storage, "http://localhost:1234/v2/storage/".to_string());
        let client = KbcHttpClient::new(
            Credential::new("1-token").unwrap(),
            urls,
            "kbc-provider-test",
            None,
        )
        .unwrap();

        assert_eq!(
            client.url(EndpointFamily::Storage, "buckets/in.c-x"),
            "http://localhost:1234/v2/storage/buckets/in.c-x"
        );
        assert_eq!(
            client.url(EndpointFamily::Orchestrator, "queue/job/1"),
            "https://syrup.keboola.com/queue/job/1"
        );
    }
}
