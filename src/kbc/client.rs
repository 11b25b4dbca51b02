//! Platform client
//!
//! Main client for the platform APIs, combining the transport with status
//! classification, JSON decoding and job-poll settings. Resource operations
//! receive a `&KbcClient` explicitly; there is no global client.

use super::codec::{decode_json, Payload};
use super::endpoint::EndpointFamily;
use super::error::{ApiError, ApiResult};
use super::http::{sanitize_for_log, KbcHttpClient, RawResponse};
use super::jobs::PollPolicy;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::borrow::Cow;

/// Main platform client
#[derive(Clone)]
pub struct KbcClient {
    pub http: KbcHttpClient,
    pub poll_policy: PollPolicy,
}

impl KbcClient {
    pub fn new(http: KbcHttpClient, poll_policy: PollPolicy) -> Self {
        Self { http, poll_policy }
    }

    /// GET and decode
    pub async fn get<T: DeserializeOwned>(&self, family: EndpointFamily, path: &str) -> ApiResult<T> {
        self.call(Method::GET, family, path, None).await
    }

    /// POST and decode
    pub async fn post<T: DeserializeOwned>(
        &self,
        family: EndpointFamily,
        path: &str,
        body: &Payload,
    ) -> ApiResult<T> {
        self.call(Method::POST, family, path, Some(body)).await
    }

    /// PUT and decode
    pub async fn put<T: DeserializeOwned>(
        &self,
        family: EndpointFamily,
        path: &str,
        body: &Payload,
    ) -> ApiResult<T> {
        self.call(Method::PUT, family, path, Some(body)).await
    }

    /// DELETE, ignoring any response body
    pub async fn delete(&self, family: EndpointFamily, path: &str) -> ApiResult<()> {
        let endpoint = format!("DELETE {}", path);
        let response = self.http.request(Method::DELETE, family, path, None).await?;
        check_status(&endpoint, &response)?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        family: EndpointFamily,
        path: &str,
        body: Option<&Payload>,
    ) -> ApiResult<T> {
        let endpoint = format!("{} {}", method, path);
        let response = self.http.request(method, family, path, body).await?;
        check_status(&endpoint, &response)?;

        // Empty bodies decode as JSON null
        if response.body.is_empty() {
            return decode_json(&endpoint, b"null");
        }
        decode_json(&endpoint, &response.body)
    }

    /// Encrypt a secret for a component through the runner API
    pub async fn encrypt(&self, component_id: &str, value: &str) -> ApiResult<String> {
        let path = format!("docker/encrypt?componentId={}", escape(component_id));
        let endpoint = format!("POST {}", path);
        let response = self
            .http
            .request(
                Method::POST,
                EndpointFamily::Docker,
                &path,
                Some(&Payload::Text(value.to_string())),
            )
            .await?;
        check_status(&endpoint, &response)?;
        Ok(response.text().trim().to_string())
    }
}

/// Escape a single path segment
pub fn escape(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Turn a non-2xx response into an [`ApiError::HttpStatus`]
pub fn check_status(endpoint: &str, response: &RawResponse) -> ApiResult<()> {
    if response.is_success() {
        return Ok(());
    }

    let body = response.text();
    // 404s are routinely expected on read/delete
    if response.status == 404 {
        tracing::debug!("{} -> 404", endpoint);
    } else {
        tracing::error!(
            "API error: {} - {} - {}",
            endpoint,
            response.status,
            sanitize_for_log(&body)
        );
    }

    Err(ApiError::HttpStatus {
        status: response.status,
        endpoint: endpoint.to_string(),
        message: remote_error_message(&response.body),
    })
}

/// Best-effort extraction of the API's error message
pub fn remote_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}

/// Format an API error for display
pub fn format_kbc_error(error: &ApiError) -> String {
    match error {
        ApiError::HttpStatus { status: 401, .. } => {
            "Authentication failed. Check the storage API token.".to_string()
        },
        ApiError::HttpStatus { status: 403, .. } => {
            "Permission denied. The token lacks access to this resource.".to_string()
        },
        ApiError::HttpStatus {
            status,
            message: Some(message),
            ..
        } => format!("Request failed ({}): {}", status, sanitize_for_log(message)),
        ApiError::Transport { .. } => {
            "Request failed. Check your network connection and try again.".to_string()
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_message_prefers_error_field() {
        let body = br#"{"error":"Bucket in.c-x not found","code":"storage.buckets.notFound"}"#;
        assert_eq!(
            remote_error_message(body).as_deref(),
            Some("Bucket in.c-x not found")
        );
        let body = br#"{"status":"error","message":"Invalid request"}"#;
        assert_eq!(remote_error_message(body).as_deref(), Some("Invalid request"));
        assert_eq!(remote_error_message(b"<html>"), None);
    }

    #[test]
    fn test_escape_segment() {
        assert_eq!(escape("keboola.wr-db-snowflake"), "keboola.wr-db-snowflake");
        assert_eq!(escape("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn test_format_kbc_error() {
        let err = ApiError::HttpStatus {
            status: 401,
            endpoint: "GET tokens/verify".to_string(),
            message: None,
        };
        assert!(format_kbc_error(&err).contains("Authentication failed"));

        let err = ApiError::validation("stage must be 'in' or 'out'");
        assert!(format_kbc_error(&err).contains("stage must be"));
    }
}
