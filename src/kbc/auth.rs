//! Credentials
//!
//! The storage API token is a static secret resolved once at startup and
//! shared read-only by every request. Component secrets (database passwords
//! and similar) must be sent already encrypted.

use super::error::{ApiError, ApiResult};
use std::fmt;
use std::sync::Arc;

/// Environment variable consulted when no key is configured explicitly
pub const API_KEY_ENV: &str = "STORAGE_API_KEY";

/// Prefixes the platform uses for encrypted values
pub const ENCRYPTED_PREFIXES: &[&str] = &[
    "KBC::ProjectSecure::",
    "KBC::ComponentSecure::",
    "KBC::ConfigSecure::",
    "KBC::Encrypted==",
];

/// Storage API token
#[derive(Clone)]
pub struct Credential {
    token: Arc<str>,
}

impl Credential {
    pub fn new(token: &str) -> ApiResult<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::validation("API key must not be empty"));
        }
        // Tokens are sent as a header value
        if !token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ApiError::validation(
                "API key contains characters that are not allowed in a header",
            ));
        }
        Ok(Self {
            token: Arc::from(token),
        })
    }

    /// Use the explicit key if given, otherwise fall back to [`API_KEY_ENV`]
    pub fn resolve(explicit: Option<&str>) -> ApiResult<Self> {
        if let Some(key) = explicit.filter(|k| !k.trim().is_empty()) {
            return Self::new(key);
        }
        match std::env::var(API_KEY_ENV) {
            Ok(key) => Self::new(&key),
            Err(_) => Err(ApiError::validation(format!(
                "no API key configured; set {} or pass --api-key",
                API_KEY_ENV
            ))),
        }
    }

    pub fn expose(&self) -> &str {
        &self.token
    }

    /// Token with all but the project prefix masked, safe for logs
    pub fn masked(&self) -> String {
        match self.token.split_once('-') {
            Some((project, _)) => format!("{}-****", project),
            None => "****".to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

pub fn is_encrypted(value: &str) -> bool {
    ENCRYPTED_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// Reject a secret that has not been encrypted
pub fn ensure_encrypted(field: &str, value: &str) -> ApiResult<()> {
    if is_encrypted(value) {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "'{}' must be an encrypted value (starting with one of {})",
            field,
            ENCRYPTED_PREFIXES.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_token_hides_secret() {
        let cred = Credential::new("1234-56789-abcdefgh").unwrap();
        assert_eq!(cred.masked(), "1234-****");
        assert!(!format!("{:?}", cred).contains("abcdefgh"));
        assert_eq!(cred.expose(), "1234-56789-abcdefgh");
    }

    #[test]
    fn test_rejects_empty_and_non_header_tokens() {
        assert!(Credential::new("   ").is_err());
        assert!(Credential::new("abc\ndef").is_err());
    }

    #[test]
    fn test_explicit_key_wins() {
        let cred = Credential::resolve(Some("99-explicit")).unwrap();
        assert_eq!(cred.expose(), "99-explicit");
    }

    #[test]
    fn test_encrypted_prefix_validation() {
        assert!(ensure_encrypted("#password", "KBC::ProjectSecure::eJwBAAA").is_ok());
        assert!(ensure_encrypted("#password", "KBC::Encrypted==abc").is_ok());
        let err = ensure_encrypted("#password", "hunter2").unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert!(err.to_string().contains("#password"));
    }
}
