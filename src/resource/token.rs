//! Storage API access tokens
//!
//! The token secret is only returned by the create call. Reads never see it
//! again, so it is carried over from the previous state.

use super::sync::{ensure_not_empty, ensure_one_of, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{is_zero_time, kbc_bool, kbc_time, zero_time, FormBody, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PERMISSIONS: &[&str] = &["read", "write"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub description: String,
    #[serde(default)]
    pub can_manage_buckets: bool,
    #[serde(default)]
    pub can_read_all_file_uploads: bool,
    /// Bucket id to `read` or `write`
    #[serde(default)]
    pub bucket_permissions: BTreeMap<String, String>,
    #[serde(default)]
    pub component_access: Vec<String>,
    /// Lifetime in seconds; unset means the token never expires
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Secret, known only after create
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRemote {
    #[serde(default)]
    description: Option<String>,
    #[serde(default, with = "kbc_bool")]
    can_manage_buckets: bool,
    #[serde(default, with = "kbc_bool")]
    can_read_all_file_uploads: bool,
    #[serde(default, deserialize_with = "permission_map")]
    bucket_permissions: BTreeMap<String, String>,
    #[serde(default)]
    component_access: Vec<String>,
    #[serde(default = "zero_time", with = "kbc_time")]
    created: DateTime<FixedOffset>,
    #[serde(default = "zero_time", with = "kbc_time")]
    expires: DateTime<FixedOffset>,
}

/// An empty permission set is serialized by the API as `[]`, not `{}`
fn permission_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::Array(items) if items.is_empty() => Ok(BTreeMap::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(bucket, permission)| match permission {
                Value::String(p) => Ok((bucket, p)),
                other => Err(serde::de::Error::custom(format!(
                    "permission for bucket '{}' must be a string, got {}",
                    bucket, other
                ))),
            })
            .collect(),
        other => Err(serde::de::Error::custom(format!(
            "expected an object of bucket permissions, got {}",
            other
        ))),
    }
}

impl AccessToken {
    fn base_form(&self) -> FormBody {
        FormBody::new()
            .field("description", self.description.as_str())
            .flag("canManageBuckets", self.can_manage_buckets)
            .flag("canReadAllFileUploads", self.can_read_all_file_uploads)
            .keyed(
                "bucketPermissions",
                self.bucket_permissions
                    .iter()
                    .map(|(bucket, permission)| (bucket.as_str(), permission.as_str())),
            )
            .list("componentAccess", self.component_access.iter().map(String::as_str))
    }
}

/// Relative lifetime from the absolute timestamps the API reports
fn lifetime_secs(created: &DateTime<FixedOffset>, expires: &DateTime<FixedOffset>) -> Option<i64> {
    if is_zero_time(expires) || is_zero_time(created) {
        None
    } else {
        Some((*expires - *created).num_seconds())
    }
}

impl RemoteResource for AccessToken {
    const KIND: &'static str = "access_token";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Replace;
    type Remote = AccessTokenRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("description", &self.description)?;
        for (bucket, permission) in &self.bucket_permissions {
            ensure_not_empty("bucket_permissions", bucket)?;
            ensure_one_of(&format!("bucket_permissions[{}]", bucket), permission, PERMISSIONS)?;
        }
        if let Some(secs) = self.expires_in {
            if secs <= 0 {
                return Err(ApiError::validation(format!(
                    "expires_in must be a positive number of seconds, got {}",
                    secs
                )));
            }
        }
        Ok(())
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok("tokens".to_string())
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("tokens/{}", escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        let form = self
            .base_form()
            .opt_field("expiresIn", self.expires_in.map(|s| s.to_string()));
        Ok(Payload::Form(form))
    }

    fn on_created(&mut self, response: &Value) {
        if let Some(secret) = response.get("token").and_then(Value::as_str) {
            self.token = Some(secret.to_string());
        }
    }

    /// Expiry is fixed at creation
    fn update_payload(&self) -> ApiResult<Payload> {
        Ok(Payload::Form(self.base_form()))
    }

    fn from_remote(remote: AccessTokenRemote, previous: &Self) -> ApiResult<Self> {
        Ok(Self {
            description: remote.description.unwrap_or_default(),
            can_manage_buckets: remote.can_manage_buckets,
            can_read_all_file_uploads: remote.can_read_all_file_uploads,
            bucket_permissions: remote.bucket_permissions,
            component_access: remote.component_access,
            expires_in: lifetime_secs(&remote.created, &remote.expires),
            token: previous.token.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reader() -> AccessToken {
        AccessToken {
            description: "reporting".to_string(),
            can_manage_buckets: false,
            can_read_all_file_uploads: true,
            bucket_permissions: BTreeMap::from([
                ("in.c-main".to_string(), "read".to_string()),
                ("out.c-reports".to_string(), "write".to_string()),
            ]),
            component_access: vec!["keboola.ex-http".to_string(), "keboola.wr-db-snowflake".to_string()],
            expires_in: Some(3600),
            token: None,
        }
    }

    #[test]
    fn test_create_form() {
        let Payload::Form(form) = reader().create_payload().unwrap() else {
            panic!("expected form payload");
        };
        assert_eq!(
            form.encode(),
            "description=reporting&canManageBuckets=0&canReadAllFileUploads=1\
             &bucketPermissions[in.c-main]=read&bucketPermissions[out.c-reports]=write\
             &componentAccess[0]=keboola.ex-http&componentAccess[1]=keboola.wr-db-snowflake\
             &expiresIn=3600"
        );
    }

    #[test]
    fn test_update_form_omits_expiry() {
        let Payload::Form(form) = reader().update_payload().unwrap() else {
            panic!("expected form payload");
        };
        assert!(!form.encode().contains("expiresIn"));
    }

    #[test]
    fn test_secret_captured_on_create() {
        let mut t = reader();
        t.on_created(&json!({"id": "4412", "token": "4412-abcdef"}));
        assert_eq!(t.token.as_deref(), Some("4412-abcdef"));
    }

    #[test]
    fn test_permission_validation() {
        let mut t = reader();
        t.bucket_permissions.insert("in.c-x".to_string(), "manage".to_string());
        assert!(matches!(t.validate(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_read_derives_lifetime_and_keeps_secret() {
        let remote: AccessTokenRemote = serde_json::from_value(json!({
            "id": "4412",
            "description": "reporting",
            "canManageBuckets": false,
            "canReadAllFileUploads": "1",
            "bucketPermissions": {"in.c-main": "read", "out.c-reports": "write"},
            "componentAccess": ["keboola.ex-http", "keboola.wr-db-snowflake"],
            "created": "2019-03-14T10:00:00+0100",
            "expires": "2019-03-14T11:00:00+0100"
        }))
        .unwrap();
        let mut previous = reader();
        previous.token = Some("4412-abcdef".to_string());

        let read = AccessToken::from_remote(remote, &previous).unwrap();
        assert_eq!(read, previous);
    }

    #[test]
    fn test_read_empty_permissions_and_no_expiry() {
        let remote: AccessTokenRemote = serde_json::from_value(json!({
            "description": "admin",
            "canManageBuckets": true,
            "bucketPermissions": [],
            "created": "2019-03-14T10:00:00+0100",
            "expires": null
        }))
        .unwrap();
        let read = AccessToken::from_remote(remote, &reader()).unwrap();
        assert!(read.bucket_permissions.is_empty());
        assert_eq!(read.expires_in, None);
        assert!(read.can_manage_buckets);
    }
}
