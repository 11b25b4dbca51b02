//! Storage buckets
//!
//! The API prefixes bucket names with `c-` and derives the id from stage and
//! name (`in.c-main`). The host only ever sees the bare name.

use super::sync::{ensure_not_empty, ensure_one_of, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{FormBody, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::ApiResult;
use serde::{Deserialize, Serialize};

pub const STAGES: &[&str] = &["in", "out"];
pub const BACKENDS: &[&str] = &["snowflake", "redshift", "synapse"];

/// Prefix the API adds to every bucket name
const NAME_PREFIX: &str = "c-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub stage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BucketRemote {
    pub name: String,
    pub stage: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

impl RemoteResource for Bucket {
    const KIND: &'static str = "bucket";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Immutable;
    type Remote = BucketRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("name", &self.name)?;
        ensure_one_of("stage", &self.stage, STAGES)?;
        if let Some(backend) = &self.backend {
            ensure_one_of("backend", backend, BACKENDS)?;
        }
        Ok(())
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok("buckets".to_string())
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("buckets/{}", escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        let form = FormBody::new()
            .field("name", self.name.as_str())
            .field("stage", self.stage.as_str())
            .field("description", self.description.as_str())
            .opt_field("backend", self.backend.as_deref());
        Ok(Payload::Form(form))
    }

    fn from_remote(remote: BucketRemote, _previous: &Self) -> ApiResult<Self> {
        let name = remote
            .name
            .strip_prefix(NAME_PREFIX)
            .unwrap_or(&remote.name)
            .to_string();
        Ok(Self {
            name,
            stage: remote.stage,
            description: remote.description.unwrap_or_default(),
            backend: remote.backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kbc::error::ApiError;

    fn bucket() -> Bucket {
        Bucket {
            name: "x".to_string(),
            stage: "out".to_string(),
            description: String::new(),
            backend: Some("snowflake".to_string()),
        }
    }

    #[test]
    fn test_create_payload() {
        let Payload::Form(form) = bucket().create_payload().unwrap() else {
            panic!("expected form payload");
        };
        assert_eq!(
            form.encode(),
            "name=x&stage=out&description=&backend=snowflake"
        );
    }

    #[test]
    fn test_from_remote_strips_prefix() {
        let remote: BucketRemote = serde_json::from_str(
            r#"{"id":"out.c-x","name":"c-x","stage":"out","backend":"snowflake","rowsCount":0}"#,
        )
        .unwrap();
        let read = Bucket::from_remote(remote, &bucket()).unwrap();
        assert_eq!(read, bucket());
    }

    #[test]
    fn test_validate_rejects_unknown_stage() {
        let mut b = bucket();
        b.stage = "sys".to_string();
        assert!(matches!(b.validate(), Err(ApiError::Validation(_))));

        let mut b = bucket();
        b.backend = Some("mysql".to_string());
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_resource_path_escapes_id() {
        assert_eq!(bucket().resource_path("in.c-x").unwrap(), "buckets/in.c-x");
    }
}
