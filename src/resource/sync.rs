//! Resource Synchronizer
//!
//! One Create/Read/Update/Delete template for every resource kind. A kind
//! implements [`RemoteResource`], which only describes data: where the
//! resource lives, how its payload looks, how the API shape maps back onto
//! the host shape. Control flow, job polling and 404 handling live here.

use crate::kbc::codec::{id_from_value, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use crate::kbc::jobs::{await_completion, JobRef};
use crate::kbc::KbcClient;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Lifecycle state of a managed resource instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Unmanaged,
    Creating,
    Present,
    Updating,
    Deleting,
}

/// How in-place changes are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// PUT the full payload built from the desired state
    Replace,
    /// GET the current object, splice in changed fields, PUT it back
    ReadModifyWrite,
    /// Any change forces replacement
    Immutable,
}

/// Where the create call's job (if any) is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    /// Create returns the resource id directly
    None,
    /// Create returns a storage job id
    Storage,
    /// Create returns an orchestrator queue job id
    Queue,
}

impl JobSource {
    fn job_ref(&self, id: &str) -> Option<JobRef> {
        match self {
            Self::None => None,
            Self::Storage => Some(JobRef::storage(id)),
            Self::Queue => Some(JobRef::queue(id)),
        }
    }
}

/// A resource kind, described as data
pub trait RemoteResource: Clone + Send + Sync + Sized {
    /// Kind name used in logs and errors
    const KIND: &'static str;
    const FAMILY: EndpointFamily;
    const UPDATE: UpdateStrategy;
    const JOB: JobSource = JobSource::None;
    /// Fields the API returns on read but rejects on write
    const READ_ONLY_FIELDS: &'static [&'static str] = &[];

    /// Shape returned by the read endpoint
    type Remote: DeserializeOwned + Send;

    /// Client-side checks run before any request
    fn validate(&self) -> ApiResult<()> {
        Ok(())
    }

    /// Calls that must happen before the create request (uploads, provisioning)
    fn prepare<'a>(&'a mut self, _client: &'a KbcClient) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn collection_path(&self) -> ApiResult<String>;

    fn resource_path(&self, id: &str) -> ApiResult<String>;

    fn create_payload(&self) -> ApiResult<Payload>;

    /// Pick up create-only response fields (generated secrets)
    fn on_created(&mut self, _response: &Value) {}

    /// Body for [`UpdateStrategy::Replace`]
    fn update_payload(&self) -> ApiResult<Payload> {
        self.create_payload()
    }

    /// Desired state as an API-shaped JSON object, for [`UpdateStrategy::ReadModifyWrite`]
    fn remote_fields(&self) -> ApiResult<Value> {
        Err(ApiError::validation(format!(
            "{} does not support read-modify-write updates",
            Self::KIND
        )))
    }

    /// Map the API shape back onto the host shape.
    /// `previous` carries fields the API never returns (secrets).
    fn from_remote(remote: Self::Remote, previous: &Self) -> ApiResult<Self>;

    /// Extra teardown after the resource itself is deleted
    fn cleanup<'a>(&'a self, _client: &'a KbcClient) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Desired state plus remote id and lifecycle state
#[derive(Debug, Clone)]
pub struct ResourceHandle<R> {
    pub desired: R,
    id: Option<String>,
    state: ResourceState,
}

impl<R> ResourceHandle<R> {
    /// Not yet created
    pub fn new(desired: R) -> Self {
        Self {
            desired,
            id: None,
            state: ResourceState::Unmanaged,
        }
    }

    /// Already tracked by the host under `id`
    pub fn existing(id: impl Into<String>, desired: R) -> Self {
        Self {
            desired,
            id: Some(id.into()),
            state: ResourceState::Present,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    fn require_id(&self, kind: &str) -> ApiResult<String> {
        self.id
            .clone()
            .ok_or_else(|| ApiError::validation(format!("{} has no id; create it first", kind)))
    }

    fn clear(&mut self) {
        self.id = None;
        self.state = ResourceState::Unmanaged;
    }
}

/// Whether a read found the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// Runs lifecycle operations against an injected client
pub struct Synchronizer<'a> {
    client: &'a KbcClient,
}

impl<'a> Synchronizer<'a> {
    pub fn new(client: &'a KbcClient) -> Self {
        Self { client }
    }

    /// Create the resource and record its remote id.
    ///
    /// For job-backed kinds the id comes from the finished job's result, not
    /// from the create response. A job ending in `error` fails the create.
    pub async fn create<R: RemoteResource>(&self, handle: &mut ResourceHandle<R>) -> ApiResult<()> {
        handle.desired.validate()?;
        handle.state = ResourceState::Creating;
        tracing::info!("creating {}", R::KIND);

        let result = self.create_inner(&mut handle.desired).await;
        match result {
            Ok(id) => {
                tracing::info!("created {} {}", R::KIND, id);
                handle.id = Some(id);
                handle.state = ResourceState::Present;
                Ok(())
            },
            Err(e) => {
                handle.clear();
                Err(e)
            },
        }
    }

    async fn create_inner<R: RemoteResource>(&self, desired: &mut R) -> ApiResult<String> {
        desired.prepare(self.client).await?;

        let path = desired.collection_path()?;
        let payload = desired.create_payload()?;
        let response: Value = self.client.post(R::FAMILY, &path, &payload).await?;

        let id = response
            .get("id")
            .and_then(id_from_value)
            .ok_or_else(|| {
                ApiError::decode(&format!("POST {}", path), "response has no 'id' field")
            })?;
        desired.on_created(&response);

        let Some(job) = R::JOB.job_ref(&id) else {
            return Ok(id);
        };

        tracing::debug!("{} create queued as job {}", R::KIND, id);
        let completed = await_completion(self.client, &job).await?;
        completed.job.result_id().ok_or_else(|| {
            ApiError::decode(&job.path, "finished job has no 'results.id' field")
        })
    }

    /// Refresh the desired state from the remote object.
    ///
    /// A 404 clears the id and is not an error.
    pub async fn read<R: RemoteResource>(&self, handle: &mut ResourceHandle<R>) -> ApiResult<Presence> {
        let id = handle.require_id(R::KIND)?;
        let path = handle.desired.resource_path(&id)?;

        match self.client.get::<R::Remote>(R::FAMILY, &path).await {
            Ok(remote) => {
                handle.desired = R::from_remote(remote, &handle.desired)?;
                handle.state = ResourceState::Present;
                Ok(Presence::Present)
            },
            Err(e) if e.is_not_found() => {
                tracing::warn!("{} {} no longer exists, removing from state", R::KIND, id);
                handle.clear();
                Ok(Presence::Absent)
            },
            Err(e) => Err(e),
        }
    }

    /// Apply changed fields (host attribute names) in place
    pub async fn update<R: RemoteResource>(
        &self,
        handle: &mut ResourceHandle<R>,
        changed: &[&str],
    ) -> ApiResult<()> {
        let id = handle.require_id(R::KIND)?;
        handle.desired.validate()?;
        let path = handle.desired.resource_path(&id)?;

        if changed.is_empty() {
            return Ok(());
        }

        let payload = match R::UPDATE {
            UpdateStrategy::Immutable => {
                return Err(ApiError::validation(format!(
                    "{} attribute(s) {} cannot be changed in place; the resource must be replaced",
                    R::KIND,
                    changed.join(", ")
                )));
            },
            UpdateStrategy::Replace => handle.desired.update_payload()?,
            UpdateStrategy::ReadModifyWrite => {
                let current: Value = self.client.get(R::FAMILY, &path).await?;
                let desired = handle.desired.remote_fields()?;
                Payload::Json(splice_changes::<R>(current, &desired, changed)?)
            },
        };

        handle.state = ResourceState::Updating;
        tracing::info!("updating {} {} ({})", R::KIND, id, changed.join(", "));

        match self.client.put::<Value>(R::FAMILY, &path, &payload).await {
            Ok(_) => {
                handle.state = ResourceState::Present;
                Ok(())
            },
            Err(e) => {
                handle.state = ResourceState::Present;
                Err(e)
            },
        }
    }

    /// Delete the resource. A 404 counts as already deleted.
    pub async fn delete<R: RemoteResource>(&self, handle: &mut ResourceHandle<R>) -> ApiResult<()> {
        let Some(id) = handle.id.clone() else {
            return Ok(());
        };
        let path = handle.desired.resource_path(&id)?;
        handle.state = ResourceState::Deleting;
        tracing::info!("deleting {} {}", R::KIND, id);

        match self.client.delete(R::FAMILY, &path).await {
            Ok(()) => {},
            Err(e) if e.is_not_found() => {
                tracing::warn!("{} {} was already deleted", R::KIND, id);
            },
            Err(e) => {
                handle.state = ResourceState::Present;
                return Err(e);
            },
        }

        if let Err(e) = handle.desired.cleanup(self.client).await {
            handle.state = ResourceState::Present;
            return Err(e);
        }
        handle.clear();
        Ok(())
    }
}

/// Copy changed fields from `desired` into `current` and drop read-only fields
fn splice_changes<R: RemoteResource>(
    mut current: Value,
    desired: &Value,
    changed: &[&str],
) -> ApiResult<Value> {
    let Some(current_map) = current.as_object_mut() else {
        return Err(ApiError::decode(R::KIND, "current object is not a JSON object"));
    };

    for field in changed {
        let key = to_camel_case(field);
        let Some(value) = desired.get(&key) else {
            return Err(ApiError::validation(format!(
                "{} has no updatable attribute '{}'",
                R::KIND,
                field
            )));
        };
        current_map.insert(key, value.clone());
    }

    for field in R::READ_ONLY_FIELDS {
        current_map.remove(*field);
    }

    Ok(current)
}

/// Enum-like string attribute check
pub fn ensure_one_of(field: &str, value: &str, allowed: &[&str]) -> ApiResult<()> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "{} must be one of {}, got '{}'",
            field,
            allowed.join(", "),
            value
        )))
    }
}

pub fn ensure_not_empty(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        Err(ApiError::validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

/// `crontab_record` -> `crontabRecord`
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `crontabRecord` -> `crontab_record`
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_case_conversion() {
        assert_eq!(to_camel_case("crontab_record"), "crontabRecord");
        assert_eq!(to_camel_case("can_manage_buckets"), "canManageBuckets");
        assert_eq!(to_camel_case("name"), "name");
        assert_eq!(to_snake_case("crontabRecord"), "crontab_record");
        assert_eq!(to_snake_case("active"), "active");
    }

    #[derive(Debug, Clone)]
    struct Dummy;

    #[derive(Deserialize)]
    struct DummyRemote {}

    impl RemoteResource for Dummy {
        const KIND: &'static str = "dummy";
        const FAMILY: EndpointFamily = EndpointFamily::Orchestrator;
        const UPDATE: UpdateStrategy = UpdateStrategy::ReadModifyWrite;
        const READ_ONLY_FIELDS: &'static [&'static str] = &["id", "token"];
        type Remote = DummyRemote;

        fn collection_path(&self) -> ApiResult<String> {
            Ok("dummies".to_string())
        }
        fn resource_path(&self, id: &str) -> ApiResult<String> {
            Ok(format!("dummies/{}", id))
        }
        fn create_payload(&self) -> ApiResult<Payload> {
            Ok(Payload::Json(json!({})))
        }
        fn from_remote(_remote: DummyRemote, previous: &Self) -> ApiResult<Self> {
            Ok(previous.clone())
        }
    }

    #[test]
    fn test_splice_only_changed_fields() {
        let current = json!({
            "id": 5,
            "token": {"id": "1"},
            "name": "old",
            "active": true,
            "crontabRecord": "0 * * * *",
            "tasks": [{"component": "x"}]
        });
        let desired = json!({
            "name": "new",
            "active": false,
            "crontabRecord": "5 * * * *"
        });

        let spliced = splice_changes::<Dummy>(current, &desired, &["name", "crontab_record"]).unwrap();
        assert_eq!(
            spliced,
            json!({
                "name": "new",
                "active": true,
                "crontabRecord": "5 * * * *",
                "tasks": [{"component": "x"}]
            })
        );
    }

    #[test]
    fn test_splice_rejects_unknown_field() {
        let err = splice_changes::<Dummy>(json!({}), &json!({}), &["bogus"]).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_handle_states() {
        let handle = ResourceHandle::new(Dummy);
        assert_eq!(handle.state(), ResourceState::Unmanaged);
        assert!(handle.id().is_none());

        let handle = ResourceHandle::existing("7", Dummy);
        assert_eq!(handle.state(), ResourceState::Present);
        assert_eq!(handle.id(), Some("7"));
    }
}
