//! Orchestrations
//!
//! Orchestrations live on the orchestrator (Syrup) API and speak JSON. The
//! PUT endpoint wants the whole object back, so updates go through
//! read-modify-write with the server-managed fields stripped.

use super::sync::{ensure_not_empty, ensure_one_of, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{kbc_bool, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHANNELS: &[&str] = &["error", "warning", "processing"];

const COLLECTION: &str = "orchestrator/orchestrations";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub email: String,
    pub channel: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub component: String,
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub phase: Option<String>,
}

fn default_action() -> String {
    "run".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchestration {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub crontab_record: Option<String>,
    #[serde(default)]
    pub crontab_timezone: Option<String>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTask {
    component: String,
    #[serde(default = "default_action")]
    action: String,
    #[serde(default)]
    action_parameters: serde_json::Map<String, Value>,
    #[serde(default, with = "kbc_bool")]
    continue_on_failure: bool,
    #[serde(default = "default_true", with = "kbc_bool")]
    active: bool,
    #[serde(default, deserialize_with = "phase_name")]
    phase: Option<String>,
}

/// Phases are names, but the API returns numeric ones as numbers
fn phase_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn to_json<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::validation(format!("orchestration body: {}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRemote {
    name: String,
    #[serde(default = "default_true", with = "kbc_bool")]
    active: bool,
    #[serde(default)]
    crontab_record: Option<String>,
    #[serde(default)]
    crontab_timezone: Option<String>,
    #[serde(default)]
    notifications: Vec<Notification>,
    #[serde(default)]
    tasks: Vec<ApiTask>,
}

impl From<&Task> for ApiTask {
    fn from(t: &Task) -> Self {
        Self {
            component: t.component.clone(),
            action: t.action.clone(),
            action_parameters: t.parameters.clone(),
            continue_on_failure: t.continue_on_failure,
            active: t.active,
            phase: t.phase.clone(),
        }
    }
}

impl From<ApiTask> for Task {
    fn from(t: ApiTask) -> Self {
        Self {
            component: t.component,
            action: t.action,
            parameters: t.action_parameters,
            continue_on_failure: t.continue_on_failure,
            active: t.active,
            phase: t.phase,
        }
    }
}

impl RemoteResource for Orchestration {
    const KIND: &'static str = "orchestration";
    const FAMILY: EndpointFamily = EndpointFamily::Orchestrator;
    const UPDATE: UpdateStrategy = UpdateStrategy::ReadModifyWrite;
    const READ_ONLY_FIELDS: &'static [&'static str] = &[
        "id",
        "uri",
        "token",
        "createdTime",
        "lastScheduledTime",
        "nextScheduledTime",
        "lastExecutedJob",
    ];
    type Remote = OrchestrationRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("name", &self.name)?;
        for notification in &self.notifications {
            ensure_not_empty("notifications.email", &notification.email)?;
            ensure_one_of("notifications.channel", &notification.channel, CHANNELS)?;
        }
        for task in &self.tasks {
            ensure_not_empty("tasks.component", &task.component)?;
        }
        Ok(())
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok(COLLECTION.to_string())
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("{}/{}", COLLECTION, escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        self.remote_fields().map(Payload::Json)
    }

    fn remote_fields(&self) -> ApiResult<Value> {
        let tasks: Vec<ApiTask> = self.tasks.iter().map(ApiTask::from).collect();
        let mut body = serde_json::Map::new();
        body.insert("name".to_string(), Value::String(self.name.clone()));
        body.insert("active".to_string(), Value::Bool(self.active));
        // Unset schedule fields are sent as null so they can be cleared
        body.insert("crontabRecord".to_string(), to_json(&self.crontab_record)?);
        body.insert("crontabTimezone".to_string(), to_json(&self.crontab_timezone)?);
        body.insert("notifications".to_string(), to_json(&self.notifications)?);
        body.insert("tasks".to_string(), to_json(&tasks)?);
        Ok(Value::Object(body))
    }

    fn from_remote(remote: OrchestrationRemote, _previous: &Self) -> ApiResult<Self> {
        Ok(Self {
            name: remote.name,
            active: remote.active,
            crontab_record: remote.crontab_record,
            crontab_timezone: remote.crontab_timezone,
            notifications: remote.notifications,
            tasks: remote.tasks.into_iter().map(Task::from).collect(),
        })
    }
}
