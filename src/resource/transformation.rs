//! Transformations
//!
//! A transformation is a configuration row inside a transformation bucket
//! (itself a configuration of the `transformation` component). Its body is a
//! typed JSON document sent as a form field.

use super::component::configuration_form;
use super::sync::{ensure_not_empty, ensure_one_of, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{kbc_bool, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use serde::{Deserialize, Deserializer, Serialize};

pub const BACKENDS: &[&str] = &["snowflake", "redshift", "synapse", "docker"];
pub const TYPES: &[&str] = &["simple", "python", "r", "openrefine"];
pub const WHERE_OPERATORS: &[&str] = &["eq", "ne"];

fn default_phase() -> u32 {
    1
}

fn default_type() -> String {
    "simple".to_string()
}

/// Table copied into the transformation workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMapping {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub where_column: Option<String>,
    #[serde(default)]
    pub where_operator: Option<String>,
    #[serde(default)]
    pub where_values: Vec<String>,
    #[serde(default)]
    pub changed_since: Option<String>,
}

/// Workspace table written back to storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    /// Id of the transformation bucket the row lives in
    pub bucket_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub backend: String,
    #[serde(default = "default_type")]
    pub kind: String,
    #[serde(default = "default_phase")]
    pub phase: u32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub input: Vec<InputMapping>,
    #[serde(default)]
    pub output: Vec<OutputMapping>,
    /// Ids of transformations that must run first
    #[serde(default)]
    pub requires: Vec<String>,
}

// =============================================================================
// API shape
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInputMapping {
    source: String,
    destination: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    where_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    where_operator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    where_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    changed_since: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOutputMapping {
    source: String,
    destination: String,
    #[serde(default, with = "kbc_bool")]
    incremental: bool,
    #[serde(default, deserialize_with = "primary_key_list")]
    primary_key: Vec<String>,
}

/// Transformation row configuration as stored by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationConfig {
    backend: String,
    #[serde(rename = "type", default = "default_type")]
    kind: String,
    #[serde(default = "default_phase", deserialize_with = "phase_number")]
    phase: u32,
    #[serde(default, with = "kbc_bool")]
    disabled: bool,
    #[serde(default)]
    queries: Vec<String>,
    #[serde(default)]
    input: Vec<ApiInputMapping>,
    #[serde(default)]
    output: Vec<ApiOutputMapping>,
    #[serde(default)]
    requires: Vec<String>,
}

/// Older rows store the primary key as a comma-separated string
fn primary_key_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum KeyList {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match KeyList::deserialize(deserializer)? {
        KeyList::List(keys) => keys,
        KeyList::Joined(s) if s.is_empty() => Vec::new(),
        KeyList::Joined(s) => s.split(',').map(|k| k.trim().to_string()).collect(),
    })
}

/// Phase is stored either as a number or as a numeric string
fn phase_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Phase {
        Number(u32),
        Text(String),
    }

    match Phase::deserialize(deserializer)? {
        Phase::Number(n) => Ok(n),
        Phase::Text(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid phase '{}'", s))),
    }
}

#[derive(Debug, Deserialize)]
pub struct TransformationRemote {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub configuration: TransformationConfig,
}

impl From<&InputMapping> for ApiInputMapping {
    fn from(m: &InputMapping) -> Self {
        Self {
            source: m.source.clone(),
            destination: m.destination.clone(),
            columns: m.columns.clone(),
            where_column: m.where_column.clone(),
            where_operator: m.where_operator.clone(),
            where_values: m.where_values.clone(),
            changed_since: m.changed_since.clone(),
        }
    }
}

impl From<ApiInputMapping> for InputMapping {
    fn from(m: ApiInputMapping) -> Self {
        Self {
            source: m.source,
            destination: m.destination,
            columns: m.columns,
            where_column: m.where_column,
            where_operator: m.where_operator,
            where_values: m.where_values,
            changed_since: m.changed_since,
        }
    }
}

impl From<&OutputMapping> for ApiOutputMapping {
    fn from(m: &OutputMapping) -> Self {
        Self {
            source: m.source.clone(),
            destination: m.destination.clone(),
            incremental: m.incremental,
            primary_key: m.primary_key.clone(),
        }
    }
}

impl From<ApiOutputMapping> for OutputMapping {
    fn from(m: ApiOutputMapping) -> Self {
        Self {
            source: m.source,
            destination: m.destination,
            incremental: m.incremental,
            primary_key: m.primary_key,
        }
    }
}

impl Transformation {
    pub fn to_config(&self) -> TransformationConfig {
        TransformationConfig {
            backend: self.backend.clone(),
            kind: self.kind.clone(),
            phase: self.phase,
            disabled: self.disabled,
            queries: self.queries.clone(),
            input: self.input.iter().map(ApiInputMapping::from).collect(),
            output: self.output.iter().map(ApiOutputMapping::from).collect(),
            requires: self.requires.clone(),
        }
    }

    fn rows_path(&self) -> String {
        format!(
            "components/transformation/configs/{}/rows",
            escape(&self.bucket_id)
        )
    }
}

impl RemoteResource for Transformation {
    const KIND: &'static str = "transformation";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Replace;
    type Remote = TransformationRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("bucket_id", &self.bucket_id)?;
        ensure_not_empty("name", &self.name)?;
        ensure_one_of("backend", &self.backend, BACKENDS)?;
        ensure_one_of("kind", &self.kind, TYPES)?;
        if self.phase == 0 {
            return Err(ApiError::validation("phase must be 1 or greater"));
        }
        for mapping in &self.input {
            if let Some(op) = &mapping.where_operator {
                ensure_one_of("input.where_operator", op, WHERE_OPERATORS)?;
            }
            if mapping.where_column.is_none() && !mapping.where_values.is_empty() {
                return Err(ApiError::validation(format!(
                    "input mapping '{}' has where_values without where_column",
                    mapping.source
                )));
            }
        }
        Ok(())
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok(self.rows_path())
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("{}/{}", self.rows_path(), escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        let config = serde_json::to_value(self.to_config())
            .map_err(|e| ApiError::validation(format!("transformation is not serializable: {}", e)))?;
        configuration_form(&self.name, &self.description, &config).map(Payload::Form)
    }

    fn from_remote(remote: TransformationRemote, previous: &Self) -> ApiResult<Self> {
        let c = remote.configuration;
        Ok(Self {
            bucket_id: previous.bucket_id.clone(),
            name: remote.name,
            description: remote.description.unwrap_or_default(),
            backend: c.backend,
            kind: c.kind,
            phase: c.phase,
            disabled: c.disabled,
            queries: c.queries,
            input: c.input.into_iter().map(InputMapping::from).collect(),
            output: c.output.into_iter().map(OutputMapping::from).collect(),
            requires: c.requires,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cleanup() -> Transformation {
        Transformation {
            bucket_id: "361585".to_string(),
            name: "Clean users".to_string(),
            description: String::new(),
            backend: "snowflake".to_string(),
            kind: "simple".to_string(),
            phase: 1,
            disabled: false,
            queries: vec!["CREATE TABLE \"out\" AS SELECT * FROM \"in\";".to_string()],
            input: vec![InputMapping {
                source: "in.c-main.users".to_string(),
                destination: "in".to_string(),
                columns: vec![],
                where_column: Some("status".to_string()),
                where_operator: Some("eq".to_string()),
                where_values: vec!["active".to_string()],
                changed_since: None,
            }],
            output: vec![OutputMapping {
                source: "out".to_string(),
                destination: "out.c-main.users".to_string(),
                incremental: true,
                primary_key: vec!["id".to_string()],
            }],
            requires: vec![],
        }
    }

    #[test]
    fn test_config_uses_api_field_names() {
        let value = serde_json::to_value(cleanup().to_config()).unwrap();
        assert_eq!(value["type"], "simple");
        assert_eq!(value["input"][0]["whereColumn"], "status");
        assert_eq!(value["output"][0]["primaryKey"], json!(["id"]));
        assert_eq!(value["disabled"], json!(false));
    }

    #[test]
    fn test_from_remote_handles_dialect() {
        let remote: TransformationRemote = serde_json::from_value(json!({
            "id": "361590",
            "name": "Clean users",
            "configuration": {
                "backend": "snowflake",
                "type": "simple",
                "phase": "1",
                "disabled": "0",
                "queries": ["CREATE TABLE \"out\" AS SELECT * FROM \"in\";"],
                "input": [{
                    "source": "in.c-main.users",
                    "destination": "in",
                    "whereColumn": "status",
                    "whereOperator": "eq",
                    "whereValues": ["active"],
                    "datatypes": []
                }],
                "output": [{
                    "source": "out",
                    "destination": "out.c-main.users",
                    "incremental": "1",
                    "primaryKey": "id"
                }],
                "id": "361590"
            }
        }))
        .unwrap();

        let read = Transformation::from_remote(remote, &cleanup()).unwrap();
        assert_eq!(read, cleanup());
    }

    #[test]
    fn test_validate() {
        assert!(cleanup().validate().is_ok());

        let mut t = cleanup();
        t.backend = "mysql".to_string();
        assert!(t.validate().is_err());

        let mut t = cleanup();
        t.input[0].where_operator = Some("gt".to_string());
        assert!(t.validate().is_err());

        let mut t = cleanup();
        t.input[0].where_column = None;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_paths() {
        let t = cleanup();
        assert_eq!(
            t.resource_path("9").unwrap(),
            "components/transformation/configs/361585/rows/9"
        );
    }
}
