//! Generic component configurations (extractors and other components)

use super::sync::{ensure_not_empty, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{FormBody, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfiguration {
    pub component_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object")]
    pub configuration: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
pub struct ComponentConfigurationRemote {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object")]
    pub configuration: Value,
}

/// Collection path for configurations of a component
pub fn configs_path(component_id: &str) -> String {
    format!("components/{}/configs", escape(component_id))
}

/// Form fields shared by every configuration-backed resource
pub fn configuration_form(name: &str, description: &str, configuration: &Value) -> ApiResult<FormBody> {
    let configuration = serde_json::to_string(configuration)
        .map_err(|e| ApiError::validation(format!("configuration is not serializable: {}", e)))?;
    Ok(FormBody::new()
        .field("name", name)
        .field("description", description)
        .field("configuration", configuration))
}

impl RemoteResource for ComponentConfiguration {
    const KIND: &'static str = "component_configuration";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Replace;
    type Remote = ComponentConfigurationRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("component_id", &self.component_id)?;
        ensure_not_empty("name", &self.name)?;
        if !self.configuration.is_object() {
            return Err(ApiError::validation("configuration must be a JSON object"));
        }
        Ok(())
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok(configs_path(&self.component_id))
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("{}/{}", configs_path(&self.component_id), escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        configuration_form(&self.name, &self.description, &self.configuration).map(Payload::Form)
    }

    fn from_remote(remote: ComponentConfigurationRemote, previous: &Self) -> ApiResult<Self> {
        Ok(Self {
            component_id: previous.component_id.clone(),
            name: remote.name,
            description: remote.description.unwrap_or_default(),
            configuration: remote.configuration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extractor() -> ComponentConfiguration {
        ComponentConfiguration {
            component_id: "keboola.ex-http".to_string(),
            name: "Daily rates".to_string(),
            description: String::new(),
            configuration: json!({"parameters": {"baseUrl": "https://example.com/"}}),
        }
    }

    #[test]
    fn test_paths() {
        let c = extractor();
        assert_eq!(c.collection_path().unwrap(), "components/keboola.ex-http/configs");
        assert_eq!(
            c.resource_path("4521").unwrap(),
            "components/keboola.ex-http/configs/4521"
        );
    }

    #[test]
    fn test_configuration_sent_as_json_string() {
        let Payload::Form(form) = extractor().create_payload().unwrap() else {
            panic!("expected form payload");
        };
        assert_eq!(
            form.get("configuration"),
            Some(r#"{"parameters":{"baseUrl":"https://example.com/"}}"#)
        );
    }

    #[test]
    fn test_validate_requires_object() {
        let mut c = extractor();
        c.configuration = json!([1, 2]);
        assert!(c.validate().is_err());
    }
}
