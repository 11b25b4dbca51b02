//! Database writers
//!
//! A writer is a component configuration with a typed body: database
//! credentials plus the list of tables to export. Credentials are either
//! supplied (password already encrypted) or provisioned on create. The
//! provisioning call enqueues a job; its result carries the credentials id,
//! the plaintext password is encrypted for the component before it is
//! stored, and the credentials are dropped again when the writer is deleted.

use super::component::{configs_path, configuration_form};
use super::sync::{ensure_not_empty, ensure_one_of, RemoteResource, UpdateStrategy};
use crate::kbc::auth::{ensure_encrypted, is_encrypted};
use crate::kbc::client::escape;
use crate::kbc::codec::{id_from_value, kbc_bool, kbc_id, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use crate::kbc::jobs::{await_completion, JobRef};
use crate::kbc::KbcClient;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub const DRIVERS: &[&str] = &["snowflake", "redshift", "synapse", "mssql", "mysql"];
pub const PROVISIONED_BACKENDS: &[&str] = &["snowflake", "redshift", "synapse"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub driver: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<String>,
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    pub user: String,
    /// Encrypted password
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterColumn {
    pub name: String,
    pub db_name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterTable {
    pub table_id: String,
    pub db_name: String,
    #[serde(default = "default_true")]
    pub export: bool,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub items: Vec<WriterColumn>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseWriter {
    pub component_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub db: Option<DatabaseCredentials>,
    /// Backend to provision credentials on instead of supplying `db`
    #[serde(default)]
    pub provision: Option<String>,
    #[serde(default)]
    pub tables: Vec<WriterTable>,
    /// Set once credentials have been provisioned
    #[serde(default)]
    pub provisioned_credentials_id: Option<String>,
}

// =============================================================================
// API shape
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiDb {
    driver: String,
    host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<String>,
    database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    warehouse: Option<String>,
    user: String,
    #[serde(rename = "#password")]
    password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiColumn {
    name: String,
    db_name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(default, with = "kbc_bool")]
    nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTable {
    table_id: String,
    db_name: String,
    #[serde(default = "default_true", with = "kbc_bool")]
    export: bool,
    #[serde(default, with = "kbc_bool")]
    incremental: bool,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    items: Vec<ApiColumn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    db: Option<ApiDb>,
    #[serde(default)]
    tables: Vec<ApiTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiInputTable {
    source: String,
    destination: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiInput {
    #[serde(default)]
    tables: Vec<ApiInputTable>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ApiStorage {
    #[serde(default)]
    input: ApiInput,
}

/// Writer configuration body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default)]
    parameters: ApiParameters,
    #[serde(default)]
    storage: ApiStorage,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseWriterRemote {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: WriterConfig,
}

/// Credentials returned by the provisioning API
#[derive(Debug, Deserialize)]
struct ProvisionedCredentials {
    #[serde(with = "kbc_id")]
    id: String,
    hostname: String,
    #[serde(default)]
    port: Option<u16>,
    db: String,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    warehouse: Option<String>,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ProvisioningResponse {
    credentials: ProvisionedCredentials,
}

impl From<&WriterColumn> for ApiColumn {
    fn from(c: &WriterColumn) -> Self {
        Self {
            name: c.name.clone(),
            db_name: c.db_name.clone(),
            data_type: c.data_type.clone(),
            size: c.size.clone(),
            nullable: c.nullable,
            default: c.default.clone(),
        }
    }
}

impl From<ApiColumn> for WriterColumn {
    fn from(c: ApiColumn) -> Self {
        Self {
            name: c.name,
            db_name: c.db_name,
            data_type: c.data_type,
            size: c.size,
            nullable: c.nullable,
            default: c.default,
        }
    }
}

impl From<&WriterTable> for ApiTable {
    fn from(t: &WriterTable) -> Self {
        Self {
            table_id: t.table_id.clone(),
            db_name: t.db_name.clone(),
            export: t.export,
            incremental: t.incremental,
            primary_key: t.primary_key.clone(),
            items: t.items.iter().map(ApiColumn::from).collect(),
        }
    }
}

impl From<ApiTable> for WriterTable {
    fn from(t: ApiTable) -> Self {
        Self {
            table_id: t.table_id,
            db_name: t.db_name,
            export: t.export,
            incremental: t.incremental,
            primary_key: t.primary_key,
            items: t.items.into_iter().map(WriterColumn::from).collect(),
        }
    }
}

impl From<&DatabaseCredentials> for ApiDb {
    fn from(d: &DatabaseCredentials) -> Self {
        Self {
            driver: d.driver.clone(),
            host: d.host.clone(),
            port: d.port.clone(),
            database: d.database.clone(),
            schema: d.schema.clone(),
            warehouse: d.warehouse.clone(),
            user: d.user.clone(),
            password: d.password.clone(),
        }
    }
}

impl From<ApiDb> for DatabaseCredentials {
    fn from(d: ApiDb) -> Self {
        Self {
            driver: d.driver,
            host: d.host,
            port: d.port,
            database: d.database,
            schema: d.schema,
            warehouse: d.warehouse,
            user: d.user,
            password: d.password,
        }
    }
}

impl DatabaseWriter {
    pub fn to_config(&self) -> WriterConfig {
        let input = self
            .tables
            .iter()
            .filter(|t| t.export)
            .map(|t| ApiInputTable {
                source: t.table_id.clone(),
                destination: format!("{}.csv", t.table_id),
            })
            .collect();

        WriterConfig {
            parameters: ApiParameters {
                db: self.db.as_ref().map(ApiDb::from),
                tables: self.tables.iter().map(ApiTable::from).collect(),
            },
            storage: ApiStorage {
                input: ApiInput { tables: input },
            },
        }
    }

    fn provisioning_path(backend: &str) -> String {
        escape(backend).into_owned()
    }

    async fn provision_credentials(&mut self, client: &KbcClient, backend: &str) -> ApiResult<()> {
        let request = Payload::Json(serde_json::json!({ "type": "writer" }));
        let queued: serde_json::Value = client
            .post(
                EndpointFamily::DatabaseProvisioning,
                &Self::provisioning_path(backend),
                &request,
            )
            .await?;
        let job_id = queued
            .get("id")
            .and_then(id_from_value)
            .ok_or_else(|| ApiError::decode("POST provisioning", "response has no 'id' field"))?;

        let completed = await_completion(client, &JobRef::queue(&job_id)).await?;
        let credentials_id = completed.job.result_id().ok_or_else(|| {
            ApiError::decode("provisioning job", "finished job has no 'results.id' field")
        })?;

        let path = format!(
            "{}/{}",
            Self::provisioning_path(backend),
            escape(&credentials_id)
        );
        let response: ProvisioningResponse = client
            .get(EndpointFamily::DatabaseProvisioning, &path)
            .await?;
        let creds = response.credentials;

        let password = if is_encrypted(&creds.password) {
            creds.password
        } else {
            client.encrypt(&self.component_id, &creds.password).await?
        };
        ensure_encrypted("db.password", &password)?;

        tracing::info!(
            "provisioned {} credentials {} for writer {}",
            backend,
            creds.id,
            self.name
        );
        self.provisioned_credentials_id = Some(creds.id);
        self.db = Some(DatabaseCredentials {
            driver: backend.to_string(),
            host: creds.hostname,
            port: creds.port.map(|p| p.to_string()),
            database: creds.db,
            schema: creds.schema,
            warehouse: creds.warehouse,
            user: creds.user,
            password,
        });
        Ok(())
    }
}

impl RemoteResource for DatabaseWriter {
    const KIND: &'static str = "database_writer";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Replace;
    type Remote = DatabaseWriterRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("component_id", &self.component_id)?;
        ensure_not_empty("name", &self.name)?;

        match (&self.db, &self.provision) {
            (Some(db), _) => {
                ensure_one_of("db.driver", &db.driver, DRIVERS)?;
                ensure_not_empty("db.host", &db.host)?;
                ensure_not_empty("db.user", &db.user)?;
                ensure_encrypted("db.password", &db.password)?;
            },
            (None, Some(backend)) => ensure_one_of("provision", backend, PROVISIONED_BACKENDS)?,
            (None, None) => {
                return Err(ApiError::validation(
                    "writer needs either db credentials or a provision backend",
                ));
            },
        }

        for table in &self.tables {
            ensure_not_empty("tables.table_id", &table.table_id)?;
            ensure_not_empty("tables.db_name", &table.db_name)?;
            let names: Vec<&str> = table.items.iter().map(|i| i.name.as_str()).collect();
            if let Some(key) = table.primary_key.iter().find(|k| !names.contains(&k.as_str())) {
                return Err(ApiError::validation(format!(
                    "primary key column '{}' of {} is not among its items",
                    key, table.table_id
                )));
            }
        }
        Ok(())
    }

    fn prepare<'a>(&'a mut self, client: &'a KbcClient) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            match (self.db.is_some(), self.provision.clone()) {
                (false, Some(backend)) => self.provision_credentials(client, &backend).await,
                _ => Ok(()),
            }
        })
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok(configs_path(&self.component_id))
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("{}/{}", configs_path(&self.component_id), escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        let config = serde_json::to_value(self.to_config())
            .map_err(|e| ApiError::validation(format!("writer configuration: {}", e)))?;
        configuration_form(&self.name, &self.description, &config).map(Payload::Form)
    }

    fn from_remote(remote: DatabaseWriterRemote, previous: &Self) -> ApiResult<Self> {
        let params = remote.configuration.parameters;
        Ok(Self {
            component_id: previous.component_id.clone(),
            name: remote.name,
            description: remote.description.unwrap_or_default(),
            db: params.db.map(DatabaseCredentials::from),
            provision: previous.provision.clone(),
            tables: params.tables.into_iter().map(WriterTable::from).collect(),
            provisioned_credentials_id: previous.provisioned_credentials_id.clone(),
        })
    }

    fn cleanup<'a>(&'a self, client: &'a KbcClient) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let (Some(backend), Some(credentials_id)) =
                (&self.provision, &self.provisioned_credentials_id)
            else {
                return Ok(());
            };
            let path = format!(
                "{}/{}",
                Self::provisioning_path(backend),
                escape(credentials_id)
            );
            match client.delete(EndpointFamily::DatabaseProvisioning, &path).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer() -> DatabaseWriter {
        DatabaseWriter {
            component_id: "keboola.wr-db-snowflake".to_string(),
            name: "Warehouse".to_string(),
            description: String::new(),
            db: Some(DatabaseCredentials {
                driver: "snowflake".to_string(),
                host: "acme.snowflakecomputing.com".to_string(),
                port: Some("443".to_string()),
                database: "ANALYTICS".to_string(),
                schema: Some("PUBLIC".to_string()),
                warehouse: Some("LOAD".to_string()),
                user: "KBC_WRITER".to_string(),
                password: "KBC::ProjectSecure::eJwLAAAA".to_string(),
            }),
            provision: None,
            tables: vec![WriterTable {
                table_id: "out.c-main.users".to_string(),
                db_name: "USERS".to_string(),
                export: true,
                incremental: false,
                primary_key: vec!["id".to_string()],
                items: vec![WriterColumn {
                    name: "id".to_string(),
                    db_name: "ID".to_string(),
                    data_type: "integer".to_string(),
                    size: None,
                    nullable: false,
                    default: None,
                }],
            }],
            provisioned_credentials_id: None,
        }
    }

    #[test]
    fn test_config_shape() {
        let value = serde_json::to_value(writer().to_config()).unwrap();
        assert_eq!(value["parameters"]["db"]["#password"], "KBC::ProjectSecure::eJwLAAAA");
        assert_eq!(value["parameters"]["tables"][0]["dbName"], "USERS");
        assert_eq!(
            value["storage"]["input"]["tables"][0],
            json!({"source": "out.c-main.users", "destination": "out.c-main.users.csv"})
        );
    }

    #[test]
    fn test_plain_password_rejected() {
        let mut w = writer();
        if let Some(db) = w.db.as_mut() {
            db.password = "hunter2".to_string();
        }
        let err = w.validate().unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_provision_without_db_is_valid() {
        let mut w = writer();
        w.db = None;
        assert!(w.validate().is_err());
        w.provision = Some("snowflake".to_string());
        assert!(w.validate().is_ok());
        w.provision = Some("mysql".to_string());
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_from_remote_roundtrip() {
        let remote: DatabaseWriterRemote = serde_json::from_value(json!({
            "id": "7001",
            "name": "Warehouse",
            "configuration": serde_json::to_value(writer().to_config()).unwrap(),
            "version": 3
        }))
        .unwrap();
        assert_eq!(DatabaseWriter::from_remote(remote, &writer()).unwrap(), writer());
    }
}
