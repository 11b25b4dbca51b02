//! Resource kind registry
//!
//! Maps kind names onto the typed resources and runs one lifecycle operation
//! on a desired-state document. A state document is the resource's own
//! attributes plus an optional `id`:
//!
//! ```json
//! {"id": "in.c-main", "name": "main", "stage": "in", "backend": "snowflake"}
//! ```

use super::bucket::Bucket;
use super::component::ComponentConfiguration;
use super::orchestration::Orchestration;
use super::sync::{Presence, RemoteResource, ResourceHandle, Synchronizer};
use super::table::Table;
use super::token::AccessToken;
use super::transformation::Transformation;
use super::writer::DatabaseWriter;
use crate::kbc::error::{ApiError, ApiResult};
use crate::kbc::KbcClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Every managed resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Table,
    Transformation,
    ComponentConfiguration,
    DatabaseWriter,
    Orchestration,
    AccessToken,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Bucket,
        ResourceKind::Table,
        ResourceKind::Transformation,
        ResourceKind::ComponentConfiguration,
        ResourceKind::DatabaseWriter,
        ResourceKind::Orchestration,
        ResourceKind::AccessToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => Bucket::KIND,
            Self::Table => Table::KIND,
            Self::Transformation => Transformation::KIND,
            Self::ComponentConfiguration => ComponentConfiguration::KIND,
            Self::DatabaseWriter => DatabaseWriter::KIND,
            Self::Orchestration => Orchestration::KIND,
            Self::AccessToken => AccessToken::KIND,
        }
    }

    /// Run `op` on the state document and return the resulting document,
    /// or `None` once the resource no longer exists.
    pub async fn apply(
        self,
        client: &KbcClient,
        op: &Operation,
        document: Value,
    ) -> ApiResult<Option<Value>> {
        match self {
            Self::Bucket => apply::<Bucket>(client, op, document).await,
            Self::Table => apply::<Table>(client, op, document).await,
            Self::Transformation => apply::<Transformation>(client, op, document).await,
            Self::ComponentConfiguration => {
                apply::<ComponentConfiguration>(client, op, document).await
            },
            Self::DatabaseWriter => apply::<DatabaseWriter>(client, op, document).await,
            Self::Orchestration => apply::<Orchestration>(client, op, document).await,
            Self::AccessToken => apply::<AccessToken>(client, op, document).await,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                ApiError::validation(format!(
                    "unknown resource kind '{}' (known: {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Lifecycle operation requested by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    /// Changed host attribute names
    Update(Vec<String>),
    Delete,
}

/// Desired state plus the remote id, as exchanged with the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument<R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub desired: R,
}

async fn apply<R>(client: &KbcClient, op: &Operation, document: Value) -> ApiResult<Option<Value>>
where
    R: RemoteResource + Serialize + DeserializeOwned,
{
    let doc: StateDocument<R> = serde_json::from_value(document)
        .map_err(|e| ApiError::validation(format!("invalid {} state: {}", R::KIND, e)))?;

    let mut handle = match doc.id {
        Some(id) => ResourceHandle::existing(id, doc.desired),
        None => ResourceHandle::new(doc.desired),
    };
    let sync = Synchronizer::new(client);

    match op {
        Operation::Create => {
            if let Some(id) = handle.id() {
                return Err(ApiError::validation(format!(
                    "{} already exists with id {}",
                    R::KIND,
                    id
                )));
            }
            sync.create(&mut handle).await?;
        },
        Operation::Read => {
            if sync.read(&mut handle).await? == Presence::Absent {
                return Ok(None);
            }
        },
        Operation::Update(changed) => {
            let changed: Vec<&str> = changed.iter().map(String::as_str).collect();
            sync.update(&mut handle, &changed).await?;
        },
        Operation::Delete => {
            sync.delete(&mut handle).await?;
            return Ok(None);
        },
    }

    let doc = StateDocument {
        id: handle.id().map(str::to_string),
        desired: handle.desired,
    };
    serde_json::to_value(&doc)
        .map(Some)
        .map_err(|e| ApiError::validation(format!("failed to encode {} state: {}", R::KIND, e)))
}
