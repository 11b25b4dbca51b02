//! Storage tables
//!
//! Creating a table is a two-step affair: a CSV file holding only the header
//! row is uploaded to the file-import service, then an async table-create
//! job is started from that file. The table id is taken from the finished
//! job's result.

use super::sync::{ensure_not_empty, JobSource, RemoteResource, UpdateStrategy};
use crate::kbc::client::escape;
use crate::kbc::codec::{kbc_id, FormBody, MultipartPart, Payload};
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::error::{ApiError, ApiResult};
use crate::kbc::KbcClient;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub bucket_id: String,
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Uploaded header file, set while creating
    #[serde(skip)]
    data_file_id: Option<String>,
}

impl Table {
    pub fn new(bucket_id: &str, name: &str, columns: Vec<String>, primary_key: Vec<String>) -> Self {
        Self {
            bucket_id: bucket_id.to_string(),
            name: name.to_string(),
            columns,
            primary_key,
            data_file_id: None,
        }
    }

    /// Header row in the CSV dialect the importer expects
    pub fn header_csv(&self) -> String {
        let quoted: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
            .collect();
        format!("{}\n", quoted.join(","))
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    #[serde(with = "kbc_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct TableBucketRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRemote {
    pub name: String,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    pub bucket: TableBucketRef,
}

impl RemoteResource for Table {
    const KIND: &'static str = "table";
    const FAMILY: EndpointFamily = EndpointFamily::Storage;
    const UPDATE: UpdateStrategy = UpdateStrategy::Immutable;
    const JOB: JobSource = JobSource::Storage;
    type Remote = TableRemote;

    fn validate(&self) -> ApiResult<()> {
        ensure_not_empty("bucket_id", &self.bucket_id)?;
        ensure_not_empty("name", &self.name)?;
        if self.columns.is_empty() {
            return Err(ApiError::validation("table must declare at least one column"));
        }
        for column in &self.columns {
            if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ApiError::validation(format!(
                    "invalid column name '{}': only letters, digits and underscores are allowed",
                    column
                )));
            }
        }
        if let Some(key) = self.primary_key.iter().find(|k| !self.columns.contains(k)) {
            return Err(ApiError::validation(format!(
                "primary key column '{}' is not one of the table columns",
                key
            )));
        }
        Ok(())
    }

    fn prepare<'a>(&'a mut self, client: &'a KbcClient) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let filename = format!("{}.csv", self.name);
            let parts = vec![
                MultipartPart::text("name", filename.as_str()),
                MultipartPart::file(
                    "data",
                    &filename,
                    "text/csv",
                    self.header_csv().into_bytes(),
                ),
            ];
            let uploaded: UploadedFile = client
                .post(
                    EndpointFamily::FileImport,
                    "upload-file",
                    &Payload::Multipart(parts),
                )
                .await?;
            tracing::debug!("uploaded header for table {} as file {}", self.name, uploaded.id);
            self.data_file_id = Some(uploaded.id);
            Ok(())
        })
    }

    fn collection_path(&self) -> ApiResult<String> {
        Ok(format!("buckets/{}/tables-async", escape(&self.bucket_id)))
    }

    fn resource_path(&self, id: &str) -> ApiResult<String> {
        Ok(format!("tables/{}", escape(id)))
    }

    fn create_payload(&self) -> ApiResult<Payload> {
        let data_file_id = self
            .data_file_id
            .as_deref()
            .ok_or_else(|| ApiError::validation("table header file was not uploaded"))?;
        let form = FormBody::new()
            .field("name", self.name.as_str())
            .field("dataFileId", data_file_id)
            .field("primaryKey", self.primary_key.join(","));
        Ok(Payload::Form(form))
    }

    fn from_remote(remote: TableRemote, _previous: &Self) -> ApiResult<Self> {
        Ok(Self::new(
            &remote.bucket.id,
            &remote.name,
            remote.columns,
            remote.primary_key,
        ))
    }
}
