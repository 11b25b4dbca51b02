//! Endpoint families
//!
//! Every remote route belongs to one of a fixed set of API families. A family
//! owns a base URL and decides whether the storage token header is sent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header carrying the storage API token
pub const TOKEN_HEADER: &str = "X-StorageApi-Token";

/// Group of remote API routes sharing a base URL and auth convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointFamily {
    Storage,
    /// Syrup: orchestrator and job queue
    Orchestrator,
    FileImport,
    Docker,
    DatabaseProvisioning,
}

impl EndpointFamily {
    pub const ALL: [EndpointFamily; 5] = [
        Self::Storage,
        Self::Orchestrator,
        Self::FileImport,
        Self::Docker,
        Self::DatabaseProvisioning,
    ];

    /// Default production base URL (always ends with `/`)
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Storage => "https://connection.keboola.com/v2/storage/",
            Self::Orchestrator => "https://syrup.keboola.com/",
            Self::FileImport => "https://import.keboola.com/",
            Self::Docker => "https://docker-runner.keboola.com/",
            Self::DatabaseProvisioning => "https://provisioning.keboola.com/",
        }
    }

    /// Whether requests to this family carry the token header.
    ///
    /// The runner and provisioning families are called without it.
    pub fn sends_credential(&self) -> bool {
        !matches!(self, Self::Docker | Self::DatabaseProvisioning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Orchestrator => "orchestrator",
            Self::FileImport => "file_import",
            Self::Docker => "docker",
            Self::DatabaseProvisioning => "database_provisioning",
        }
    }
}

impl fmt::Display for EndpointFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
