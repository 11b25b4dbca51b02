//! Platform API interaction module
//!
//! This module provides the core functionality for talking to the platform's
//! REST API families: credentials, transport, codecs and job polling.
//!
//! # Module Structure
//!
//! - [`auth`] - storage token and encrypted-secret checks
//! - [`client`] - main client with status classification and JSON decoding
//! - [`codec`] - form, JSON and multipart bodies plus dialect scalars
//! - [`endpoint`] - API families, base URLs and auth convention
//! - [`error`] - error type shared by every operation
//! - [`http`] - transport: URL building, headers, raw responses
//! - [`jobs`] - polling asynchronous jobs to a terminal state
//!
//! # Example
//!
//! ```ignore
//! use kbc_provider::kbc::endpoint::EndpointFamily;
//!
//! async fn example(client: &KbcClient) -> ApiResult<()> {
//!     let bucket: serde_json::Value = client.get(EndpointFamily::Storage, "buckets/in.c-main").await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod jobs;

pub use client::KbcClient;
pub use endpoint::EndpointFamily;
pub use error::{ApiError, ApiResult};
