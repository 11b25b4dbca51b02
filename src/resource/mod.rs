//! Managed resource kinds
//!
//! Every kind is a plain serde struct implementing [`RemoteResource`]; the
//! generic [`Synchronizer`] drives create/read/update/delete for all of them.
//!
//! # Architecture
//!
//! - [`sync`] - Lifecycle template, handle and state machine
//! - [`registry`] - Kind names and state-document dispatch
//! - one module per kind: [`bucket`], [`table`], [`transformation`],
//!   [`component`], [`writer`], [`orchestration`], [`token`]
//!
//! # Example
//!
//! ```ignore
//! use kbc_provider::resource::{Bucket, ResourceHandle, Synchronizer};
//!
//! async fn make_bucket(client: &KbcClient) -> ApiResult<()> {
//!     let mut handle = ResourceHandle::new(Bucket {
//!         name: "main".into(),
//!         stage: "in".into(),
//!         description: String::new(),
//!         backend: None,
//!     });
//!     Synchronizer::new(client).create(&mut handle).await
//! }
//! ```

pub mod bucket;
pub mod component;
pub mod orchestration;
pub mod registry;
pub mod sync;
pub mod table;
pub mod token;
pub mod transformation;
pub mod writer;

pub use bucket::Bucket;
pub use component::ComponentConfiguration;
pub use orchestration::Orchestration;
pub use registry::{Operation, ResourceKind, StateDocument};
pub use sync::{Presence, RemoteResource, ResourceHandle, ResourceState, Synchronizer, UpdateStrategy};
pub use table::Table;
pub use token::AccessToken;
pub use transformation::Transformation;
pub use writer::DatabaseWriter;
