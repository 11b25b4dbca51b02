//! Declarative resource provider for Keboola Connection
//!
//! Translates a host's desired-state documents into calls against the
//! Storage, orchestrator, file-import, Docker-runner and provisioning APIs.

pub mod config;
pub mod kbc;
pub mod resource;
