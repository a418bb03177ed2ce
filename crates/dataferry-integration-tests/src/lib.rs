//! Dataferry Integration Tests
//!
//! This crate contains integration and end-to-end tests for the dataferry
//! pipeline. It is NOT published to crates.io.
//!
//! # Test Categories
//!
//! - **executor_retry**: Retry, rollback and connection handling of the query executor
//! - **loader_policies**: Existence policies, index column and chunking of the table loader
//! - **migration_pipeline**: CSV ingest and query migration against in-memory databases
//! - **pipeline_containers**: The full pipeline between real MySQL and PostgreSQL servers
//!
//! # Running Tests
//!
//! ```bash
//! # Run all tests that need no Docker
//! cargo test -p dataferry-integration-tests
//!
//! # Include the container tests
//! cargo test -p dataferry-integration-tests -- --include-ignored
//!
//! # Run with logging
//! RUST_LOG=debug cargo test -p dataferry-integration-tests -- --nocapture
//! ```
//!
//! # Requirements
//!
//! The container tests use testcontainers and require Docker to be running.

pub mod fixtures;
pub mod helpers;
pub mod mocks;

pub use fixtures::*;
pub use helpers::*;
