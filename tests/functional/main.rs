// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the fixture factory, bundles and lifecycle scopes.
//!
//! These tests drive the real factory and bundle code against
//! [`InMemoryPlatform`](odh_test_fixtures::InMemoryPlatform), which simulates
//! the model registry operator and the ODH operator closely enough for the
//! fixtures to provision, wait and tear down exactly as they would on a
//! cluster. No Kubernetes cluster is required.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_registry_bundle_creation_order
//!
//! # Run with log output
//! RUST_LOG=odh_test_fixtures=debug cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Factory tests**: creation order, naming, batches, existing-object policy
//! - **Cleanup tests**: reverse-order teardown, aggregation, idempotency
//! - **Scope tests**: scope close semantics, panics, drop
//! - **DSC tests**: component patch and restore
//! - **Probe tests**: HTTP probes against a local axum server
//! - **Sweep tests**: label-based removal of leftovers
//! - **Timeout tests**: bounded waits under paused Tokio time
//!
//! ## Design Principles
//!
//! - **No K8s Required**: every platform call lands in process memory
//! - **Journal Assertions**: ordering is checked against the platform journal
//! - **Isolated Names**: each test builds its own factory and name registry

#[path = "../common/mod.rs"]
mod common;

mod cleanup_tests;
mod dsc_tests;
mod probe_tests;
mod timeout_tests;
