// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for odh-test-fixtures
//!
//! These tests require a running OpenShift/Kubernetes cluster with the Open
//! Data Hub operators installed, accessible via kubeconfig. Tests are marked
//! with #[ignore] and must be run explicitly:
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration -- --ignored
//!
//! # Run specific test
//! cargo test --test integration test_namespace_round_trip -- --ignored
//! ```
//!
//! Settings come from `odh-test.{toml,yaml}` and `ODH_TEST__*` variables,
//! the same way the suites that use this crate configure it.
//!
//! ## Design Principles
//!
//! - **Scoped Cleanup**: every test runs inside `scoped`, so objects are
//!   removed even when an assertion panics
//! - **Run Labels**: each test process uses one run id; `odh-fixtures-sweep <run-id>`
//!   removes whatever an interrupted run left behind

// Shared test fixtures (used by functional and integration)
#[path = "../common/mod.rs"]
mod common;

mod cluster;


pub use cluster::*;
