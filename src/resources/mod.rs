//! Manifest generation.
//!
//! Pure functions from a validated configuration to typed Kubernetes
//! objects. Nothing here talks to the platform.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Secret | Database credentials |
//! | PersistentVolumeClaim | Database data directory |
//! | Deployment | Single-replica MySQL server |
//! | Service | In-cluster database endpoint |
//! | ModelRegistry | Registry instance reconciled by the operator |

pub mod common;
pub mod database;
pub mod registry;

pub use common::{label_selector, managed_selector, standard_labels};
