//! Client-side types for the custom resources the fixtures create or patch.
//!
//! - `ModelRegistry`: a model registry server instance
//! - `DataScienceCluster`: the cluster-wide component switchboard
//! - KServe serving kinds, handled dynamically

mod condition;
mod data_science_cluster;
mod inference_service;
mod model_registry;

pub use condition::*;
pub use data_science_cluster::*;
pub use inference_service::*;
pub use model_registry::*;
