//! Shared cluster connection.
//!
//! One `KubePlatform` and one `Settings` per test binary; each test builds
//! its own `Factory` on top.

use std::sync::Arc;

use tokio::sync::OnceCell;

use odh_test_fixtures::telemetry::init_test_tracing;
use odh_test_fixtures::{Factory, KubePlatform, Platform, Settings};

static SHARED_CLUSTER: OnceCell<Arc<SharedTestCluster>> = OnceCell::const_new();

pub struct SharedTestCluster {
    pub platform: Arc<dyn Platform>,
    pub settings: Settings,
}

impl SharedTestCluster {
    /// Get or connect the shared cluster.
    pub async fn get() -> Arc<SharedTestCluster> {
        SHARED_CLUSTER
            .get_or_init(|| async {
                init_test_tracing();
                let settings = Settings::load().expect("Failed to load odh-test settings");
                let platform = KubePlatform::try_default().await.expect(
                    "Failed to connect to Kubernetes cluster. Is your kubeconfig configured?",
                );
                Arc::new(SharedTestCluster {
                    platform: Arc::new(platform),
                    settings,
                })
            })
            .await
            .clone()
    }

    pub fn factory(&self) -> Factory {
        Factory::from_settings(Arc::clone(&self.platform), &self.settings)
    }
}
