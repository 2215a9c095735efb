//! Suite configuration.
//!
//! Layered the usual way: built-in defaults, then an optional
//! `odh-test.{toml,yaml}` in the working directory, then `ODH_TEST__*`
//! environment variables (`__` separates nesting levels, e.g.
//! `ODH_TEST__TIMEOUTS__READINESS_SECS=600`).

use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::wait::Timeouts;

/// Base name of the optional settings file.
pub const SETTINGS_FILE: &str = "odh-test";

/// Prefix of the environment overrides.
pub const ENV_PREFIX: &str = "ODH_TEST";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Namespace the registry operator watches for ModelRegistry instances
    pub model_registry_namespace: String,
    /// Namespace of the ODH/RHOAI control plane
    pub applications_namespace: String,
    pub dsc_name: String,
    /// Tear fixtures down at scope exit
    pub teardown_resources: bool,
    /// Adopt objects left by a previous run instead of failing on them
    pub post_upgrade: bool,
    /// Registry instances created by multi-instance tests
    pub num_mr_instances: usize,
    /// Fixed run id; generated per factory when unset
    pub run_id: Option<String>,
    pub timeouts: TimeoutSettings,
    pub probe: ProbeSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_registry_namespace: "rhoai-model-registries".to_string(),
            applications_namespace: "redhat-ods-applications".to_string(),
            dsc_name: "default-dsc".to_string(),
            teardown_resources: true,
            post_upgrade: false,
            num_mr_instances: 1,
            run_id: None,
            timeouts: TimeoutSettings::default(),
            probe: ProbeSettings::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub readiness_secs: u64,
    pub deletion_secs: u64,
    pub cascade_grace_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let defaults = Timeouts::default();
        Self {
            readiness_secs: defaults.readiness.as_secs(),
            deletion_secs: defaults.deletion.as_secs(),
            cascade_grace_secs: defaults.cascade_grace.as_secs(),
            poll_interval_ms: u64::try_from(defaults.poll_interval.as_millis()).unwrap_or(2_000),
        }
    }
}

impl TimeoutSettings {
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            readiness: Duration::from_secs(self.readiness_secs),
            deletion: Duration::from_secs(self.deletion_secs),
            cascade_grace: Duration::from_secs(self.cascade_grace_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// HTTP probe settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Bearer token sent with every probe, usually `oc whoami -t`
    pub token: Option<String>,
    /// Skip TLS verification; cluster routes commonly use self-signed certs
    pub insecure_tls: bool,
    pub request_timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            token: None,
            insecure_tls: true,
            request_timeout_secs: 30,
        }
    }
}

impl ProbeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info,kube=warn,odh_test_fixtures=debug".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// The standard source stack with `file` as the settings file base name.
    pub fn layered(file: &str) -> ConfigBuilder<DefaultState> {
        config::Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
    }

    /// Load from `odh-test.{toml,yaml}` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(Self::layered(SETTINGS_FILE))
    }

    /// Build and validate settings from an arbitrary source stack.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_mr_instances == 0 {
            return Err(ConfigError::Message(
                "num_mr_instances must be at least 1".to_string(),
            ));
        }
        if self.timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "timeouts.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.timeouts.readiness_secs == 0 || self.timeouts.deletion_secs == 0 {
            return Err(ConfigError::Message(
                "readiness and deletion timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
