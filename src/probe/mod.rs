//! HTTP probes against provisioned endpoints.
//!
//! Each probe sends one request and checks both the status code and the
//! shape of the body, so a proxy error page answering 200 does not count as
//! a healthy server. Cluster routes usually carry self-signed certificates,
//! which is why TLS verification can be switched off.

mod error;

pub use error::ProbeError;

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::fixtures::registry::REGISTERED_MODELS_PATH;
use crate::settings::ProbeSettings;
use crate::wait::{Observation, WaitError, poll_until};

/// Longest body excerpt kept in an error.
const BODY_EXCERPT_CHARS: usize = 512;

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Create a builder for a [`ProbeClient`].
pub fn build() -> ProbeClientBuilder {
    ProbeClientBuilder::default()
}

/// Builder for [`ProbeClient`].
#[derive(Debug, Clone)]
pub struct ProbeClientBuilder {
    bearer_token: Option<String>,
    insecure_tls: bool,
    timeout: Duration,
}

impl Default for ProbeClientBuilder {
    fn default() -> Self {
        Self {
            bearer_token: None,
            insecure_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProbeClientBuilder {
    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Accept any server certificate.
    pub fn with_insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure_tls = insecure;
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ProbeClient, ProbeError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.insecure_tls)
            .timeout(self.timeout)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(ProbeClient {
            http,
            bearer_token: self.bearer_token,
        })
    }
}

/// HTTP client for readiness and smoke probes.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl ProbeClient {
    pub fn from_settings(settings: &ProbeSettings) -> Result<Self, ProbeError> {
        let mut builder = build()
            .with_insecure_tls(settings.insecure_tls)
            .with_timeout(settings.request_timeout());
        if let Some(token) = &settings.token {
            builder = builder.with_bearer_token(token.clone());
        }
        builder.build()
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send `request`, require HTTP 200 and a JSON body accepted by `check`.
    async fn expect_json(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        expected: &'static str,
        check: impl Fn(&Value) -> bool,
    ) -> Result<Value, ProbeError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|source| ProbeError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| ProbeError::Request {
            url: url.to_string(),
            source,
        })?;
        debug!(url, status = status.as_u16(), bytes = body.len(), "Probe response");

        if status != StatusCode::OK {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(json) if check(&json) => Ok(json),
            _ => Err(ProbeError::UnexpectedBody {
                url: url.to_string(),
                expected,
                body: excerpt(&body),
            }),
        }
    }

    /// KServe v2 inference: `POST {base}/v2/models/{model}/infer`.
    #[instrument(skip(self, request))]
    pub async fn v2_infer(
        &self,
        base: &str,
        model: &str,
        request: &Value,
    ) -> Result<Value, ProbeError> {
        let url = join(base, &format!("v2/models/{model}/infer"));
        self.expect_json(
            &url,
            self.http.post(&url).json(request),
            "outputs or model_name",
            |body| body.get("outputs").is_some() || body.get("model_name").is_some(),
        )
        .await
    }

    /// OpenAI-compatible chat: `POST {base}/v1/chat/completions`.
    #[instrument(skip(self, request))]
    pub async fn chat_completion(&self, base: &str, request: &Value) -> Result<Value, ProbeError> {
        let url = join(base, "v1/chat/completions");
        self.expect_json(
            &url,
            self.http.post(&url).json(request),
            "choices",
            |body| body.get("choices").is_some(),
        )
        .await
    }

    /// List registered models from a registry REST endpoint.
    #[instrument(skip(self))]
    pub async fn registered_models(&self, rest_endpoint: &str) -> Result<Value, ProbeError> {
        let url = join(rest_endpoint, REGISTERED_MODELS_PATH);
        self.expect_json(&url, self.http.get(&url), "items", |body| {
            body.get("items").is_some()
        })
        .await
    }

    /// Poll `GET url` until it answers 200.
    #[instrument(skip(self))]
    pub async fn wait_until_healthy(
        &self,
        url: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), ProbeError> {
        let outcome = poll_until(timeout, interval, || async {
            let status = match self.authorized(self.http.get(url)).send().await {
                Ok(response) => response.status(),
                Err(e) => return Ok(Observation::Pending(e.to_string())),
            };
            Ok(if status == StatusCode::OK {
                Observation::Done(())
            } else {
                Observation::Pending(format!("HTTP {}", status.as_u16()))
            })
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(WaitError::Timeout { after, last_status }) => Err(ProbeError::Timeout {
                url: url.to_string(),
                after,
                last_status,
            }),
            Err(other) => Err(ProbeError::Timeout {
                url: url.to_string(),
                after: timeout,
                last_status: Some(other.to_string()),
            }),
        }
    }
}
