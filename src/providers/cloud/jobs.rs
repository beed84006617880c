//! Hosted prediction jobs (Replicate-style HTTP API).
//!
//! A job is two phases: submit the prediction, then poll it until it reaches a
//! terminal state. Both phases block the calling thread, so callers on an async
//! runtime must hand [`JobRunner::run`] to a blocking worker.

use crate::error::{ProviderError, Result};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const BACKEND: &str = "replicate";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a hosted model to completion and returns its raw output.
#[cfg_attr(test, mockall::automock)]
pub trait JobRunner: Send + Sync {
    fn run(&self, model: &str, input: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionUrls {
    pub get: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: PredictionUrls,
}

pub struct HostedJobClient {
    api_base: String,
    token: String,
    poll_interval: Duration,
    job_timeout: Duration,
    // Built on first use so that it is created on the worker thread.
    http: OnceLock<Client>,
}

impl HostedJobClient {
    pub fn new(
        api_base: &str,
        token: String,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            poll_interval,
            job_timeout,
            http: OnceLock::new(),
        }
    }

    fn http(&self) -> Result<&Client> {
        if let Some(client) = self.http.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(self.http.get_or_init(|| client))
    }

    fn parse(endpoint: &str, response: Response) -> Result<Prediction> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .map_err(|e| ProviderError::transport(endpoint, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::upstream(BACKEND, format!("malformed prediction: {}", e)))
    }

    /// Phase one: create the prediction.
    ///
    /// `owner/name` runs the model's latest version; `owner/name:version` pins one.
    pub fn submit(&self, model: &str, input: &Value) -> Result<Prediction> {
        let (endpoint, body) = match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({"version": version, "input": input}),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({"input": input}),
            ),
        };

        let response = self
            .http()?
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .map_err(|e| ProviderError::transport(&endpoint, e))?;
        let prediction = Self::parse(&endpoint, response)?;
        info!(model, id = %prediction.id, "Submitted hosted prediction");
        Ok(prediction)
    }

    /// Phase two: poll until the prediction finishes or the job timeout elapses.
    pub fn wait(&self, mut prediction: Prediction) -> Result<Prediction> {
        let deadline = Instant::now() + self.job_timeout;
        let endpoint = prediction
            .urls
            .get
            .clone()
            .unwrap_or_else(|| format!("{}/predictions/{}", self.api_base, prediction.id));

        while !prediction.status.is_terminal() {
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout {
                    what: format!("prediction {}", prediction.id),
                    secs: self.job_timeout.as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval);

            let response = self
                .http()?
                .get(&endpoint)
                .bearer_auth(&self.token)
                .send()
                .map_err(|e| ProviderError::transport(&endpoint, e))?;
            prediction = Self::parse(&endpoint, response)?;
            debug!(id = %prediction.id, status = ?prediction.status, "Polled prediction");
        }

        Ok(prediction)
    }
}

impl JobRunner for HostedJobClient {
    fn run(&self, model: &str, input: &Value) -> Result<Value> {
        let started = Instant::now();
        let prediction = self.wait(self.submit(model, input)?)?;
        match prediction.status {
            PredictionStatus::Succeeded => {
                info!(id = %prediction.id, elapsed = ?started.elapsed(), "Prediction finished");
                Ok(prediction.output)
            }
            PredictionStatus::Canceled => Err(ProviderError::upstream(
                BACKEND,
                format!("prediction {} was canceled", prediction.id),
            )),
            _ => {
                let reason = match prediction.error {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => "no error detail".to_string(),
                };
                Err(ProviderError::upstream(
                    BACKEND,
                    format!("prediction {} failed: {}", prediction.id, reason),
                ))
            }
        }
    }
}
