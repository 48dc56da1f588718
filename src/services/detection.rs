use async_trait::async_trait;
use garde::Validate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::prediction::Prediction;

/// Object detection over an image reachable by URL.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Run one inference call. No internal retry: the caller owns retry policy.
    async fn detect(&self, image_url: &str, deadline: Duration)
        -> Result<Vec<Prediction>, DetectError>;
}

/// Client for the Roboflow Workflows inference API.
pub struct RoboflowClient {
    http: Client,
    base_url: String,
    api_key: String,
    workspace_id: String,
    workflow_id: String,
}

#[derive(Serialize)]
struct InferRequest<'a> {
    api_key: &'a str,
    inputs: InferInputs<'a>,
}

#[derive(Serialize)]
struct InferInputs<'a> {
    image: InferImage<'a>,
}

#[derive(Serialize)]
struct InferImage<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct InferResponse {
    outputs: Vec<InferOutput>,
}

#[derive(Deserialize)]
struct InferOutput {
    #[serde(default)]
    count_objects: Option<u32>,
    predictions: OutputPredictions,
}

#[derive(Deserialize)]
struct OutputPredictions {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

impl RoboflowClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        workspace_id: &str,
        workflow_id: &str,
    ) -> Result<Self, DetectError> {
        let http = Client::builder()
            .user_agent(concat!("vision-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(DetectError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            workspace_id: workspace_id.to_string(),
            workflow_id: workflow_id.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/infer/workflows/{}/{}",
            self.base_url, self.workspace_id, self.workflow_id
        )
    }
}

#[async_trait]
impl Detector for RoboflowClient {
    async fn detect(
        &self,
        image_url: &str,
        deadline: Duration,
    ) -> Result<Vec<Prediction>, DetectError> {
        let request = InferRequest {
            api_key: &self.api_key,
            inputs: InferInputs {
                image: InferImage {
                    kind: "url",
                    value: image_url,
                },
            },
        };

        let response = self
            .http
            .post(self.endpoint())
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(e, deadline))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(e, deadline))?;

        if !status.is_success() {
            return Err(classify_status(status, body));
        }

        let predictions = parse_predictions(&body)?;
        tracing::debug!(
            image_url = %image_url,
            predictions = predictions.len(),
            "Inference completed"
        );
        Ok(predictions)
    }
}

fn classify_transport(error: reqwest::Error, deadline: Duration) -> DetectError {
    if error.is_timeout() {
        DetectError::Timeout(deadline)
    } else {
        DetectError::Transport(error)
    }
}

fn classify_status(status: StatusCode, body: String) -> DetectError {
    if status.is_client_error() {
        DetectError::Rejected {
            status: status.as_u16(),
            body,
        }
    } else {
        DetectError::Unavailable {
            status: status.as_u16(),
            body,
        }
    }
}

/// Flatten all workflow outputs into one validated prediction list.
pub fn parse_predictions(body: &str) -> Result<Vec<Prediction>, DetectError> {
    let response: InferResponse = serde_json::from_str(body)
        .map_err(|e| DetectError::MalformedResponse(e.to_string()))?;

    let mut predictions = Vec::new();
    for output in response.outputs {
        if let Some(expected) = output.count_objects {
            if expected as usize != output.predictions.predictions.len() {
                tracing::warn!(
                    count_objects = expected,
                    received = output.predictions.predictions.len(),
                    "Output object count does not match its predictions"
                );
            }
        }
        predictions.extend(output.predictions.predictions);
    }

    for (index, prediction) in predictions.iter().enumerate() {
        prediction.validate().map_err(|e| {
            DetectError::MalformedResponse(format!("prediction {index} is invalid: {e}"))
        })?;
    }

    Ok(predictions)
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Detection call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("Detection service unavailable (status {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("Detection service rejected the request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed detection response: {0}")]
    MalformedResponse(String),
}

impl DetectError {
    /// Network faults, timeouts and 5xx responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DetectError::Transport(_) | DetectError::Timeout(_) | DetectError::Unavailable { .. }
        )
    }
}
