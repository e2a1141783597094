use async_trait::async_trait;
use std::time::Duration;

use super::model::{
    ApiErrorBody, DetectedFace, FaceCandidates, IdentificationRequest, IdentifiedFace,
    ResolvedPerson,
};
use super::service::{FaceDetector, FaceIdentifier, PersonResolver};
use crate::config::ServiceConfig;
use crate::error::PipelineError;

/// Header carrying the service subscription key
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Client for the cloud face-recognition service.
///
/// `ureq` is blocking, so each call runs on tokio's blocking pool.
#[derive(Clone)]
pub struct FaceApiClient {
    agent: ureq::Agent,
    endpoint: String,
    subscription_key: String,
    person_group_id: String,
    max_candidates: u32,
    confidence_threshold: f64,
}

/// How a failed call should be reported for the stage that made it.
enum CallError {
    Http(String),
    Parse(String),
}

impl FaceApiClient {
    pub fn new(endpoint: &str, subscription_key: &str, person_group_id: &str) -> Self {
        Self {
            agent: build_agent(Duration::from_secs(30)),
            endpoint: normalize_endpoint(endpoint),
            subscription_key: subscription_key.to_string(),
            person_group_id: person_group_id.to_string(),
            max_candidates: 1,
            confidence_threshold: 0.5,
        }
    }

    /// Create a client from configuration; fails when no subscription key is available.
    pub fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let key = config.resolved_subscription_key().ok_or_else(|| {
            anyhow::anyhow!(
                "No subscription key configured (set service.subscription_key or {})",
                crate::config::SUBSCRIPTION_KEY_ENV
            )
        })?;

        Ok(Self::new(&config.endpoint, &key, &config.person_group_id)
            .with_timeout(config.timeout())
            .with_candidate_policy(config.max_candidates, config.confidence_threshold))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    pub fn with_candidate_policy(mut self, max_candidates: u32, confidence_threshold: f64) -> Self {
        self.max_candidates = max_candidates;
        self.confidence_threshold = confidence_threshold;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn person_group_id(&self) -> &str {
        &self.person_group_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Build the identify body for a batch of face ids.
    pub fn identification_request(&self, face_ids: &[String]) -> IdentificationRequest {
        IdentificationRequest::new(
            &self.person_group_id,
            face_ids.iter().cloned(),
            self.max_candidates,
            self.confidence_threshold,
        )
    }

    fn post_image(&self, image: Vec<u8>) -> Result<Vec<DetectedFace>, CallError> {
        let response = self
            .agent
            .post(&self.url("detect"))
            .set(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&image)
            .map_err(describe_ureq_error)?;

        let body = response
            .into_string()
            .map_err(|e| CallError::Http(format!("failed to read response body: {}", e)))?;
        tracing::debug!(response = %body, "Detect response");

        serde_json::from_str(&body).map_err(|e| CallError::Parse(e.to_string()))
    }

    fn post_identify(&self, request: IdentificationRequest) -> Result<Vec<IdentifiedFace>, CallError> {
        let response = self
            .agent
            .post(&self.url("identify"))
            .set(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .send_json(&request)
            .map_err(describe_ureq_error)?;

        let body = response
            .into_string()
            .map_err(|e| CallError::Http(format!("failed to read response body: {}", e)))?;
        tracing::debug!(response = %body, "Identify response");

        let entries: Vec<FaceCandidates> =
            serde_json::from_str(&body).map_err(|e| CallError::Parse(e.to_string()))?;
        Ok(entries.into_iter().map(IdentifiedFace::from).collect())
    }

    /// Ids are opaque to us; each one is escaped as a single path segment.
    fn person_path(&self, person_id: &str) -> String {
        format!(
            "persongroups/{}/persons/{}",
            urlencoding::encode(&self.person_group_id),
            urlencoding::encode(person_id)
        )
    }

    fn get_person(&self, person_id: &str) -> Result<ResolvedPerson, CallError> {
        let response = self
            .agent
            .get(&self.url(&self.person_path(person_id)))
            .set(SUBSCRIPTION_KEY_HEADER, &self.subscription_key)
            .call()
            .map_err(describe_ureq_error)?;

        let body = response
            .into_string()
            .map_err(|e| CallError::Http(format!("failed to read response body: {}", e)))?;
        tracing::debug!(response = %body, "Get person response");

        serde_json::from_str(&body).map_err(|e| CallError::Parse(e.to_string()))
    }
}

#[async_trait]
impl FaceDetector for FaceApiClient {
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>, PipelineError> {
        if image.is_empty() {
            return Err(PipelineError::DetectionFailed("image buffer is empty".to_string()));
        }

        let client = self.clone();
        let image = image.to_vec();
        let result = tokio::task::spawn_blocking(move || client.post_image(image))
            .await
            .map_err(|e| PipelineError::DetectionFailed(e.to_string()))?;

        let faces = result.map_err(|e| match e {
            CallError::Http(msg) => PipelineError::DetectionFailed(msg),
            CallError::Parse(msg) => PipelineError::DetectionParseError(msg),
        })?;

        for face in &faces {
            tracing::debug!(face_id = %face.face_id, "Detected face");
        }
        Ok(faces)
    }
}

#[async_trait]
impl FaceIdentifier for FaceApiClient {
    async fn identify(&self, face_ids: &[String]) -> Result<Vec<IdentifiedFace>, PipelineError> {
        let request = self.identification_request(face_ids);
        if request.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        tokio::task::spawn_blocking(move || client.post_identify(request))
            .await
            .map_err(|e| PipelineError::IdentificationFailed(e.to_string()))?
            .map_err(|e| match e {
                CallError::Http(msg) => PipelineError::IdentificationFailed(msg),
                CallError::Parse(msg) => PipelineError::IdentificationFailed(format!(
                    "failed to parse identify response: {}",
                    msg
                )),
            })
    }
}

#[async_trait]
impl PersonResolver for FaceApiClient {
    async fn resolve(&self, person_id: &str) -> Result<ResolvedPerson, PipelineError> {
        let client = self.clone();
        let person_id = person_id.to_string();
        tokio::task::spawn_blocking(move || client.get_person(&person_id))
            .await
            .map_err(|e| PipelineError::ResolutionFailed(e.to_string()))?
            .map_err(|e| match e {
                CallError::Http(msg) => PipelineError::ResolutionFailed(msg),
                CallError::Parse(msg) => PipelineError::ResolutionFailed(format!(
                    "failed to parse person response: {}",
                    msg
                )),
            })
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// Paths are appended directly to the endpoint, so it must end with a slash.
fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn describe_ureq_error(err: ureq::Error) -> CallError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| format!("{}: {}", b.error.code, b.error.message))
                .unwrap_or(body);
            CallError::Http(format!("service returned HTTP {} ({})", code, detail))
        }
        ureq::Error::Transport(transport) => CallError::Http(transport.to_string()),
    }
}
