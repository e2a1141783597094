use async_trait::async_trait;

use super::model::{DetectedFace, IdentifiedFace, ResolvedPerson};
use crate::error::PipelineError;

/// Finds faces in a still image.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detect faces, preserving the service's order. Single attempt.
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedFace>, PipelineError>;
}

/// Matches detected faces against the person group.
#[async_trait]
pub trait FaceIdentifier: Send + Sync {
    /// Identify all faces in one batched call.
    ///
    /// Returns an empty list without touching the network when `face_ids` is empty.
    async fn identify(&self, face_ids: &[String]) -> Result<Vec<IdentifiedFace>, PipelineError>;
}

/// Looks up the display name of a person in the group.
#[async_trait]
pub trait PersonResolver: Send + Sync {
    async fn resolve(&self, person_id: &str) -> Result<ResolvedPerson, PipelineError>;
}
