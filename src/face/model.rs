//! Wire and domain types for the face-recognition service.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A face found by the detect call. The id is only meaningful for the image it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "faceId")]
    pub face_id: String,
}

/// Body of the identify call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationRequest {
    pub person_group_id: String,
    pub face_ids: Vec<String>,
    pub max_num_of_candidates_returned: u32,
    pub confidence_threshold: f64,
}

impl IdentificationRequest {
    /// Build a request, dropping repeated face ids while keeping first-seen order.
    pub fn new<I, S>(
        person_group_id: &str,
        face_ids: I,
        max_candidates: u32,
        confidence_threshold: f64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let face_ids = face_ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();

        Self {
            person_group_id: person_group_id.to_string(),
            face_ids,
            max_num_of_candidates_returned: max_candidates,
            confidence_threshold,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.face_ids.is_empty()
    }
}

/// One element of the identify response array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceCandidates {
    pub face_id: String,
    #[serde(default)]
    pub candidates: Vec<CandidateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    pub person_id: String,
    pub confidence: f64,
}

/// A probabilistic match between a detected face and a known person.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub face_id: String,
    pub person_id: String,
    pub confidence: f64,
}

/// Identification result for one face: its best candidate, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedFace {
    pub face_id: String,
    pub best: Option<Candidate>,
}

impl IdentifiedFace {
    pub fn person_id(&self) -> Option<&str> {
        self.best.as_ref().map(|c| c.person_id.as_str())
    }
}

impl From<FaceCandidates> for IdentifiedFace {
    fn from(entry: FaceCandidates) -> Self {
        // The service ranks candidates; only the top one is used
        let best = entry.candidates.into_iter().next().map(|c| Candidate {
            face_id: entry.face_id.clone(),
            person_id: c.person_id,
            confidence: c.confidence,
        });

        Self {
            face_id: entry.face_id,
            best,
        }
    }
}

/// A person from the group, as returned by the person lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPerson {
    #[serde(rename = "personId")]
    pub person_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

/// Error envelope the service returns with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
