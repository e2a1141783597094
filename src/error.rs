use thiserror::Error;

/// A stage-level failure that ends a pipeline run.
///
/// Every variant is caught by the coordinator and turned into label text;
/// none of them reach the host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("image capture failed: {0}")]
    CaptureFailed(String),

    #[error("face detection request failed: {0}")]
    DetectionFailed(String),

    #[error("failed to parse face detection response: {0}")]
    DetectionParseError(String),

    #[error("face identification failed: {0}")]
    IdentificationFailed(String),

    #[error("person lookup failed: {0}")]
    ResolutionFailed(String),
}

/// Why a label ended up in the failed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A stage failed outright.
    Stage(PipelineError),
    /// Detection succeeded but found nobody.
    NoFacesDetected,
    /// The face was identified against the group but had no candidate above the threshold.
    PersonNotRegistered { face_id: String },
}

impl FailureReason {
    /// Business non-matches are distinct from service failures.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, FailureReason::PersonNotRegistered { .. })
    }
}

impl From<PipelineError> for FailureReason {
    fn from(err: PipelineError) -> Self {
        FailureReason::Stage(err)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Stage(err) => write!(f, "{}", err),
            FailureReason::NoFacesDetected => write!(f, "no faces detected"),
            FailureReason::PersonNotRegistered { face_id } => {
                write!(f, "face {} has no registered candidate", face_id)
            }
        }
    }
}
