pub mod client;
pub mod model;
pub mod service;

pub use client::FaceApiClient;
pub use model::{
    Candidate, DetectedFace, IdentificationRequest, IdentifiedFace, ResolvedPerson,
};
pub use service::{FaceDetector, FaceIdentifier, PersonResolver};
