//! Labels captured faces with names from a cloud face-recognition service.
//!
//! A capture flows through three service calls (detect, identify, person
//! lookup) and ends as text on a label anchored in the scene. Image
//! acquisition and label rendering are supplied by the host through
//! [`ImageSource`] and [`LabelSink`].

pub mod config;
pub mod error;
pub mod face;
pub mod label;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod state;

pub use config::Config;
pub use error::{FailureReason, PipelineError};
pub use face::FaceApiClient;
pub use label::{ConsoleLabelSink, Label, LabelHandle, LabelSink, LabelStatus, Point3};
pub use pipeline::{LabelOutcome, PipelineState, RecognitionPipeline, RunOutcome, RunReport};
pub use source::{FileImageSource, ImageSource};
pub use state::{ApplicationState, SharedApplicationState};
