use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Which UI mode the host is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ApplicationState {
    TipPanelState = 1,
    FaceRecognitionState = 2,
}

impl ApplicationState {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ApplicationState::FaceRecognitionState,
            _ => ApplicationState::TipPanelState,
        }
    }
}

/// Shared handle to the host's application state.
///
/// Cloned into whichever collaborators need to read it; the pipeline never writes it.
#[derive(Debug, Clone)]
pub struct SharedApplicationState(Arc<AtomicU8>);

impl SharedApplicationState {
    pub fn new(initial: ApplicationState) -> Self {
        Self(Arc::new(AtomicU8::new(initial as u8)))
    }

    pub fn get(&self) -> ApplicationState {
        ApplicationState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ApplicationState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn is_recognizing(&self) -> bool {
        self.get() == ApplicationState::FaceRecognitionState
    }
}

impl Default for SharedApplicationState {
    fn default() -> Self {
        Self::new(ApplicationState::TipPanelState)
    }
}
