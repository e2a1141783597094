//! Labels anchored in the scene, and the sink that displays them.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

/// Position in scene space where a label is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for Point3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

impl std::str::FromStr for Point3 {
    type Err = String;

    /// Parses `x,y,z`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(format!("expected x,y,z but got '{}'", s));
        }
        let coord = |p: &str| {
            p.parse::<f32>()
                .map_err(|e| format!("invalid coordinate '{}': {}", p, e))
        };
        Ok(Self::new(coord(parts[0])?, coord(parts[1])?, coord(parts[2])?))
    }
}

/// Identifies one label created through a [`LabelSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelHandle(pub u64);

impl LabelHandle {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        LabelHandle(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for LabelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStatus {
    Pending,
    Resolved,
    Failed,
}

/// Text annotation near an analysed face.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub handle: LabelHandle,
    pub anchor: Point3,
    pub text: String,
    pub status: LabelStatus,
}

impl Label {
    pub fn pending(handle: LabelHandle, anchor: Point3, text: impl Into<String>) -> Self {
        Self {
            handle,
            anchor,
            text: text.into(),
            status: LabelStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != LabelStatus::Pending
    }
}

/// Places labels and updates their text. Implemented by the rendering host.
pub trait LabelSink: Send + Sync {
    fn create_label(&self, anchor: Point3) -> LabelHandle;

    fn set_text(&self, handle: LabelHandle, text: &str);

    /// Called once a label holds its final text. Sinks that track per-label
    /// state drop it here.
    fn release(&self, _handle: LabelHandle) {}
}

/// Writes label updates as lines of text, one per change.
///
/// The anchor of a label is kept until its text is set for the last time
/// (see [`LabelSink::release`]).
pub struct ConsoleLabelSink<W: Write + Send> {
    out: Mutex<W>,
    anchors: Mutex<HashMap<LabelHandle, Point3>>,
}

impl ConsoleLabelSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleLabelSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            anchors: Mutex::new(HashMap::new()),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "Failed to write label update");
        }
    }
}

impl<W: Write + Send> LabelSink for ConsoleLabelSink<W> {
    fn create_label(&self, anchor: Point3) -> LabelHandle {
        let handle = LabelHandle::new();
        self.anchors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, anchor);
        tracing::debug!(label = handle.0, %anchor, "Label placed");
        handle
    }

    fn set_text(&self, handle: LabelHandle, text: &str) {
        let anchor = self
            .anchors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .copied()
            .unwrap_or_default();
        tracing::debug!(label = handle.0, text, "Label updated");
        self.write_line(&format!("[label {} @ {}] {}", handle.0, anchor, text));
    }

    fn release(&self, handle: LabelHandle) {
        self.anchors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle);
    }
}

impl<W: Write + Send> ConsoleLabelSink<W> {
    /// Number of labels still waiting for their final text.
    pub fn open_labels(&self) -> usize {
        self.anchors.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
