//! Recognition pipeline: capture → detect → identify → resolve → label.
//!
//! One run at a time. Each run owns the labels it creates and always leaves
//! them in a terminal state; stage failures become label text instead of
//! propagating to the host.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{Config, LabelMode, LabelTexts, PipelineConfig};
use crate::error::{FailureReason, PipelineError};
use crate::face::{
    DetectedFace, FaceApiClient, FaceDetector, FaceIdentifier, IdentifiedFace, PersonResolver,
    ResolvedPerson,
};
use crate::label::{Label, LabelSink, LabelStatus, Point3};
use crate::source::ImageSource;

/// Coordinator state. Capture counts as part of detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Detecting,
    Identifying,
    Resolving,
}

/// Terminal result for one label.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelOutcome {
    Resolved(ResolvedPerson),
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct LabelReport {
    pub label: Label,
    pub outcome: LabelOutcome,
}

/// Labels produced by a finished run, in creation order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub labels: Vec<LabelReport>,
}

impl RunReport {
    /// The label placed when the run started.
    pub fn primary(&self) -> Option<&LabelReport> {
        self.labels.first()
    }

    pub fn resolved_names(&self) -> Vec<&str> {
        self.labels
            .iter()
            .filter_map(|r| match &r.outcome {
                LabelOutcome::Resolved(person) => Some(person.display_name.as_str()),
                LabelOutcome::Failed(_) => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !self.labels.is_empty()
            && self
                .labels
                .iter()
                .all(|r| matches!(r.outcome, LabelOutcome::Resolved(_)))
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Another run was still in progress; nothing was placed.
    Busy,
    Finished(RunReport),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Busy => None,
            RunOutcome::Finished(report) => Some(report),
        }
    }
}

pub struct RecognitionPipeline {
    detector: Arc<dyn FaceDetector>,
    identifier: Arc<dyn FaceIdentifier>,
    resolver: Arc<dyn PersonResolver>,
    sink: Arc<dyn LabelSink>,
    config: PipelineConfig,
    texts: LabelTexts,
    state: Mutex<PipelineState>,
}

impl RecognitionPipeline {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        identifier: Arc<dyn FaceIdentifier>,
        resolver: Arc<dyn PersonResolver>,
        sink: Arc<dyn LabelSink>,
    ) -> Self {
        Self {
            detector,
            identifier,
            resolver,
            sink,
            config: PipelineConfig::default(),
            texts: LabelTexts::default(),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// Wire all three stages to one service client.
    pub fn from_config(client: FaceApiClient, sink: Arc<dyn LabelSink>, config: &Config) -> Self {
        let client = Arc::new(client);
        Self::new(client.clone(), client.clone(), client, sink)
            .with_config(config.pipeline.clone())
            .with_texts(config.labels.clone())
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_texts(mut self, texts: LabelTexts) -> Self {
        self.texts = texts;
        self
    }

    pub fn state(&self) -> PipelineState {
        *lock_state(&self.state)
    }

    pub fn is_idle(&self) -> bool {
        self.state() == PipelineState::Idle
    }

    /// Run the pipeline for one capture event.
    ///
    /// Returns [`RunOutcome::Busy`] without touching the source or the sink if a
    /// previous run has not returned to idle yet.
    pub async fn run(&self, source: &dyn ImageSource, anchor: Point3) -> RunOutcome {
        let Some(guard) = self.try_begin() else {
            tracing::warn!("Capture ignored, previous recognition still running");
            return RunOutcome::Busy;
        };

        let handle = self.sink.create_label(anchor);
        let label = Label::pending(handle, anchor, self.texts.pending_text.as_str());
        self.sink.set_text(handle, &label.text);

        let faces = match self.capture_and_detect(source).await {
            Ok(faces) => faces,
            Err(e) => return finished(vec![self.fail(label, e.into())]),
        };

        if faces.is_empty() {
            tracing::info!("No faces detected");
            return finished(vec![self.fail(label, FailureReason::NoFacesDetected)]);
        }

        guard.enter(PipelineState::Identifying);
        let labels = self.identify_and_resolve(&guard, label, faces).await;

        // Let the placed labels settle before the next capture
        guard.enter(PipelineState::Identifying);
        let cooldown = self.config.cooldown();
        if !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }

        drop(guard);
        finished(labels)
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = lock_state(&self.state);
        if *state != PipelineState::Idle {
            return None;
        }
        *state = PipelineState::Detecting;
        Some(RunGuard { state: &self.state })
    }

    async fn capture_and_detect(
        &self,
        source: &dyn ImageSource,
    ) -> Result<Vec<DetectedFace>, PipelineError> {
        let image = source.capture_image().await?;
        tracing::info!(bytes = image.len(), "Detecting faces");

        let faces = self.detector.detect(&image).await?;
        tracing::info!(count = faces.len(), "Detection finished");
        Ok(faces)
    }

    async fn identify_and_resolve(
        &self,
        guard: &RunGuard<'_>,
        label: Label,
        faces: Vec<DetectedFace>,
    ) -> Vec<LabelReport> {
        let face_ids: Vec<String> = faces.into_iter().map(|f| f.face_id).collect();
        tracing::info!(count = face_ids.len(), "Identifying faces");

        let identified = match self.identifier.identify(&face_ids).await {
            Ok(identified) => identified,
            Err(e) => return vec![self.fail(label, e.into())],
        };

        for face in &identified {
            match &face.best {
                Some(c) => tracing::info!(
                    face_id = %face.face_id,
                    person_id = %c.person_id,
                    confidence = c.confidence,
                    "Candidate found"
                ),
                None => tracing::info!(face_id = %face.face_id, "No candidate for face"),
            }
        }

        let fallback_face = face_ids.first().cloned().unwrap_or_default();
        match self.config.label_mode {
            LabelMode::Single => {
                vec![self.resolve_first(guard, label, identified, fallback_face).await]
            }
            LabelMode::PerFace => self.resolve_each(guard, label, identified, fallback_face).await,
        }
    }

    /// Resolve the first face that has a candidate into the single label.
    async fn resolve_first(
        &self,
        guard: &RunGuard<'_>,
        label: Label,
        identified: Vec<IdentifiedFace>,
        fallback_face: String,
    ) -> LabelReport {
        let unresolved_face = identified
            .first()
            .map(|f| f.face_id.clone())
            .unwrap_or(fallback_face);

        match identified.into_iter().find_map(|f| f.best) {
            Some(candidate) => {
                guard.enter(PipelineState::Resolving);
                self.resolve_into(label, &candidate.person_id).await
            }
            None => self.fail(
                label,
                FailureReason::PersonNotRegistered {
                    face_id: unresolved_face,
                },
            ),
        }
    }

    /// One label per identified face; resolutions run concurrently.
    async fn resolve_each(
        &self,
        guard: &RunGuard<'_>,
        label: Label,
        identified: Vec<IdentifiedFace>,
        fallback_face: String,
    ) -> Vec<LabelReport> {
        if identified.is_empty() {
            return vec![self.fail(
                label,
                FailureReason::PersonNotRegistered {
                    face_id: fallback_face,
                },
            )];
        }

        let anchor = label.anchor;
        let mut first = Some(label);
        let mut unregistered = Vec::new();
        let mut pending = Vec::new();

        for face in identified {
            let label = first.take().unwrap_or_else(|| {
                let handle = self.sink.create_label(anchor);
                self.sink.set_text(handle, &self.texts.pending_text);
                Label::pending(handle, anchor, self.texts.pending_text.as_str())
            });

            match face.best {
                Some(candidate) => pending.push((label, candidate.person_id)),
                None => unregistered.push((label, face.face_id)),
            }
        }

        if !pending.is_empty() {
            guard.enter(PipelineState::Resolving);
        }

        let resolutions = futures::future::join_all(
            pending
                .iter()
                .map(|(label, person_id)| self.resolve_into(label.clone(), person_id)),
        )
        .await;

        let mut reports: Vec<LabelReport> = unregistered
            .into_iter()
            .map(|(label, face_id)| {
                self.fail(label, FailureReason::PersonNotRegistered { face_id })
            })
            .chain(resolutions)
            .collect();
        reports.sort_by_key(|r| r.label.handle.0);
        reports
    }

    async fn resolve_into(&self, mut label: Label, person_id: &str) -> LabelReport {
        tracing::info!(person_id, "Resolving person");

        match self.resolver.resolve(person_id).await {
            Ok(person) => {
                label.text = self.texts.resolved(&person.display_name);
                label.status = LabelStatus::Resolved;
                self.sink.set_text(label.handle, &label.text);
                self.sink.release(label.handle);
                tracing::info!(person_id, name = %person.display_name, "Person resolved");

                LabelReport {
                    label,
                    outcome: LabelOutcome::Resolved(person),
                }
            }
            Err(e) => self.fail(label, e.into()),
        }
    }

    fn fail(&self, mut label: Label, reason: FailureReason) -> LabelReport {
        label.text = if reason.is_not_registered() {
            self.texts.not_registered_text.clone()
        } else {
            self.texts.guidance_text.clone()
        };
        label.status = LabelStatus::Failed;
        self.sink.set_text(label.handle, &label.text);
        self.sink.release(label.handle);
        tracing::warn!(label = label.handle.0, reason = %reason, "Recognition failed");

        LabelReport {
            label,
            outcome: LabelOutcome::Failed(reason),
        }
    }
}

fn finished(labels: Vec<LabelReport>) -> RunOutcome {
    RunOutcome::Finished(RunReport { labels })
}

fn lock_state(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Marks the pipeline busy; returns it to idle when dropped, even if the run future is.
struct RunGuard<'a> {
    state: &'a Mutex<PipelineState>,
}

impl RunGuard<'_> {
    fn enter(&self, next: PipelineState) {
        let mut state = lock_state(self.state);
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "Pipeline transition");
            *state = next;
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock_state(self.state) = PipelineState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Candidate;
    use crate::label::LabelHandle;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct StaticSource(Result<Vec<u8>, PipelineError>);

    #[async_trait]
    impl ImageSource for StaticSource {
        async fn capture_image(&self) -> Result<Vec<u8>, PipelineError> {
            self.0.clone()
        }
    }

    fn image() -> StaticSource {
        StaticSource(Ok(vec![0xFF, 0xD8, 0xFF]))
    }

    #[derive(Default)]
    struct Calls {
        detect: usize,
        identify: Vec<Vec<String>>,
        resolve: Vec<String>,
    }

    struct FakeService {
        faces: Result<Vec<DetectedFace>, PipelineError>,
        candidates: Result<Vec<IdentifiedFace>, PipelineError>,
        people: HashMap<String, String>,
        calls: Mutex<Calls>,
    }

    impl FakeService {
        fn new(face_ids: &[&str]) -> Self {
            Self {
                faces: Ok(face_ids
                    .iter()
                    .map(|id| DetectedFace {
                        face_id: id.to_string(),
                    })
                    .collect()),
                candidates: Ok(Vec::new()),
                people: HashMap::new(),
                calls: Mutex::new(Calls::default()),
            }
        }

        fn with_match(mut self, face_id: &str, person: Option<(&str, &str)>) -> Self {
            let best = person.map(|(person_id, name)| {
                self.people.insert(person_id.to_string(), name.to_string());
                Candidate {
                    face_id: face_id.to_string(),
                    person_id: person_id.to_string(),
                    confidence: 0.8,
                }
            });
            if let Ok(list) = self.candidates.as_mut() {
                list.push(IdentifiedFace {
                    face_id: face_id.to_string(),
                    best,
                });
            }
            self
        }

        fn calls(&self) -> MutexGuard<'_, Calls> {
            self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl FaceDetector for FakeService {
        async fn detect(&self, _image: &[u8]) -> Result<Vec<DetectedFace>, PipelineError> {
            self.calls().detect += 1;
            self.faces.clone()
        }
    }

    #[async_trait]
    impl FaceIdentifier for FakeService {
        async fn identify(&self, face_ids: &[String]) -> Result<Vec<IdentifiedFace>, PipelineError> {
            self.calls().identify.push(face_ids.to_vec());
            self.candidates.clone()
        }
    }

    #[async_trait]
    impl PersonResolver for FakeService {
        async fn resolve(&self, person_id: &str) -> Result<ResolvedPerson, PipelineError> {
            self.calls().resolve.push(person_id.to_string());
            self.people
                .get(person_id)
                .map(|name| ResolvedPerson {
                    person_id: person_id.to_string(),
                    display_name: name.clone(),
                })
                .ok_or_else(|| PipelineError::ResolutionFailed("HTTP 404".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        created: Mutex<Vec<LabelHandle>>,
        texts: Mutex<Vec<(LabelHandle, String)>>,
        released: Mutex<Vec<LabelHandle>>,
    }

    impl RecordingSink {
        fn texts_for(&self, handle: LabelHandle) -> Vec<String> {
            self.texts
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| *h == handle)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    impl LabelSink for RecordingSink {
        fn create_label(&self, _anchor: Point3) -> LabelHandle {
            let handle = LabelHandle::new();
            self.created.lock().unwrap().push(handle);
            handle
        }

        fn set_text(&self, handle: LabelHandle, text: &str) {
            self.texts.lock().unwrap().push((handle, text.to_string()));
        }

        fn release(&self, handle: LabelHandle) {
            self.released.lock().unwrap().push(handle);
        }
    }

    fn pipeline(service: &Arc<FakeService>, sink: &Arc<RecordingSink>) -> RecognitionPipeline {
        RecognitionPipeline::new(service.clone(), service.clone(), service.clone(), sink.clone())
            .with_config(PipelineConfig {
                cooldown_secs: 0,
                label_mode: LabelMode::Single,
            })
    }

    fn single_report(outcome: RunOutcome) -> LabelReport {
        let report = outcome.report().cloned().expect("run should finish");
        assert_eq!(report.labels.len(), 1);
        report.labels.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_resolves_name_onto_label() {
        let service = Arc::new(FakeService::new(&["f1"]).with_match("f1", Some(("p9", "Alice"))));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(&service, &sink);

        let report = single_report(pipeline.run(&image(), Point3::default()).await);

        assert_eq!(report.label.text, "This is Alice");
        assert_eq!(report.label.status, LabelStatus::Resolved);
        assert_eq!(
            sink.texts_for(report.label.handle),
            vec!["Analysing...", "This is Alice"]
        );
        assert_eq!(*sink.released.lock().unwrap(), vec![report.label.handle]);
        assert_eq!(service.calls().resolve, vec!["p9"]);
        assert!(pipeline.is_idle());
    }

    #[tokio::test]
    async fn test_identify_gets_all_detected_ids_in_one_call() {
        let service = Arc::new(
            FakeService::new(&["f1", "f2", "f3"]).with_match("f1", Some(("p1", "Bob"))),
        );
        let sink = Arc::new(RecordingSink::default());

        pipeline(&service, &sink).run(&image(), Point3::default()).await;

        assert_eq!(service.calls().identify, vec![vec!["f1", "f2", "f3"]]);
    }

    #[tokio::test]
    async fn test_no_faces_skips_identify_and_resolve() {
        let service = Arc::new(FakeService::new(&[]));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(&service, &sink);

        let report = single_report(pipeline.run(&image(), Point3::default()).await);

        assert_eq!(report.outcome, LabelOutcome::Failed(FailureReason::NoFacesDetected));
        assert_eq!(report.label.status, LabelStatus::Failed);
        assert!(service.calls().identify.is_empty());
        assert!(service.calls().resolve.is_empty());
        assert!(pipeline.is_idle());
    }

    #[tokio::test]
    async fn test_detection_failure_shows_guidance() {
        let mut service = FakeService::new(&[]);
        service.faces = Err(PipelineError::DetectionFailed("timed out".to_string()));
        let service = Arc::new(service);
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(&service, &sink);

        let report = single_report(pipeline.run(&image(), Point3::default()).await);

        assert_eq!(report.label.status, LabelStatus::Failed);
        assert_eq!(report.label.text, LabelTexts::default().guidance_text);
        assert!(matches!(
            report.outcome,
            LabelOutcome::Failed(FailureReason::Stage(PipelineError::DetectionFailed(_)))
        ));
        assert!(service.calls().identify.is_empty());
        assert!(service.calls().resolve.is_empty());
        assert!(pipeline.is_idle());
    }

    #[tokio::test]
    async fn test_capture_failure_skips_detection() {
        let service = Arc::new(FakeService::new(&["f1"]));
        let sink = Arc::new(RecordingSink::default());
        let source = StaticSource(Err(PipelineError::CaptureFailed("no camera".to_string())));

        let report = single_report(pipeline(&service, &sink).run(&source, Point3::default()).await);

        assert_eq!(report.label.text, LabelTexts::default().guidance_text);
        assert_eq!(service.calls().detect, 0);
    }

    #[tokio::test]
    async fn test_empty_candidates_shows_not_registered() {
        let service = Arc::new(FakeService::new(&["f1"]).with_match("f1", None));
        let sink = Arc::new(RecordingSink::default());

        let report = single_report(pipeline(&service, &sink).run(&image(), Point3::default()).await);

        assert_eq!(report.label.text, LabelTexts::default().not_registered_text);
        assert_eq!(
            report.outcome,
            LabelOutcome::Failed(FailureReason::PersonNotRegistered {
                face_id: "f1".to_string()
            })
        );
        assert!(service.calls().resolve.is_empty());
    }

    #[tokio::test]
    async fn test_identification_failure_does_not_resolve() {
        let mut service = FakeService::new(&["f1"]);
        service.candidates = Err(PipelineError::IdentificationFailed("HTTP 500".to_string()));
        let service = Arc::new(service);
        let sink = Arc::new(RecordingSink::default());

        let report = single_report(pipeline(&service, &sink).run(&image(), Point3::default()).await);

        assert_eq!(
            report.label.text,
            "Please focus on a person and make the confirming gesture"
        );
        assert!(service.calls().resolve.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_marks_label_failed() {
        let mut service = FakeService::new(&["f1"]).with_match("f1", Some(("p9", "Alice")));
        service.people.clear();
        let service = Arc::new(service);
        let sink = Arc::new(RecordingSink::default());

        let report = single_report(pipeline(&service, &sink).run(&image(), Point3::default()).await);

        assert_eq!(report.label.status, LabelStatus::Failed);
        assert_eq!(report.label.text, LabelTexts::default().guidance_text);
        assert!(matches!(
            report.outcome,
            LabelOutcome::Failed(FailureReason::Stage(PipelineError::ResolutionFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_single_mode_uses_first_face_with_candidate() {
        let service = Arc::new(
            FakeService::new(&["f1", "f2"])
                .with_match("f1", None)
                .with_match("f2", Some(("p2", "Carol"))),
        );
        let sink = Arc::new(RecordingSink::default());

        let report = single_report(pipeline(&service, &sink).run(&image(), Point3::default()).await);

        assert_eq!(report.label.text, "This is Carol");
        assert_eq!(service.calls().resolve, vec!["p2"]);
        assert_eq!(sink.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_per_face_mode_labels_each_face() {
        let service = Arc::new(
            FakeService::new(&["f1", "f2", "f3"])
                .with_match("f1", Some(("p1", "Alice")))
                .with_match("f2", None)
                .with_match("f3", Some(("p3", "Dave"))),
        );
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(&service, &sink).with_config(PipelineConfig {
            cooldown_secs: 0,
            label_mode: LabelMode::PerFace,
        });

        let outcome = pipeline.run(&image(), Point3::new(1.0, 2.0, 3.0)).await;
        let report = outcome.report().unwrap();

        let texts: Vec<&str> = report.labels.iter().map(|r| r.label.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "This is Alice",
                "Person not recognized; ensure this person is registered",
                "This is Dave"
            ]
        );
        assert_eq!(report.resolved_names(), vec!["Alice", "Dave"]);
        assert!(!report.is_success());
        assert_eq!(sink.created.lock().unwrap().len(), 3);
        assert!(report
            .labels
            .iter()
            .all(|r| r.label.anchor == Point3::new(1.0, 2.0, 3.0)));
        for r in &report.labels {
            assert_eq!(sink.texts_for(r.label.handle).last(), Some(&r.label.text));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_until_cooldown_elapses() {
        let service = Arc::new(FakeService::new(&["f1"]).with_match("f1", Some(("p9", "Alice"))));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = Arc::new(pipeline(&service, &sink).with_config(PipelineConfig {
            cooldown_secs: 3,
            label_mode: LabelMode::Single,
        }));

        let start = tokio::time::Instant::now();
        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(&image(), Point3::default()).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pipeline.state(), PipelineState::Identifying);
        assert!(matches!(
            pipeline.run(&image(), Point3::default()).await,
            RunOutcome::Busy
        ));

        let outcome = first.await.unwrap();
        assert!(outcome.report().unwrap().is_success());
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(pipeline.is_idle());

        let again = pipeline.run(&image(), Point3::default()).await;
        assert!(again.report().is_some());
        assert_eq!(service.calls().detect, 2);
    }

    struct SlowSource;

    #[async_trait]
    impl ImageSource for SlowSource {
        async fn capture_image(&self) -> Result<Vec<u8>, PipelineError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_run_returns_to_idle() {
        let service = Arc::new(FakeService::new(&["f1"]).with_match("f1", Some(("p9", "Alice"))));
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(&service, &sink);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.run(&SlowSource, Point3::default()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(pipeline.is_idle());
        assert_eq!(service.calls().detect, 0);

        let outcome = pipeline.run(&image(), Point3::default()).await;
        assert!(matches!(outcome, RunOutcome::Finished(_)));
        assert!(outcome.report().unwrap().is_success());
    }
}
