//! One reporter's intake session: pending capture buffers, the editable
//! form, and the single submit pathway into the local store.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::config::IntakeConfig;
use crate::event::IntakeEvent;
use crate::image_capture::{CapturedPhoto, ImageCapture, ImageError, SelectedFile};
use crate::location::{LocationError, LocationResolver};
use crate::model::{FormFields, IncidentRecord, IncidentType, Location, ReporterIdentity};
use crate::normalizer::{IncidentNormalizer, ValidationError};
use crate::speech::SpeechCaptureChannel;
use crate::store::{IncidentStore, StoreError};
use crate::sync::{SubmissionSync, SyncMetricsSnapshot};
use crate::voice_intent::{ExtractorState, VoiceIntentConfig, VoiceIntentExtractor};
use crate::{AppResult, EVENT_CHANNEL_CAPACITY};

/// Who is reporting, supplied by the host in place of a login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub reporter: ReporterIdentity,
}

impl SessionContext {
    #[must_use]
    pub fn new(reporter: ReporterIdentity) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            reporter,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Inputs the submit control waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Photo,
    Location,
}

#[derive(Debug, Default)]
struct PendingCapture {
    photo: Option<CapturedPhoto>,
    location: Option<Location>,
}

pub struct IntakeSession {
    context: SessionContext,
    store: Arc<IncidentStore>,
    sync: Arc<SubmissionSync>,
    normalizer: IncidentNormalizer,
    locator: LocationResolver,
    images: ImageCapture,
    speech: SpeechCaptureChannel,
    extractor: Arc<VoiceIntentExtractor>,
    form: Arc<Mutex<FormFields>>,
    pending: Mutex<PendingCapture>,
    events: broadcast::Sender<IntakeEvent>,
    sync_tasks: Mutex<JoinSet<()>>,
    watcher: JoinHandle<()>,
}

impl IntakeSession {
    /// Validates the config, loads the durable feed and starts the voice
    /// watcher. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(reporter = %context.reporter.name))]
    pub async fn new(
        config: &IntakeConfig,
        caps: Capabilities,
        context: SessionContext,
    ) -> AppResult<Self> {
        config.validate()?;

        let store = Arc::new(IncidentStore::open(Arc::clone(&caps.kv), &config.storage.slot).await?);
        let sync = Arc::new(SubmissionSync::new(
            Arc::clone(&caps.http),
            config.submission_url()?,
            config.submission_timeout(),
        ));
        let locator = LocationResolver::new(
            Arc::clone(&caps.geolocation),
            Arc::clone(&caps.http),
            config.geocoder_url()?,
            config.geocoding.user_agent.clone(),
            config.geocode_timeout(),
        );
        let extractor = Arc::new(VoiceIntentExtractor::new(
            Arc::clone(&caps.inference),
            VoiceIntentConfig {
                quiescence: config.quiescence(),
                min_transcript_chars: config.voice.min_transcript_chars,
            },
        ));

        let speech = SpeechCaptureChannel::new(caps.speech_supported);
        let form = Arc::new(Mutex::new(FormFields::default()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let watcher = extractor.spawn_watcher(speech.subscribe(), Arc::clone(&form), events.clone());

        info!(session_id = %context.session_id, "intake session started");

        Ok(Self {
            context,
            store,
            sync,
            normalizer: IncidentNormalizer::new(),
            locator,
            images: ImageCapture::new(config.image.max_bytes),
            speech,
            extractor,
            form,
            pending: Mutex::new(PendingCapture::default()),
            events,
            sync_tasks: Mutex::new(JoinSet::new()),
            watcher,
        })
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    #[must_use]
    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    /// The transcript channel the host's recognizer feeds.
    #[must_use]
    pub fn speech(&self) -> &SpeechCaptureChannel {
        &self.speech
    }

    #[must_use]
    pub fn extractor_state(&self) -> ExtractorState {
        self.extractor.state()
    }

    #[must_use]
    pub fn sync_metrics(&self) -> SyncMetricsSnapshot {
        self.sync.metrics()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IntakeEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Captures a fix and place name. A failure leaves any earlier
    /// location in place.
    pub async fn capture_location(&self) -> Result<Location, LocationError> {
        let location = self.locator.capture().await?;
        self.pending.lock().await.location = Some(location.clone());
        self.emit(IntakeEvent::LocationCaptured {
            area: location.area.clone(),
        });
        Ok(location)
    }

    /// Encodes and attaches a photo. A rejected file leaves any earlier
    /// photo in place.
    pub async fn attach_photo(&self, file: SelectedFile) -> Result<CapturedPhoto, ImageError> {
        let photo = self.images.accept(file).await?;
        self.hold_photo(&photo).await;
        Ok(photo)
    }

    pub async fn attach_photo_path(&self, path: &Path) -> Result<CapturedPhoto, ImageError> {
        let photo = self.images.accept_path(path).await?;
        self.hold_photo(&photo).await;
        Ok(photo)
    }

    async fn hold_photo(&self, photo: &CapturedPhoto) {
        self.pending.lock().await.photo = Some(photo.clone());
        self.emit(IntakeEvent::PhotoAttached {
            mime_type: photo.mime_type.to_string(),
            byte_len: photo.byte_len,
        });
    }

    // ------------------------------------------------------------------
    // Form
    // ------------------------------------------------------------------

    pub async fn set_incident_type(&self, incident_type: Option<IncidentType>) {
        self.form.lock().await.incident_type = incident_type;
    }

    pub async fn set_description(&self, description: impl Into<String>) {
        self.form.lock().await.description = description.into();
    }

    pub async fn form(&self) -> FormFields {
        self.form.lock().await.clone()
    }

    pub async fn missing_requirements(&self) -> Vec<Requirement> {
        let pending = self.pending.lock().await;
        let mut missing = Vec::new();
        if pending.photo.is_none() {
            missing.push(Requirement::Photo);
        }
        if pending.location.is_none() {
            missing.push(Requirement::Location);
        }
        missing
    }

    /// Mirrors the submit control: enabled once photo and location are in.
    pub async fn can_submit(&self) -> bool {
        self.missing_requirements().await.is_empty()
    }

    // ------------------------------------------------------------------
    // Submit and teardown
    // ------------------------------------------------------------------

    /// Validates, stores locally, then hands the record to remote sync in
    /// the background. On success the form, buffers and transcript reset.
    #[instrument(skip(self), fields(session_id = %self.context.session_id))]
    pub async fn submit(&self) -> Result<IncidentRecord, SubmitError> {
        let mut form = self.form.lock().await;
        let mut pending = self.pending.lock().await;

        let record = self.normalizer.submit(
            &form,
            pending.photo.as_ref().map(|photo| &photo.image),
            pending.location.as_ref(),
            &self.context.reporter,
        )?;
        self.store.append(record.clone()).await?;

        let sync = Arc::clone(&self.sync);
        let outgoing = record.clone();
        let mut tasks = self.sync_tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            sync.send(&outgoing).await;
        });
        drop(tasks);

        form.clear();
        *pending = PendingCapture::default();
        self.speech.reset();

        info!(incident_id = %record.id(), severity = %record.severity(), "incident submitted");
        self.emit(IntakeEvent::IncidentSubmitted { id: record.id() });
        Ok(record)
    }

    /// Remote sends spawned by [`submit`](Self::submit) and not yet reaped.
    pub async fn pending_sync_tasks(&self) -> usize {
        self.sync_tasks.lock().await.len()
    }

    /// Waits for outstanding remote sends. Their failures were already
    /// logged by the sync layer.
    pub async fn flush_sync(&self) {
        let mut tasks = std::mem::take(&mut *self.sync_tasks.lock().await);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "sync task did not complete");
            }
        }
    }

    /// Explicit session termination: clears the local feed and every
    /// pending input.
    #[instrument(skip(self), fields(session_id = %self.context.session_id))]
    pub async fn end(&self) -> Result<(), StoreError> {
        self.store.clear().await?;

        let mut form = self.form.lock().await;
        form.clear();
        *self.pending.lock().await = PendingCapture::default();
        self.speech.stop();
        self.speech.reset();
        drop(form);

        info!("intake session ended");
        self.emit(IntakeEvent::SessionCleared);
        Ok(())
    }

    fn emit(&self, event: IntakeEvent) {
        if self.events.send(event).is_err() {
            debug!("no event subscribers");
        }
    }
}

impl Drop for IntakeSession {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        FixedGeolocation, GeoFix, GeolocationError, HttpError, HttpHeaders, HttpRequest,
        HttpResponse, HttpTransport, InferenceClient, MemoryKeyValueStore, UnavailableGeolocation,
    };
    use crate::image_capture::fixtures;
    use crate::voice_intent::ExtractionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers geocoding with a fixed village and accepts every submission.
    struct OkNetwork;

    #[async_trait]
    impl HttpTransport for OkNetwork {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let body = if request.url().as_str().contains("reverse") {
                br#"{"address":{"village":"Sillari"}}"#.to_vec()
            } else {
                Vec::new()
            };
            Ok(HttpResponse::new(200, HttpHeaders::new(), body))
        }
    }

    struct CountingInference {
        reply: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for CountingInference {
        async fn complete(&self, _system: &str, _transcript: &str) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.to_string())
        }
    }

    fn caps(geolocation: Arc<dyn crate::capabilities::Geolocation>, inference: Arc<dyn InferenceClient>) -> Capabilities {
        Capabilities {
            geolocation,
            http: Arc::new(OkNetwork),
            kv: Arc::new(MemoryKeyValueStore::new()),
            inference,
            speech_supported: true,
        }
    }

    fn fixed() -> Arc<dyn crate::capabilities::Geolocation> {
        Arc::new(FixedGeolocation(GeoFix::new(21.73, 79.35)))
    }

    fn silent_inference() -> Arc<CountingInference> {
        Arc::new(CountingInference {
            reply: "{}",
            calls: AtomicUsize::new(0),
        })
    }

    async fn session(caps: Capabilities) -> IntakeSession {
        IntakeSession::new(
            &IntakeConfig::default(),
            caps,
            SessionContext::new(ReporterIdentity::new("Asha", "9999999999", "Sillari")),
        )
        .await
        .unwrap()
    }

    fn photo() -> SelectedFile {
        SelectedFile {
            name: "fire.png".into(),
            bytes: fixtures::png(4, 3),
        }
    }

    #[tokio::test]
    async fn test_submit_gated_on_photo_and_location() {
        let session = session(caps(fixed(), silent_inference())).await;
        assert_eq!(
            session.missing_requirements().await,
            vec![Requirement::Photo, Requirement::Location]
        );

        session.attach_photo(photo()).await.unwrap();
        assert_eq!(session.missing_requirements().await, vec![Requirement::Location]);

        let location = session.capture_location().await.unwrap();
        assert_eq!(location.area, "Sillari");
        assert!(session.can_submit().await);
    }

    #[tokio::test]
    async fn test_successful_submit_resets_pending_state() {
        let session = session(caps(fixed(), silent_inference())).await;
        let mut events = session.subscribe();

        session.attach_photo(photo()).await.unwrap();
        session.capture_location().await.unwrap();
        session.set_incident_type(Some(IncidentType::Fire)).await;
        session
            .set_description("Fire spreading towards the bamboo depot")
            .await;

        let record = session.submit().await.unwrap();
        session.flush_sync().await;

        assert_eq!(session.store().all().await, vec![record.clone()]);
        assert_eq!(session.form().await, FormFields::default());
        assert!(!session.can_submit().await);
        assert_eq!(session.sync_metrics().skipped, 1);

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec!["photo_attached", "location_captured", "incident_submitted"]
        );
    }

    #[tokio::test]
    async fn test_validation_failure_keeps_inputs_and_store() {
        let session = session(caps(fixed(), silent_inference())).await;
        session.attach_photo(photo()).await.unwrap();
        session.capture_location().await.unwrap();
        session.set_incident_type(Some(IncidentType::Wildlife)).await;
        session.set_description("Leopard").await;

        let err = session.submit().await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::DescriptionTooShort { .. })
        ));
        assert!(session.store().is_empty().await);
        assert!(session.can_submit().await);
        assert_eq!(session.form().await.description, "Leopard");
    }

    #[tokio::test]
    async fn test_denied_location_leaves_submit_disabled() {
        let denied = Arc::new(UnavailableGeolocation(GeolocationError::PermissionDenied));
        let session = session(caps(denied, silent_inference())).await;
        session.attach_photo(photo()).await.unwrap();

        assert_eq!(
            session.capture_location().await,
            Err(LocationError::PermissionDenied)
        );
        assert_eq!(session.missing_requirements().await, vec![Requirement::Location]);
        assert!(matches!(
            session.submit().await,
            Err(SubmitError::Validation(ValidationError::MissingLocation))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spoken_report_fills_form() {
        let inference = Arc::new(CountingInference {
            reply: r#"{"incidentType":"illegal","description":"Two men cutting teak near the check dam"}"#,
            calls: AtomicUsize::new(0),
        });
        let session = session(caps(fixed(), inference.clone())).await;
        let mut events = session.subscribe();

        assert!(session.speech().start());
        session.speech().push_segment("two men cutting teak");
        session.speech().push_segment("near the check dam");

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            IntakeEvent::FormAutofilled {
                incident_type: Some(IncidentType::Illegal),
                description_updated: true,
            }
        );
        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            session.form().await.incident_type,
            Some(IncidentType::Illegal)
        );
    }

    #[tokio::test]
    async fn test_end_clears_feed_and_pending_inputs() {
        let session = session(caps(fixed(), silent_inference())).await;
        session.attach_photo(photo()).await.unwrap();
        session.capture_location().await.unwrap();
        session.set_incident_type(Some(IncidentType::Other)).await;
        session
            .set_description("Dead cattle found near the water hole")
            .await;
        session.submit().await.unwrap();
        session.attach_photo(photo()).await.unwrap();

        session.end().await.unwrap();

        assert!(session.store().is_empty().await);
        assert_eq!(
            session.missing_requirements().await,
            vec![Requirement::Photo, Requirement::Location]
        );
    }

    /// Memory store whose writes take a while to land.
    struct SlowKv {
        inner: MemoryKeyValueStore,
        write_delay: std::time::Duration,
    }

    #[async_trait]
    impl crate::capabilities::KeyValueStore for SlowKv {
        async fn get(
            &self,
            key: &crate::capabilities::KvKey,
        ) -> Result<Option<Vec<u8>>, crate::capabilities::KvError> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &crate::capabilities::KvKey,
            value: Vec<u8>,
        ) -> Result<(), crate::capabilities::KvError> {
            tokio::time::sleep(self.write_delay).await;
            self.inner.set(key, value).await
        }

        async fn delete(
            &self,
            key: &crate::capabilities::KvKey,
        ) -> Result<bool, crate::capabilities::KvError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_landing_during_submit_does_not_leak_into_next_report() {
        let inference = Arc::new(CountingInference {
            reply: r#"{"incidentType":"fire","description":"Fire near the village, spreading fast"}"#,
            calls: AtomicUsize::new(0),
        });
        let mut caps = caps(fixed(), inference.clone());
        caps.kv = Arc::new(SlowKv {
            inner: MemoryKeyValueStore::new(),
            write_delay: std::time::Duration::from_secs(2),
        });
        let session = Arc::new(session(caps).await);
        let mut events = session.subscribe();

        session.attach_photo(photo()).await.unwrap();
        session.capture_location().await.unwrap();
        session.set_incident_type(Some(IncidentType::Wildlife)).await;
        session
            .set_description("Leopard resting on the culvert near the school")
            .await;

        assert!(session.speech().start());
        session
            .speech()
            .push_segment("fire near the village spreading fast");
        tokio::time::sleep(std::time::Duration::from_millis(1_400)).await;

        let submitting = Arc::clone(&session);
        let record = tokio::spawn(async move { submitting.submit().await })
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        assert_eq!(inference.calls.load(Ordering::SeqCst), 1);
        assert_eq!(record.incident_type(), IncidentType::Wildlife);
        assert_eq!(session.form().await, FormFields::default());
        assert_eq!(session.speech().transcript(), "");
        assert!(session.speech().is_listening());

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert!(!names.contains(&"form_autofilled"), "got {names:?}");
    }

    #[tokio::test]
    async fn test_finished_sync_tasks_are_reaped_on_submit() {
        let session = session(caps(fixed(), silent_inference())).await;

        for description in [
            "Smoke column rising behind the ridge",
            "Second fire line near the tank road",
        ] {
            session.attach_photo(photo()).await.unwrap();
            session.capture_location().await.unwrap();
            session.set_incident_type(Some(IncidentType::Fire)).await;
            session.set_description(description).await;
            session.submit().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        assert_eq!(session.pending_sync_tasks().await, 1);
        session.flush_sync().await;
        assert_eq!(session.pending_sync_tasks().await, 0);
        assert_eq!(session.sync_metrics().skipped, 2);
    }
}
