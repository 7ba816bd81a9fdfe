//! AI-assisted form filling from a speech transcript.
//!
//! A watcher debounces the transcript: once it has stopped growing for the
//! quiescence window and is long enough, one inference call is made. At
//! most one call is ever outstanding; triggers that arrive while it runs
//! are dropped, not queued.

use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{HttpError, InferenceClient};
use crate::event::IntakeEvent;
use crate::model::{FormFields, IncidentType};
use crate::{EXTRACTION_QUIESCENCE, MIN_TRANSCRIPT_CHARS};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract structured data from forest incident \
reports dictated by field reporters. Reply with exactly one JSON object and nothing else, shaped \
as {\"incidentType\": \"fire\" | \"wildlife\" | \"illegal\" | \"other\", \"description\": \
\"<short factual description of what was observed and where>\"}. Leave out a field when the \
transcript gives no basis for it.";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("inference request failed: {0}")]
    Transport(#[from] HttpError),

    #[error("inference endpoint returned status {status}: {body_preview}")]
    Status { status: u16, body_preview: String },

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),

    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("model output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

// ============================================================================
// Extracted intent
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedIntent {
    pub incident_type: Option<IncidentType>,
    pub description: Option<String>,
}

/// Which form fields an [`ExtractedIntent`] actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedFields {
    pub incident_type: Option<IncidentType>,
    pub description: bool,
}

impl AppliedFields {
    #[must_use]
    pub fn any(self) -> bool {
        self.incident_type.is_some() || self.description
    }
}

impl ExtractedIntent {
    /// Overwrites the fields the model supplied. Never clears a field.
    pub fn apply_to(&self, form: &mut FormFields) -> AppliedFields {
        let mut applied = AppliedFields::default();
        if let Some(incident_type) = self.incident_type {
            form.incident_type = Some(incident_type);
            applied.incident_type = Some(incident_type);
        }
        if let Some(description) = &self.description {
            form.description.clone_from(description);
            applied.description = true;
        }
        applied
    }
}

#[derive(Deserialize)]
struct RawIntent {
    #[serde(default, rename = "incidentType", alias = "incident_type", alias = "type")]
    incident_type: Option<serde_json::Value>,
    #[serde(default)]
    description: Option<serde_json::Value>,
}

/// Slice of the first balanced `{...}` in `text`, ignoring braces inside
/// JSON strings.
#[must_use]
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_intent(model_output: &str) -> Result<ExtractedIntent, ExtractionError> {
    let object = first_json_object(model_output).ok_or(ExtractionError::NoJsonObject)?;
    let raw: RawIntent = serde_json::from_str(object)?;

    let incident_type = match raw.incident_type {
        Some(serde_json::Value::String(s)) => {
            let parsed = IncidentType::parse_lenient(&s);
            if parsed.is_none() {
                debug!(value = %s, "ignoring unrecognised incident type from model");
            }
            parsed
        }
        _ => None,
    };
    let description = match raw.description {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };

    Ok(ExtractedIntent {
        incident_type,
        description,
    })
}

// ============================================================================
// In-flight register
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Idle,
    Extracting,
}

/// Held for the duration of one inference call. Dropping it returns the
/// extractor to [`ExtractorState::Idle`].
#[derive(Debug)]
pub struct InFlightPermit {
    slot: Arc<AtomicBool>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
    }
}

// ============================================================================
// Extractor
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct VoiceIntentConfig {
    pub quiescence: Duration,
    pub min_transcript_chars: usize,
}

impl Default for VoiceIntentConfig {
    fn default() -> Self {
        Self {
            quiescence: EXTRACTION_QUIESCENCE,
            min_transcript_chars: MIN_TRANSCRIPT_CHARS,
        }
    }
}

pub struct VoiceIntentExtractor {
    client: Arc<dyn InferenceClient>,
    config: VoiceIntentConfig,
    in_flight: Arc<AtomicBool>,
}

impl VoiceIntentExtractor {
    pub fn new(client: Arc<dyn InferenceClient>, config: VoiceIntentConfig) -> Self {
        Self {
            client,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn state(&self) -> ExtractorState {
        if self.in_flight.load(Ordering::Acquire) {
            ExtractorState::Extracting
        } else {
            ExtractorState::Idle
        }
    }

    /// Transcript length gate, counted in characters.
    #[must_use]
    pub fn meets_threshold(&self, transcript: &str) -> bool {
        transcript.chars().count() > self.config.min_transcript_chars
    }

    /// Idle -> Extracting. `None` when a call is already outstanding.
    #[must_use]
    pub fn try_begin(&self) -> Option<InFlightPermit> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit {
                slot: Arc::clone(&self.in_flight),
            })
    }

    /// One extraction attempt. Returns `None` when the transcript is too
    /// short, another call is in flight, or the call or parse failed.
    pub async fn extract(&self, transcript: &str) -> Option<ExtractedIntent> {
        if !self.meets_threshold(transcript) {
            debug!("transcript below extraction threshold");
            return None;
        }
        let Some(permit) = self.try_begin() else {
            debug!("extraction already in flight; trigger dropped");
            return None;
        };
        self.extract_with(permit, transcript).await
    }

    #[instrument(skip_all, fields(transcript_len = transcript.len()))]
    async fn extract_with(&self, _permit: InFlightPermit, transcript: &str) -> Option<ExtractedIntent> {
        let result = self
            .client
            .complete(EXTRACTION_SYSTEM_PROMPT, transcript)
            .await
            .and_then(|output| parse_intent(&output));

        match result {
            Ok(intent) => {
                info!(
                    incident_type = ?intent.incident_type,
                    has_description = intent.description.is_some(),
                    "voice intent extracted"
                );
                Some(intent)
            }
            Err(e) => {
                warn!(error = %e, "voice intent extraction failed; manual entry unaffected");
                None
            }
        }
    }

    /// Watches the transcript and back-fills `form` after each stable window.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        mut transcript: watch::Receiver<String>,
        form: Arc<Mutex<FormFields>>,
        events: broadcast::Sender<IntakeEvent>,
    ) -> JoinHandle<()> {
        let extractor = Arc::clone(self);
        tokio::spawn(async move {
            while transcript.changed().await.is_ok() {
                loop {
                    tokio::select! {
                        changed = transcript.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                        () = tokio::time::sleep(extractor.config.quiescence) => break,
                    }
                }

                let text = transcript.borrow_and_update().clone();
                if !extractor.meets_threshold(&text) {
                    continue;
                }
                let Some(permit) = extractor.try_begin() else {
                    debug!("extraction already in flight; trigger dropped");
                    continue;
                };

                let extractor = Arc::clone(&extractor);
                let form = Arc::clone(&form);
                let events = events.clone();
                let current = transcript.clone();
                tokio::spawn(async move {
                    let Some(intent) = extractor.extract_with(permit, &text).await else {
                        return;
                    };
                    // Submit resets the transcript while holding the form
                    // lock, so the check must run under it too
                    let mut form = form.lock().await;
                    if !current.borrow().starts_with(text.as_str()) {
                        debug!("transcript reset during extraction; result discarded");
                        return;
                    }
                    let applied = intent.apply_to(&mut form);
                    if applied.any() {
                        let _ = events.send(IntakeEvent::FormAutofilled {
                            incident_type: applied.incident_type,
                            description_updated: applied.description,
                        });
                    }
                });
            }
        })
    }
}
