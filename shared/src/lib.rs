// lib.rs - Forest incident intake core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod event;
pub mod feed;
pub mod image_capture;
pub mod location;
pub mod model;
pub mod normalizer;
pub mod session;
pub mod speech;
pub mod store;
pub mod sync;
pub mod voice_intent;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use capabilities::Capabilities;
pub use config::IntakeConfig;
pub use event::IntakeEvent;
pub use model::{
    FormFields, ImageData, IncidentId, IncidentRecord, IncidentType, Location, ReporterIdentity,
    Severity,
};
pub use session::{IntakeSession, SessionContext, SubmitError};
pub use store::IncidentStore;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MIN_DESCRIPTION_CHARS: usize = 20;
pub const MIN_TRANSCRIPT_CHARS: usize = 15;
pub const EXTRACTION_QUIESCENCE: Duration = Duration::from_millis(1500);
pub const UNKNOWN_AREA: &str = "Unknown Area";
pub const DEFAULT_STORAGE_SLOT: &str = "vanrakshak_incidents";
pub const DESCRIPTION_PREVIEW_LENGTH: usize = 80;
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);
pub const INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    LocationUnavailable,
    ImageTooLarge,
    ImageDecodeFailed,
    ExtractionFailure,
    RemoteSyncFailure,
    Storage,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::LocationUnavailable => "LOCATION_UNAVAILABLE",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::ImageDecodeFailed => "IMAGE_DECODE_FAILED",
            Self::ExtractionFailure => "EXTRACTION_FAILURE",
            Self::RemoteSyncFailure => "REMOTE_SYNC_FAILURE",
            Self::Storage => "STORAGE_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::LocationUnavailable
            | Self::ExtractionFailure
            | Self::RemoteSyncFailure
            | Self::Storage => ErrorSeverity::Transient,

            Self::Validation | Self::ImageTooLarge | Self::ImageDecodeFailed => {
                ErrorSeverity::Permanent
            }

            Self::Configuration | Self::Internal => ErrorSeverity::Fatal,
        }
    }

    /// Errors the reporter can fix from the form (blocks submission).
    #[must_use]
    pub const fn is_user_correctable(self) -> bool {
        matches!(
            self,
            Self::Validation
                | Self::LocationUnavailable
                | Self::ImageTooLarge
                | Self::ImageDecodeFailed
        )
    }

    /// Errors swallowed at their boundary and only logged.
    #[must_use]
    pub const fn is_silent(self) -> bool {
        matches!(self, Self::ExtractionFailure | Self::RemoteSyncFailure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::LocationUnavailable => {
                "Unable to get location. Please enable GPS and try again.".into()
            }
            ErrorKind::ImageTooLarge => format!(
                "Image size should be less than {}MB. Please choose a smaller photo.",
                MAX_IMAGE_BYTES / (1024 * 1024)
            ),
            ErrorKind::ImageDecodeFailed => {
                "Unable to read the photo. Please choose a JPEG, PNG or WebP image.".into()
            }
            ErrorKind::ExtractionFailure => {
                "Voice input could not be understood. Please fill in the form manually.".into()
            }
            ErrorKind::RemoteSyncFailure => {
                "The report was saved on this device.".into()
            }
            ErrorKind::Storage => {
                "Unable to save the report on this device. Please free up some storage space."
                    .into()
            }
            ErrorKind::Configuration => {
                format!("The app is misconfigured: {}", self.message)
            }
            ErrorKind::Internal => {
                "An unexpected error occurred. Please try again.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<normalizer::ValidationError> for AppError {
    fn from(e: normalizer::ValidationError) -> Self {
        AppError::new(ErrorKind::Validation, e.user_message()).with_context("field", e.field())
    }
}

impl From<location::LocationError> for AppError {
    fn from(e: location::LocationError) -> Self {
        AppError::new(ErrorKind::LocationUnavailable, e.to_string())
    }
}

impl From<image_capture::ImageError> for AppError {
    fn from(e: image_capture::ImageError) -> Self {
        let kind = match &e {
            image_capture::ImageError::TooLarge { .. } => ErrorKind::ImageTooLarge,
            image_capture::ImageError::DecodeFailed { .. } => ErrorKind::ImageDecodeFailed,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<voice_intent::ExtractionError> for AppError {
    fn from(e: voice_intent::ExtractionError) -> Self {
        AppError::new(ErrorKind::ExtractionFailure, e.to_string())
    }
}

impl From<sync::SyncError> for AppError {
    fn from(e: sync::SyncError) -> Self {
        AppError::new(ErrorKind::RemoteSyncFailure, e.to_string())
    }
}

impl From<store::StoreError> for AppError {
    fn from(e: store::StoreError) -> Self {
        AppError::new(ErrorKind::Storage, "Failed to persist incidents").with_internal(e.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

impl From<session::SubmitError> for AppError {
    fn from(e: session::SubmitError) -> Self {
        match e {
            session::SubmitError::Validation(v) => v.into(),
            session::SubmitError::Store(s) => s.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::ValidationError;

    #[test]
    fn test_error_kind_propagation_policy() {
        assert!(ErrorKind::Validation.is_user_correctable());
        assert!(ErrorKind::LocationUnavailable.is_user_correctable());
        assert!(ErrorKind::ImageTooLarge.is_user_correctable());
        assert!(!ErrorKind::ExtractionFailure.is_user_correctable());

        assert!(ErrorKind::ExtractionFailure.is_silent());
        assert!(ErrorKind::RemoteSyncFailure.is_silent());
        assert!(!ErrorKind::Validation.is_silent());
    }

    #[test]
    fn test_validation_error_keeps_field_context() {
        let err: AppError = ValidationError::MissingImage.into();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.context.get("field").map(String::as_str), Some("image"));
        assert_eq!(err.user_facing_message(), err.message);
    }

    #[test]
    fn test_image_too_large_message_mentions_limit() {
        let err = AppError::new(ErrorKind::ImageTooLarge, "too big");
        assert!(err.user_facing_message().contains("5MB"));
    }

    #[test]
    fn test_display_includes_internal() {
        let err = AppError::new(ErrorKind::Storage, "write failed").with_internal("disk full");
        assert_eq!(err.to_string(), "[STORAGE_ERROR] write failed (internal: disk full)");
    }
}
