//! Turns resolved form inputs into a canonical [`IncidentRecord`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    FormFields, IdGenerator, ImageData, IncidentRecord, IncidentType, Location, ReporterIdentity,
};
use crate::MIN_DESCRIPTION_CHARS;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("location is required")]
    MissingLocation,

    #[error("image is required")]
    MissingImage,

    #[error("incident type is required")]
    MissingIncidentType,

    #[error("description must be at least {min} characters (got {length})")]
    DescriptionTooShort { length: usize, min: usize },
}

impl ValidationError {
    /// Name of the offending form field.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingLocation => "location",
            Self::MissingImage => "image",
            Self::MissingIncidentType => "incidentType",
            Self::DescriptionTooShort { .. } => "description",
        }
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingLocation => "Please capture your location before submitting.".into(),
            Self::MissingImage => "Please attach a photo of the incident.".into(),
            Self::MissingIncidentType => "Please select an incident type.".into(),
            Self::DescriptionTooShort { min, .. } => {
                format!("Description must be at least {min} characters.")
            }
        }
    }
}

#[derive(Debug)]
pub struct IncidentNormalizer {
    ids: IdGenerator,
    min_description_chars: usize,
}

impl Default for IncidentNormalizer {
    fn default() -> Self {
        Self {
            ids: IdGenerator::new(),
            min_description_chars: MIN_DESCRIPTION_CHARS,
        }
    }
}

impl IncidentNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks preconditions in order: location, image, type, description.
    pub fn validate(
        &self,
        form: &FormFields,
        image: Option<&ImageData>,
        location: Option<&Location>,
    ) -> Result<(), ValidationError> {
        self.resolve(form, image, location).map(|_| ())
    }

    fn resolve<'a>(
        &self,
        form: &FormFields,
        image: Option<&'a ImageData>,
        location: Option<&'a Location>,
    ) -> Result<(IncidentType, &'a ImageData, &'a Location), ValidationError> {
        let location = location.ok_or(ValidationError::MissingLocation)?;
        let image = image.ok_or(ValidationError::MissingImage)?;
        let incident_type = form
            .incident_type
            .ok_or(ValidationError::MissingIncidentType)?;

        let length = form.description.trim().chars().count();
        if length < self.min_description_chars {
            return Err(ValidationError::DescriptionTooShort {
                length,
                min: self.min_description_chars,
            });
        }
        Ok((incident_type, image, location))
    }

    pub fn submit(
        &self,
        form: &FormFields,
        image: Option<&ImageData>,
        location: Option<&Location>,
        reporter: &ReporterIdentity,
    ) -> Result<IncidentRecord, ValidationError> {
        self.submit_at(form, image, location, reporter, Utc::now())
    }

    /// [`submit`](Self::submit) with an explicit clock reading.
    pub fn submit_at(
        &self,
        form: &FormFields,
        image: Option<&ImageData>,
        location: Option<&Location>,
        reporter: &ReporterIdentity,
        now: DateTime<Utc>,
    ) -> Result<IncidentRecord, ValidationError> {
        let (incident_type, image, location) = self.resolve(form, image, location)?;

        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        Ok(IncidentRecord::new(
            self.ids.next(now_ms),
            incident_type,
            form.description.trim().to_string(),
            location.clone(),
            image.clone(),
            now,
            reporter.clone(),
        ))
    }
}
