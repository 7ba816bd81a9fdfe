use serde::{Deserialize, Serialize};

use crate::model::{IncidentId, IncidentType};

// --- Session notifications for the rendering shell ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeEvent {
    LocationCaptured {
        area: String,
    },
    PhotoAttached {
        mime_type: String,
        byte_len: usize,
    },
    FormAutofilled {
        incident_type: Option<IncidentType>,
        description_updated: bool,
    },
    IncidentSubmitted {
        id: IncidentId,
    },
    SessionCleared,
}

impl IntakeEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocationCaptured { .. } => "location_captured",
            Self::PhotoAttached { .. } => "photo_attached",
            Self::FormAutofilled { .. } => "form_autofilled",
            Self::IncidentSubmitted { .. } => "incident_submitted",
            Self::SessionCleared => "session_cleared",
        }
    }
}
