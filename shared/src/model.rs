//! Domain types for incident reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Incident classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    Fire,
    Wildlife,
    Illegal,
    Other,
}

impl IncidentType {
    pub const ALL: [IncidentType; 4] = [Self::Fire, Self::Wildlife, Self::Illegal, Self::Other];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fire => "fire",
            Self::Wildlife => "wildlife",
            Self::Illegal => "illegal",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fire => "Forest Fire",
            Self::Wildlife => "Wildlife Sighting",
            Self::Illegal => "Illegal Activity (Logging/Poaching)",
            Self::Other => "Other Emergency",
        }
    }

    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::Fire => Severity::High,
            Self::Wildlife | Self::Illegal | Self::Other => Severity::Medium,
        }
    }

    /// Case-insensitive match against the wire name or the display label.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let needle = raw.trim();
        Self::ALL.into_iter().find(|t| {
            t.as_str().eq_ignore_ascii_case(needle) || t.label().eq_ignore_ascii_case(needle)
        })
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown incident type: {0:?}")]
pub struct UnknownIncidentType(pub String);

impl FromStr for IncidentType {
    type Err = UnknownIncidentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| UnknownIncidentType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

impl From<IncidentType> for Severity {
    fn from(t: IncidentType) -> Self {
        t.severity()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
        })
    }
}

// ============================================================================
// Location, reporter, image
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub area: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterIdentity {
    pub name: String,
    #[serde(rename = "phone")]
    pub contact: String,
    pub village: String,
}

impl ReporterIdentity {
    pub fn new(
        name: impl Into<String>,
        contact: impl Into<String>,
        village: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            contact: contact.into(),
            village: village.into(),
        }
    }
}

/// A photo embedded as a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageData(String);

impl ImageData {
    #[must_use]
    pub fn from_base64(mime_type: &str, payload: &str) -> Self {
        Self(format!("data:{mime_type};base64,{payload}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("data:")?;
        let (mime, _) = rest.split_once(";base64,")?;
        Some(mime)
    }

    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        self.0.split_once(";base64,").map(|(_, payload)| payload)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Creation time in unix milliseconds, unique within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(u64);

impl IncidentId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IncidentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Hands out millisecond ids, bumping past the last one on same-ms collisions.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, now_ms: u64) -> IncidentId {
        let mut issued = now_ms;
        // fetch_update only fails when the closure returns None
        let _ = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                issued = now_ms.max(last.saturating_add(1));
                Some(issued)
            });
        IncidentId(issued)
    }
}

// ============================================================================
// Incident record
// ============================================================================

/// A validated, immutable incident report.
///
/// Severity is always derived from the incident type, including on
/// deserialization where any stored severity is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredIncident")]
pub struct IncidentRecord {
    id: IncidentId,
    incident_type: IncidentType,
    description: String,
    location: Location,
    image: ImageData,
    timestamp: DateTime<Utc>,
    severity: Severity,
    reporter: ReporterIdentity,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredIncident {
    id: IncidentId,
    #[serde(alias = "type")]
    incident_type: IncidentType,
    description: String,
    location: Location,
    image: ImageData,
    timestamp: DateTime<Utc>,
    reporter: ReporterIdentity,
}

impl From<StoredIncident> for IncidentRecord {
    fn from(s: StoredIncident) -> Self {
        Self::new(
            s.id,
            s.incident_type,
            s.description,
            s.location,
            s.image,
            s.timestamp,
            s.reporter,
        )
    }
}

impl IncidentRecord {
    pub(crate) fn new(
        id: IncidentId,
        incident_type: IncidentType,
        description: String,
        location: Location,
        image: ImageData,
        timestamp: DateTime<Utc>,
        reporter: ReporterIdentity,
    ) -> Self {
        Self {
            id,
            incident_type,
            description,
            location,
            image,
            timestamp,
            severity: incident_type.severity(),
            reporter,
        }
    }

    #[must_use]
    pub fn id(&self) -> IncidentId {
        self.id
    }

    #[must_use]
    pub fn incident_type(&self) -> IncidentType {
        self.incident_type
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    #[must_use]
    pub fn image(&self) -> &ImageData {
        &self.image
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub fn reporter(&self) -> &ReporterIdentity {
        &self.reporter
    }
}

// ============================================================================
// Form state
// ============================================================================

/// Editable form fields. Both the reporter and voice extraction write here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFields {
    pub incident_type: Option<IncidentType>,
    pub description: String,
}

impl FormFields {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record(incident_type: IncidentType) -> IncidentRecord {
        IncidentRecord::new(
            IncidentId::new(1_700_000_000_000),
            incident_type,
            "Smoke rising behind the ridge near the old well".into(),
            Location {
                latitude: 21.1,
                longitude: 79.0,
                area: "Seoni".into(),
            },
            ImageData::from_base64("image/jpeg", "AAAA"),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            ReporterIdentity::new("Asha", "9999999999", "Khawasa"),
        )
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(IncidentType::Fire.severity(), Severity::High);
        assert_eq!(IncidentType::Illegal.severity(), Severity::Medium);
        assert_eq!(IncidentType::Wildlife.severity(), Severity::Medium);
        assert_eq!(IncidentType::Other.severity(), Severity::Medium);
    }

    #[test]
    fn test_parse_lenient_accepts_codes_and_labels() {
        assert_eq!(IncidentType::parse_lenient(" FIRE "), Some(IncidentType::Fire));
        assert_eq!(
            IncidentType::parse_lenient("wildlife sighting"),
            Some(IncidentType::Wildlife)
        );
        assert_eq!(IncidentType::parse_lenient("flood"), None);
        assert!("poaching".parse::<IncidentType>().is_err());
    }

    #[test]
    fn test_record_wire_shape() {
        let record = sample_record(IncidentType::Fire);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["id"], 1_700_000_000_000_u64);
        assert_eq!(json["incidentType"], "fire");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["reporter"]["phone"], "9999999999");
        assert_eq!(json["location"]["area"], "Seoni");
        assert!(json["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_stored_severity_is_ignored() {
        let mut json = serde_json::to_value(sample_record(IncidentType::Wildlife)).unwrap();
        json["severity"] = "high".into();

        let record: IncidentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.severity(), Severity::Medium);
    }

    #[test]
    fn test_image_data_parts() {
        let image = ImageData::from_base64("image/png", "iVBORw0K");
        assert_eq!(image.mime_type(), Some("image/png"));
        assert_eq!(image.payload(), Some("iVBORw0K"));
    }

    #[test]
    fn test_id_generator_is_strictly_increasing() {
        let ids = IdGenerator::new();
        let a = ids.next(1_000);
        let b = ids.next(1_000);
        let c = ids.next(999);
        let d = ids.next(5_000);

        assert_eq!(a.as_u64(), 1_000);
        assert_eq!(b.as_u64(), 1_001);
        assert_eq!(c.as_u64(), 1_002);
        assert_eq!(d.as_u64(), 5_000);
    }
}
