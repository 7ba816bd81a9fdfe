//! Read-side projections of the incident store: feed rows and GeoJSON.

use chrono::{DateTime, Utc};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;

use crate::model::{IncidentId, IncidentRecord, IncidentType, Location, Severity};
use crate::{DESCRIPTION_PREVIEW_LENGTH, EARTH_RADIUS_M};

// ============================================================================
// Geometry and formatting helpers
// ============================================================================

/// Great-circle distance in metres between two WGS84 points.
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (lat1 - lat2).abs() < EPSILON && (lon1 - lon2).abs() < EPSILON {
        return 0.0;
    }

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    let result = EARTH_RADIUS_M * c;
    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{:.0} km", meters / 1000.0)
    }
}

#[must_use]
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff_secs = (now - then).num_seconds();
    if diff_secs < 0 {
        return if diff_secs > -60 {
            "Just now".into()
        } else {
            "Upcoming".into()
        };
    }
    if diff_secs < 5 {
        return "Just now".into();
    }
    if diff_secs < 60 {
        return format!("{diff_secs}s ago");
    }

    let diff_mins = diff_secs / 60;
    if diff_mins < 60 {
        return format!("{diff_mins}m ago");
    }

    let diff_hours = diff_mins / 60;
    if diff_hours < 24 {
        return format!("{diff_hours}h ago");
    }

    let diff_days = diff_hours / 24;
    if diff_days < 7 {
        return format!("{diff_days}d ago");
    }
    if diff_days < 30 {
        return format!("{}w ago", diff_days / 7);
    }
    if diff_days < 365 {
        return format!("{}mo ago", diff_days / 30);
    }
    format!("{}y ago", diff_days / 365)
}

/// Truncates on a character boundary, marking the cut with "...".
#[must_use]
pub fn description_preview(description: &str, max_chars: usize) -> String {
    if description.chars().count() <= max_chars {
        return description.to_string();
    }
    let mut preview: String = description
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect();
    preview.push_str("...");
    preview
}

// ============================================================================
// Feed rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedItem {
    pub id: IncidentId,
    pub incident_type: IncidentType,
    pub type_label: &'static str,
    pub severity: Severity,
    pub area: String,
    pub description_preview: String,
    pub time_ago: String,
    pub distance: Option<String>,
    pub has_image: bool,
}

impl FeedItem {
    #[must_use]
    pub fn build(record: &IncidentRecord, viewer: Option<&Location>, now: DateTime<Utc>) -> Self {
        let location = record.location();
        let distance = viewer.map(|v| {
            format_distance(haversine_distance(
                v.latitude,
                v.longitude,
                location.latitude,
                location.longitude,
            ))
        });

        Self {
            id: record.id(),
            incident_type: record.incident_type(),
            type_label: record.incident_type().label(),
            severity: record.severity(),
            area: location.area.clone(),
            description_preview: description_preview(
                record.description(),
                DESCRIPTION_PREVIEW_LENGTH,
            ),
            time_ago: format_time_ago(record.timestamp(), now),
            distance,
            has_image: !record.image().as_str().is_empty(),
        }
    }
}

/// Feed rows in store order (most recent first).
#[must_use]
pub fn build_feed(
    records: &[IncidentRecord],
    viewer: Option<&Location>,
    now: DateTime<Utc>,
) -> Vec<FeedItem> {
    records
        .iter()
        .map(|record| FeedItem::build(record, viewer, now))
        .collect()
}

// ============================================================================
// GeoJSON export
// ============================================================================

/// One point feature per incident. Images are left out.
#[must_use]
pub fn to_geojson(records: &[IncidentRecord]) -> FeatureCollection {
    let features = records
        .iter()
        .map(|record| {
            let location = record.location();
            let mut properties = JsonObject::new();
            properties.insert("incidentType".into(), record.incident_type().as_str().into());
            properties.insert("label".into(), record.incident_type().label().into());
            properties.insert("severity".into(), record.severity().to_string().into());
            properties.insert("description".into(), record.description().into());
            properties.insert("area".into(), location.area.clone().into());
            properties.insert("timestamp".into(), record.timestamp().to_rfc3339().into());
            properties.insert("reporter".into(), record.reporter().name.clone().into());

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![
                    location.longitude,
                    location.latitude,
                ]))),
                id: Some(Id::Number(record.id().as_u64().into())),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
