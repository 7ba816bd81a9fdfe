//! Device position capture and reverse geocoding.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    execute_with_deadline, GeoFix, Geolocation, GeolocationError, HttpError, HttpRequest,
    HttpTransport, ValidatedUrl,
};
use crate::model::Location;
use crate::UNKNOWN_AREA;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("geolocation is not supported on this device")]
    Unsupported,

    #[error("device reported invalid coordinates ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

impl From<GeolocationError> for LocationError {
    fn from(e: GeolocationError) -> Self {
        match e {
            GeolocationError::PermissionDenied => Self::PermissionDenied,
            GeolocationError::Unavailable { reason } => Self::Unavailable { reason },
            GeolocationError::Unsupported => Self::Unsupported,
        }
    }
}

#[derive(Debug, Error)]
enum GeocodeError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("geocoder returned status {0}")]
    Status(u16),
}

#[derive(Debug, Default, Deserialize)]
struct ReverseGeocodeResponse {
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    suburb: Option<String>,
    village: Option<String>,
    town: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
}

impl NominatimAddress {
    /// Most specific named area: suburb, village, town, district, state.
    fn area(&self) -> Option<String> {
        [
            &self.suburb,
            &self.village,
            &self.town,
            &self.state_district,
            &self.state,
        ]
        .into_iter()
        .flatten()
        .map(|name| name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_string)
    }
}

pub struct LocationResolver {
    geolocation: Arc<dyn Geolocation>,
    transport: Arc<dyn HttpTransport>,
    geocoder: ValidatedUrl,
    user_agent: String,
    timeout: Duration,
}

impl LocationResolver {
    pub fn new(
        geolocation: Arc<dyn Geolocation>,
        transport: Arc<dyn HttpTransport>,
        geocoder: ValidatedUrl,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            geolocation,
            transport,
            geocoder,
            user_agent: user_agent.into(),
            timeout,
        }
    }

    /// Requests a fix and resolves a place name for it.
    ///
    /// Only positioning failures are errors. A failed or unparseable
    /// geocoding lookup degrades to [`UNKNOWN_AREA`].
    #[instrument(skip(self))]
    pub async fn capture(&self) -> Result<Location, LocationError> {
        let fix = self.geolocation.current_position().await?;
        if !fix.is_valid() {
            return Err(LocationError::InvalidCoordinates {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }

        let area = self.resolve_area(&fix).await;
        info!(area = %area, "location captured");

        Ok(Location {
            latitude: fix.latitude,
            longitude: fix.longitude,
            area,
        })
    }

    async fn resolve_area(&self, fix: &GeoFix) -> String {
        match self.lookup_area(fix).await {
            Ok(Some(area)) => area,
            Ok(None) => {
                debug!("geocoder returned no named area");
                UNKNOWN_AREA.to_string()
            }
            Err(e) => {
                warn!(error = %e, "reverse geocoding failed; using fallback area");
                UNKNOWN_AREA.to_string()
            }
        }
    }

    async fn lookup_area(&self, fix: &GeoFix) -> Result<Option<String>, GeocodeError> {
        let url = self.geocoder.with_query([
            ("lat", fix.latitude.to_string()),
            ("lon", fix.longitude.to_string()),
            ("format", "json".to_string()),
        ]);
        let request = HttpRequest::get(url)
            .with_header("User-Agent", self.user_agent.as_str())?
            .with_header("Accept", "application/json")?
            .with_timeout(self.timeout)?;

        let response = execute_with_deadline(self.transport.as_ref(), request).await?;
        if !response.is_success() {
            return Err(GeocodeError::Status(response.status()));
        }

        // A body that is not the expected shape is treated as "no area"
        let parsed: ReverseGeocodeResponse = response.json().unwrap_or_default();
        Ok(parsed.address.and_then(|address| address.area()))
    }
}
