use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw position fix as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

impl GeoFix {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("geolocation is not supported on this device")]
    Unsupported,
}

#[async_trait]
pub trait Geolocation: Send + Sync {
    async fn current_position(&self) -> Result<GeoFix, GeolocationError>;
}

/// Always reports the same fix. Used by the CLI and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedGeolocation(pub GeoFix);

#[async_trait]
impl Geolocation for FixedGeolocation {
    async fn current_position(&self) -> Result<GeoFix, GeolocationError> {
        Ok(self.0)
    }
}

/// A device without a usable positioning source.
#[derive(Debug, Clone)]
pub struct UnavailableGeolocation(pub GeolocationError);

#[async_trait]
impl Geolocation for UnavailableGeolocation {
    async fn current_position(&self) -> Result<GeoFix, GeolocationError> {
        Err(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_validity() {
        assert!(GeoFix::new(21.15, 79.09).is_valid());
        assert!(GeoFix::new(-90.0, 180.0).is_valid());
        assert!(!GeoFix::new(91.0, 0.0).is_valid());
        assert!(!GeoFix::new(0.0, -180.5).is_valid());
        assert!(!GeoFix::new(f64::NAN, 0.0).is_valid());
    }
}
