//! Geographic primitives.
//!
//! The engine works on a spherical earth model. Coordinates are validated at
//! the boundary; an invalid latitude or longitude is rejected and never
//! stored, so every `GeoPoint` in the system is well-formed by construction.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean earth radius in meters (IUGG spherical approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters spanned by one degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

const LAT_MAX: f64 = 90.0;
const LNG_MAX: f64 = 180.0;

/// A validated geographic point.
///
/// Latitude is restricted to `[-90, 90]` and longitude to `[-180, 180]`.
/// Construction fails with [`ValidationError::InvalidCoordinate`] otherwise.
///
/// # Examples
///
/// ```
/// use proxim::GeoPoint;
///
/// let paris = GeoPoint::new(48.8566, 2.3522).unwrap();
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// assert!(paris.distance_m(&paris) < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    /// Creates a point from a latitude/longitude pair.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCoordinate` if either component is
    /// non-finite or out of range.
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite() || !lng.is_finite() || lat.abs() > LAT_MAX || lng.abs() > LNG_MAX {
            return Err(ValidationError::InvalidCoordinate { lat, lng });
        }
        Ok(Self { lat, lng })
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn lng(&self) -> f64 {
        self.lng
    }

    /// Great-circle distance to another point, in meters (haversine).
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();

        EARTH_RADIUS_M * c
    }
}

/// Validates a search radius.
///
/// # Errors
///
/// Returns `ValidationError::InvalidRadius` unless `meters` is finite and
/// strictly positive.
pub fn validate_radius(meters: f64) -> Result<(), ValidationError> {
    if !meters.is_finite() || meters <= 0.0 {
        return Err(ValidationError::InvalidRadius { meters });
    }
    Ok(())
}

/// Degrees of latitude spanned by `meters`.
#[must_use]
pub fn lat_degrees_for(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Degrees of longitude spanned by `meters` at the given latitude.
///
/// Longitude lines converge toward the poles; near them one meter covers an
/// arbitrarily large angle, so the result is capped at a full circle.
#[must_use]
pub fn lng_degrees_for(meters: f64, lat: f64) -> f64 {
    let cos_lat = lat.to_radians().cos();
    if cos_lat <= 1e-9 {
        return 360.0;
    }
    (meters / (METERS_PER_DEGREE * cos_lat)).min(360.0)
}
