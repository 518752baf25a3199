//! One-shot coordinate readings
//!
//! Readings travel as `"<lat>,<lon>"` text. Formatting uses the shortest
//! representation that parses back to the same `f64`, so a reading survives
//! the wire without rounding.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coordinates that could not be parsed or are not finite
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidLocationError {
    /// Payload did not split into exactly two comma-separated fields
    #[error("expected 2 comma-separated fields, got {0}")]
    FieldCount(usize),

    /// A field was not a decimal number
    #[error("'{0}' is not a number")]
    NotANumber(String),

    /// A field parsed to NaN or infinity
    #[error("coordinate is not finite")]
    NotFinite,
}

/// A latitude/longitude pair
///
/// Construction rejects NaN and infinities, so any `Coordinates` value can be
/// encoded. Deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedCoordinates")]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct UncheckedCoordinates {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<UncheckedCoordinates> for Coordinates {
    type Error = InvalidLocationError;

    fn try_from(raw: UncheckedCoordinates) -> Result<Self, Self::Error> {
        Coordinates::new(raw.latitude, raw.longitude)
    }
}

impl Coordinates {
    /// Create a reading, rejecting non-finite values
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidLocationError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(InvalidLocationError::NotFinite);
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_location(self.latitude, self.longitude))
    }
}

/// Render a coordinate pair as `"<lat>,<lon>"`
pub fn format_location(latitude: f64, longitude: f64) -> String {
    format!("{},{}", latitude, longitude)
}

/// Parse a `"<lat>,<lon>"` payload
///
/// Whitespace around each field is ignored. Empty fields are rejected.
pub fn parse_location(payload: &str) -> Result<Coordinates, InvalidLocationError> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != 2 {
        return Err(InvalidLocationError::FieldCount(fields.len()));
    }

    let latitude = parse_field(fields[0])?;
    let longitude = parse_field(fields[1])?;
    Coordinates::new(latitude, longitude)
}

fn parse_field(field: &str) -> Result<f64, InvalidLocationError> {
    let field = field.trim();
    field
        .parse::<f64>()
        .map_err(|_| InvalidLocationError::NotANumber(field.to_string()))
}

/// Why a location provider could not produce a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// The user or platform denied location access
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix is available right now
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Source of the device's current position
///
/// Implemented by the platform layer (GPS, network location, a fixed value
/// for tests).
pub trait LocationProvider: Send + Sync {
    /// Request the current position once
    fn current_location(&self) -> impl Future<Output = Result<Coordinates, LocationError>> + Send;
}

/// Provider that always reports the same reading
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Result<Coordinates, LocationError> {
        Ok(self.0)
    }
}

/// Provider whose permission prompt was declined
#[derive(Debug, Clone, Copy, Default)]
pub struct DeniedLocation;

impl LocationProvider for DeniedLocation {
    async fn current_location(&self) -> Result<Coordinates, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}
