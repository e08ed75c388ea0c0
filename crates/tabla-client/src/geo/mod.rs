//! Geolocation: permission, position requests, the persisted last-known
//! coordinate and distance helpers.

mod distance;
mod provider;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::GeolocationConfig;

pub use distance::{EARTH_RADIUS_KM, distance_km, format_distance, sort_by_distance};
pub use provider::{GeolocationProvider, GeolocationState};

/// Position request failures. None of them is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("Location permission was denied")]
    PermissionDenied,

    #[error("Timed out waiting for a location fix")]
    Timeout,

    #[error("Location unavailable: {0}")]
    PositionUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within ±90 and longitude within ±180.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A position fix as persisted under the location storage key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Position {
    pub fn new(coordinates: Coordinates, accuracy: Option<f64>, timestamp: OffsetDateTime) -> Self {
        Self {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            accuracy,
            timestamp,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Whether the fix is older than `max_age` at `now`.
    pub fn is_older_than(&self, max_age: Duration, now: OffsetDateTime) -> bool {
        let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX);
        now - self.timestamp > max_age
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
        })
    }
}

/// Options for a single position request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// A remembered fix younger than this is returned without asking the
    /// platform.
    pub maximum_age: Duration,
}

impl PositionOptions {
    pub const DEFAULT_MAXIMUM_AGE: Duration = Duration::from_secs(5 * 60);

    pub fn from_config(config: &GeolocationConfig) -> Self {
        Self {
            high_accuracy: config.high_accuracy,
            timeout: config.timeout,
            maximum_age: Self::DEFAULT_MAXIMUM_AGE,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_maximum_age(mut self, maximum_age: Duration) -> Self {
        self.maximum_age = maximum_age;
        self
    }

    pub fn with_high_accuracy(mut self, high_accuracy: bool) -> Self {
        self.high_accuracy = high_accuracy;
        self
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::from_config(&GeolocationConfig::default())
    }
}

/// Platform access to the device position.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn permission(&self) -> PermissionState;

    async fn current_position(&self, high_accuracy: bool) -> Result<Position, GeoError>;
}

/// Source with a user-supplied coordinate, or none at all.
#[derive(Debug, Clone, Default)]
pub struct FixedPositionSource {
    coordinates: Option<Coordinates>,
}

impl FixedPositionSource {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            coordinates: Some(coordinates),
        }
    }

    /// A source that never has a position.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionSource for FixedPositionSource {
    async fn permission(&self) -> PermissionState {
        if self.coordinates.is_some() {
            PermissionState::Granted
        } else {
            PermissionState::Prompt
        }
    }

    async fn current_position(&self, _high_accuracy: bool) -> Result<Position, GeoError> {
        let coordinates = self
            .coordinates
            .ok_or_else(|| GeoError::PositionUnavailable("no coordinates provided".into()))?;
        if !coordinates.is_valid() {
            return Err(GeoError::PositionUnavailable(format!(
                "invalid coordinates {}, {}",
                coordinates.latitude, coordinates.longitude
            )));
        }
        Ok(Position::new(coordinates, None, OffsetDateTime::now_utc()))
    }
}
