//! Coordinates, location fixes, and the pin-drop validator
//!
//! A pin may only be dropped within a fixed radius of the user's latest
//! location fix. The radius is a hard product rule (200 feet), converted at
//! exactly 0.3048 m/ft so the boundary is reproducible in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Drop radius product rule: 200 feet
pub const DROP_RADIUS_FEET: f64 = 200.0;

/// Exact feet-to-meters conversion factor
pub const METERS_PER_FOOT: f64 = 0.3048;

/// Drop radius in meters (60.96)
pub const DROP_RADIUS_M: f64 = DROP_RADIUS_FEET * METERS_PER_FOOT;

/// Mean Earth radius in meters, for great-circle distance
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate
///
/// Construction validates ranges, so a held `Coordinate` is always finite
/// and within [-90, 90] / [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Create a validated coordinate
    ///
    /// # Errors
    /// Returns `Validation` if either component is non-finite or out of range
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, EngineError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(EngineError::Validation(
                "coordinate components must be finite".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(EngineError::Validation(format!(
                "latitude {} out of range [-90, 90]",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(EngineError::Validation(format!(
                "longitude {} out of range [-180, 180]",
                longitude
            )));
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

    /// Great-circle distance to another coordinate, in meters
    ///
    /// Haversine on a mean-radius sphere. Symmetric, and wraparound-safe
    /// across the antimeridian.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        // Rounding can push `a` fractionally above 1 for near-antipodal
        // pairs, which would make asin return NaN.
        let a = ((dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2))
        .min(1.0);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

/// A single timestamped location reading
///
/// Owned by the location stream; immutable once created and replaced
/// wholesale on each update, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    /// Horizontal accuracy radius reported by the provider, in meters
    pub accuracy_m: f64,
}

impl Fix {
    /// True if this fix is older than the staleness window
    pub fn is_stale(&self, staleness: std::time::Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        match chrono::Duration::from_std(staleness) {
            Ok(window) => age > window,
            // Window too large for chrono means nothing is stale
            Err(_) => false,
        }
    }
}

/// Validator verdict for a candidate drop coordinate
#[derive(Debug, Clone, PartialEq)]
pub enum DropDecision {
    Accept,
    Reject(RejectReason),
}

/// Why a candidate drop was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// No fix, or the latest fix is stale. Treated as "unknown", never as
    /// "out of range".
    LocationUnknown,
    /// Candidate is outside the drop radius
    TooFar {
        /// Measured distance in meters
        distance_m: f64,
    },
}

/// Validate a candidate drop coordinate against the latest fix
///
/// # Arguments
/// * `candidate` - Where the user wants to drop the pin
/// * `fix` - Latest location fix, if any
/// * `staleness` - Maximum acceptable fix age
///
/// # Returns
/// `Accept` iff the fix is present, fresh, and within `DROP_RADIUS_M`
pub fn validate_drop(
    candidate: &Coordinate,
    fix: Option<&Fix>,
    staleness: std::time::Duration,
) -> DropDecision {
    let now = Utc::now();

    let fix = match fix {
        Some(fix) if !fix.is_stale(staleness, now) => fix,
        _ => return DropDecision::Reject(RejectReason::LocationUnknown),
    };

    let distance_m = fix.coordinate.distance_m(candidate);
    if distance_m <= DROP_RADIUS_M {
        DropDecision::Accept
    } else {
        DropDecision::Reject(RejectReason::TooFar { distance_m })
    }
}
