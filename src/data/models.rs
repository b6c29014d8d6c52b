//! Data models
//!
//! Rust structs for pins and their wire documents. Ids are ULIDs generated
//! client-side before the first write; timestamps are chrono UTC.
//!
//! The wire document uses the remote store's exact field spellings
//! (`videoURL`, `userId`, `deviceID`) in one place only; everything else in
//! the crate is snake_case.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::geo::Coordinate;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Incident Type
// =============================================================================

/// Category of a reported incident
///
/// The wire identifier (persisted) and the display identifier (presented)
/// diverge for `Emergency` and must never be confused: the store holds
/// "911", the UI shows "Emergency".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentType {
    Verbal,
    Physical,
    Emergency,
}

impl IncidentType {
    /// Stable identifier used for persistence
    pub fn wire_id(&self) -> &'static str {
        match self {
            Self::Verbal => "Verbal",
            Self::Physical => "Physical",
            Self::Emergency => "911",
        }
    }

    /// Identifier used for presentation
    pub fn display_id(&self) -> &'static str {
        match self {
            Self::Verbal => "Verbal",
            Self::Physical => "Physical",
            Self::Emergency => "Emergency",
        }
    }

    /// Parse a wire identifier
    ///
    /// # Errors
    /// Returns `Validation` for anything outside the closed set
    pub fn from_wire(value: &str) -> Result<Self, EngineError> {
        match value {
            "Verbal" => Ok(Self::Verbal),
            "Physical" => Ok(Self::Physical),
            "911" => Ok(Self::Emergency),
            other => Err(EngineError::Validation(format!(
                "unknown incident type {:?}",
                other
            ))),
        }
    }
}

// =============================================================================
// Local video reference
// =============================================================================

/// A video file on the local device, pending upload
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVideo {
    pub path: PathBuf,
    /// MIME type, e.g. "video/mp4"
    pub content_type: String,
}

// =============================================================================
// Pin
// =============================================================================

/// A not-yet-persisted candidate pin
///
/// Exists only between validator acceptance and successful persistence;
/// discarded on any terminal failure.
#[derive(Debug, Clone)]
pub struct PinDraft {
    pub coordinate: Coordinate,
    pub incident_type: IncidentType,
    pub video: Option<LocalVideo>,
}

/// A persisted incident report
///
/// `video_url` is the empty string until an upload job succeeds; readers
/// treat empty as "no video", not as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub id: EntityId,
    pub coordinate: Coordinate,
    pub incident_type: IncidentType,
    pub video_url: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub device_id: String,
}

impl Pin {
    /// True if this pin has an attached video
    pub fn has_video(&self) -> bool {
        !self.video_url.is_empty()
    }
}

// =============================================================================
// Wire document
// =============================================================================

/// The exact document shape stored remotely, keyed by pin id
///
/// The store's write policy requires every field present, coordinates in
/// range, a valid `type`, and `userId` matching the authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinDocument {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub incident_type: String,
    #[serde(rename = "videoURL")]
    pub video_url: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "deviceID")]
    pub device_id: String,
}

impl From<&Pin> for PinDocument {
    fn from(pin: &Pin) -> Self {
        Self {
            latitude: pin.coordinate.latitude(),
            longitude: pin.coordinate.longitude(),
            incident_type: pin.incident_type.wire_id().to_string(),
            video_url: pin.video_url.clone(),
            user_id: pin.owner_id.clone(),
            timestamp: pin.created_at,
            device_id: pin.device_id.clone(),
        }
    }
}

impl PinDocument {
    /// Rehydrate a pin from its document and id
    ///
    /// # Errors
    /// Returns `Validation` for out-of-range coordinates or an unknown
    /// incident type (a foreign or corrupted document)
    pub fn into_pin(self, id: EntityId) -> Result<Pin, EngineError> {
        Ok(Pin {
            id,
            coordinate: Coordinate::new(self.latitude, self.longitude)?,
            incident_type: IncidentType::from_wire(&self.incident_type)?,
            video_url: self.video_url,
            owner_id: self.user_id,
            created_at: self.timestamp,
            device_id: self.device_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pin() -> Pin {
        Pin {
            id: EntityId::new(),
            coordinate: Coordinate::new(40.0, -73.0).unwrap(),
            incident_type: IncidentType::Emergency,
            video_url: String::new(),
            owner_id: "user-1".to_string(),
            created_at: Utc::now(),
            device_id: "device-1".to_string(),
        }
    }

    #[test]
    fn emergency_wire_and_display_ids_diverge() {
        assert_eq!(IncidentType::Emergency.wire_id(), "911");
        assert_eq!(IncidentType::Emergency.display_id(), "Emergency");
        // Round-trip goes through the wire id, not the display id
        assert_eq!(
            IncidentType::from_wire("911").unwrap(),
            IncidentType::Emergency
        );
        assert!(IncidentType::from_wire("Emergency").is_err());
    }

    #[test]
    fn wire_ids_round_trip() {
        for incident_type in [
            IncidentType::Verbal,
            IncidentType::Physical,
            IncidentType::Emergency,
        ] {
            assert_eq!(
                IncidentType::from_wire(incident_type.wire_id()).unwrap(),
                incident_type
            );
        }
    }

    #[test]
    fn document_uses_exact_wire_field_names() {
        let document = PinDocument::from(&test_pin());
        let json = serde_json::to_value(&document).unwrap();

        for field in [
            "latitude",
            "longitude",
            "type",
            "videoURL",
            "userId",
            "timestamp",
            "deviceID",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["type"], "911");
    }

    #[test]
    fn document_round_trips_to_pin() {
        let pin = test_pin();
        let document = PinDocument::from(&pin);
        let rehydrated = document.into_pin(pin.id.clone()).unwrap();
        assert_eq!(rehydrated, pin);
    }

    #[test]
    fn corrupt_document_is_rejected() {
        let pin = test_pin();
        let mut document = PinDocument::from(&pin);
        document.incident_type = "Gossip".to_string();
        assert!(document.into_pin(pin.id.clone()).is_err());

        let mut document = PinDocument::from(&pin);
        document.latitude = 123.4;
        assert!(document.into_pin(pin.id).is_err());
    }

    #[test]
    fn empty_video_url_means_no_video() {
        let mut pin = test_pin();
        assert!(!pin.has_video());
        pin.video_url = "https://media.example.com/videos/u/p.mp4".to_string();
        assert!(pin.has_video());
    }
}
