use serde::{Deserialize, Serialize};

use super::ValidationErrors;

/// Geographic coordinates resolved for an IP address
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Provider-reported uncertainty in kilometers
    #[serde(rename = "radius", default, skip_serializing_if = "is_zero_radius")]
    pub accuracy_radius: u16,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64, accuracy_radius: u16) -> Self {
        GeoLocation {
            latitude,
            longitude,
            accuracy_radius,
        }
    }
}

/// A login as received from the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginEvent {
    #[serde(rename = "username", skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(rename = "ip_address", skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Seconds since the Unix epoch
    #[serde(rename = "unix_timestamp", skip_serializing_if = "is_zero_timestamp")]
    pub timestamp: i64,
    #[serde(rename = "event_uuid", skip_serializing_if = "String::is_empty")]
    pub event_id: String,
}

impl LoginEvent {
    pub fn new(
        user: impl Into<String>,
        ip: impl Into<String>,
        timestamp: i64,
        event_id: impl Into<String>,
    ) -> Self {
        LoginEvent {
            user: user.into(),
            ip: ip.into(),
            timestamp,
            event_id: event_id.into(),
        }
    }

    /// Check required fields, reporting every violation
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.ip.is_empty() {
            errors.add("ip_address", "ip_address is missing from the event");
        }
        if self.user.is_empty() {
            errors.add("username", "username is missing from the event");
        }
        if self.timestamp <= 0 {
            errors.add("unix_timestamp", "unix_timestamp must be a positive number of seconds");
        }
        if self.event_id.is_empty() {
            errors.add("event_uuid", "event_uuid is missing from the event");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A login as held by the event store, with its resolved location
///
/// `speed` is whatever was stored when the login was recorded; it is never
/// recomputed on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredLogin {
    #[serde(rename = "username")]
    pub user: String,
    #[serde(rename = "unix_timestamp")]
    pub timestamp: i64,
    #[serde(rename = "event_uuid")]
    pub event_id: String,
    #[serde(rename = "ip_address")]
    pub ip: String,
    #[serde(flatten)]
    pub location: GeoLocation,
    #[serde(default, skip_serializing_if = "is_zero_speed")]
    pub speed: f64,
}

impl StoredLogin {
    /// Build the record persisted for a freshly processed login
    ///
    /// A login has no implied speed relative to itself, so `speed` starts at zero.
    pub fn from_event(event: &LoginEvent, location: GeoLocation) -> Self {
        StoredLogin {
            user: event.user.clone(),
            timestamp: event.timestamp,
            event_id: event.event_id.clone(),
            ip: event.ip.clone(),
            location,
            speed: 0.0,
        }
    }
}

/// A neighboring login classified against the login being processed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedNeighbor {
    #[serde(flatten)]
    pub event: StoredLogin,
    /// Miles per hour between the neighbor and the new login
    #[serde(rename = "impliedSpeed")]
    pub implied_speed: f64,
    #[serde(rename = "suspiciousTravel")]
    pub suspicious: bool,
}

/// Outcome of running one login through the detection pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    #[serde(rename = "currentGeo")]
    pub current_geo: GeoLocation,
    #[serde(rename = "precedingIpAccess", skip_serializing_if = "Option::is_none")]
    pub preceding: Option<ClassifiedNeighbor>,
    #[serde(rename = "subsequentIpAccess", skip_serializing_if = "Option::is_none")]
    pub subsequent: Option<ClassifiedNeighbor>,
}

impl DetectionResult {
    /// True if travel to or from either neighbor is implausible
    pub fn is_suspicious(&self) -> bool {
        self.neighbors().any(|n| n.suspicious)
    }

    pub fn neighbors(&self) -> impl Iterator<Item = &ClassifiedNeighbor> {
        self.preceding.iter().chain(self.subsequent.iter())
    }
}

fn is_zero_radius(radius: &u16) -> bool {
    *radius == 0
}

fn is_zero_timestamp(ts: &i64) -> bool {
    *ts == 0
}

fn is_zero_speed(speed: &f64) -> bool {
    *speed == 0.0
}
