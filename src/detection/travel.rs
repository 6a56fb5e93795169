//! Great-circle distance and implied travel speed between two logins

use crate::models::GeoLocation;

/// Speeds strictly above this many miles per hour are implausible
pub const SPEED_THRESHOLD_MPH: f64 = 500.0;

const EARTH_RADIUS_MILES: f64 = 3958.0;
const EARTH_RADIUS_KM: f64 = 6371.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Distance between two points in both units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub miles: f64,
    pub kilometers: f64,
}

/// Full breakdown of one classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelAssessment {
    pub distance: Distance,
    pub elapsed_hours: f64,
    /// Miles per hour; infinite when both logins share a timestamp
    pub speed_mph: f64,
    pub suspicious: bool,
}

/// Classifies travel between two geolocated, timestamped logins
#[derive(Debug, Clone, Copy)]
pub struct TravelClassifier {
    threshold_mph: f64,
}

impl TravelClassifier {
    pub fn new() -> Self {
        TravelClassifier {
            threshold_mph: SPEED_THRESHOLD_MPH,
        }
    }

    pub fn with_threshold(threshold_mph: f64) -> Self {
        TravelClassifier { threshold_mph }
    }

    pub fn threshold_mph(&self) -> f64 {
        self.threshold_mph
    }

    /// Implied speed between two logins and whether it is suspicious
    pub fn classify(
        &self,
        new_location: &GeoLocation,
        new_timestamp: i64,
        neighbor_location: &GeoLocation,
        neighbor_timestamp: i64,
    ) -> (f64, bool) {
        let assessment = self.assess(new_location, new_timestamp, neighbor_location, neighbor_timestamp);
        (assessment.speed_mph, assessment.suspicious)
    }

    pub fn assess(
        &self,
        new_location: &GeoLocation,
        new_timestamp: i64,
        neighbor_location: &GeoLocation,
        neighbor_timestamp: i64,
    ) -> TravelAssessment {
        let distance = haversine_distance(new_location, neighbor_location);
        let elapsed_hours = elapsed_hours(new_timestamp, neighbor_timestamp);

        // Simultaneous logins are infinitely fast, including from the same spot
        let speed_mph = if elapsed_hours == 0.0 {
            f64::INFINITY
        } else {
            distance.miles / elapsed_hours
        };

        TravelAssessment {
            distance,
            elapsed_hours,
            speed_mph,
            suspicious: self.is_suspicious_speed(speed_mph),
        }
    }

    pub fn is_suspicious_speed(&self, speed_mph: f64) -> bool {
        speed_mph > self.threshold_mph
    }
}

impl Default for TravelClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute time between two Unix timestamps, in fractional hours
pub fn elapsed_hours(a: i64, b: i64) -> f64 {
    a.abs_diff(b) as f64 / SECONDS_PER_HOUR
}

/// Calculate the great-circle distance between two points using the Haversine formula
pub fn haversine_distance(loc1: &GeoLocation, loc2: &GeoLocation) -> Distance {
    let lat1_rad = loc1.latitude.to_radians();
    let lat2_rad = loc2.latitude.to_radians();
    let delta_lat = lat2_rad - lat1_rad;
    let delta_lon = loc2.longitude.to_radians() - loc1.longitude.to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    Distance {
        miles: c * EARTH_RADIUS_MILES,
        kilometers: c * EARTH_RADIUS_KM,
    }
}
