//! IP Geolocation module using MaxMind GeoLite2 database
//!
//! This module provides IP-to-geographic-location lookups using the MaxMind
//! GeoLite2-City database. Users must download the database file separately
//! from MaxMind (free with registration).

pub mod cache;

pub use cache::LocationCache;

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::models::GeoLocation;

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("GeoIP database error: {0}")]
    Database(#[from] maxminddb::MaxMindDBError),

    #[error("IP address {0} not found in database")]
    NotFound(String),

    #[error("Location data missing for IP address {0}")]
    NoLocation(String),

    #[error("Invalid IP address: {0:?}")]
    InvalidAddress(String),

    #[error("Database file not found: {0}")]
    FileNotFound(String),
}

/// Maps an IP address to a geographic location
///
/// The address is taken as raw text; implementations decide how to parse it
/// and report malformed input as an error.
pub trait GeoResolver: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError>;
}

/// GeoIP lookup service using MaxMind GeoLite2-City database
///
/// Holds a single long-lived reader; clones share it. The reader is released
/// when the last clone is dropped.
///
/// # Example
///
/// ```ignore
/// use geovelocity::geolocation::{GeoResolver, MaxMindResolver};
///
/// let resolver = MaxMindResolver::new("GeoLite2-City.mmdb")?;
/// let location = resolver.lookup("8.8.8.8")?;
/// println!("Location: {}, {}", location.latitude, location.longitude);
/// ```
pub struct MaxMindResolver {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindResolver {
    /// Open a MaxMind database file
    ///
    /// # Errors
    ///
    /// Returns an error if the database file cannot be opened or is invalid.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, GeoError> {
        let path = db_path.as_ref();
        if !path.exists() {
            return Err(GeoError::FileNotFound(path.display().to_string()));
        }

        let reader = Reader::open_readfile(path)?;
        log::info!("Opened GeoIP database {}", path.display());
        Ok(MaxMindResolver {
            reader: Arc::new(reader),
        })
    }

    fn lookup_addr(&self, raw: &str, ip: IpAddr) -> Result<GeoLocation, GeoError> {
        let city: geoip2::City = self.reader.lookup(ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => {
                GeoError::NotFound(raw.to_string())
            }
            other => GeoError::Database(other),
        })?;

        let location = city
            .location
            .ok_or_else(|| GeoError::NoLocation(raw.to_string()))?;
        let latitude = location
            .latitude
            .ok_or_else(|| GeoError::NoLocation(raw.to_string()))?;
        let longitude = location
            .longitude
            .ok_or_else(|| GeoError::NoLocation(raw.to_string()))?;

        Ok(GeoLocation {
            latitude,
            longitude,
            accuracy_radius: location.accuracy_radius.unwrap_or(0),
        })
    }
}

impl GeoResolver for MaxMindResolver {
    fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        let addr = IpAddr::from_str(ip).map_err(|_| GeoError::InvalidAddress(ip.to_string()))?;
        self.lookup_addr(ip, addr)
    }
}

impl Clone for MaxMindResolver {
    fn clone(&self) -> Self {
        MaxMindResolver {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a GeoLite2-City.mmdb file to be present.
    // They will be skipped if the file is not available.

    fn get_test_resolver() -> Option<MaxMindResolver> {
        let paths = [
            "GeoLite2-City.mmdb",
            "../GeoLite2-City.mmdb",
            "assets/GeoLite2-City.mmdb",
            "/GeoLite2/GeoLite2-City.mmdb",
        ];

        paths.iter().find_map(|path| MaxMindResolver::new(path).ok())
    }

    #[test]
    fn test_file_not_found() {
        let result = MaxMindResolver::new("nonexistent.mmdb");
        assert!(matches!(result, Err(GeoError::FileNotFound(_))));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a maxmind database").unwrap();

        let result = MaxMindResolver::new(file.path());
        assert!(matches!(result, Err(GeoError::Database(_))));
    }

    #[test]
    fn test_malformed_address() {
        if let Some(resolver) = get_test_resolver() {
            let result = resolver.lookup("not-an-ip");
            assert!(matches!(result, Err(GeoError::InvalidAddress(_))));
        }
    }

    #[test]
    fn test_private_ip_not_found() {
        if let Some(resolver) = get_test_resolver() {
            assert!(resolver.lookup("192.168.1.1").is_err());
        }
    }

    #[test]
    fn test_public_ip_lookup() {
        if let Some(resolver) = get_test_resolver() {
            // Coverage of any single address varies between database releases
            if let Ok(location) = resolver.lookup("123.192.212.224") {
                assert!(location.latitude >= -90.0 && location.latitude <= 90.0);
                assert!(location.longitude >= -180.0 && location.longitude <= 180.0);
            }
        }
    }
}
