pub mod alerting;
pub mod api;
pub mod config;
pub mod detection;
pub mod geolocation;
pub mod models;
pub mod output;
pub mod persistence;

// Re-export commonly used types
pub use models::{ClassifiedNeighbor, DetectionResult, GeoLocation, LoginEvent, StoredLogin};
pub use detection::{DetectionError, DetectionPipeline, NeighborSearch, TravelClassifier};
pub use geolocation::{GeoResolver, LocationCache, MaxMindResolver};
pub use persistence::{EventStore, SqliteEventStore};
pub use alerting::{AlertDispatcher, AlertQueue};
