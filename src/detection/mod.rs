pub mod error;
pub mod neighbors;
pub mod pipeline;
pub mod travel;

pub use error::{DetectionError, InternalError};
pub use neighbors::{NeighborSearch, NeighborSearchError, Neighbors, Side, SideFailure};
pub use pipeline::DetectionPipeline;
pub use travel::{haversine_distance, Distance, TravelAssessment, TravelClassifier, SPEED_THRESHOLD_MPH};
