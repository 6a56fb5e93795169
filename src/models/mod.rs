mod login;
mod validation;

pub use login::{ClassifiedNeighbor, DetectionResult, GeoLocation, LoginEvent, StoredLogin};
pub use validation::ValidationErrors;
