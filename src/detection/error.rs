use std::time::Duration;
use thiserror::Error;

use super::neighbors::NeighborSearchError;
use crate::geolocation::GeoError;
use crate::models::ValidationErrors;
use crate::persistence::PersistenceError;

/// Failure of one detection request
///
/// Validation problems are the caller's fault; everything else is internal.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid login event: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Server-side failure while processing a valid login
#[derive(Error, Debug)]
pub enum InternalError {
    #[error("geolocation failed: {0}")]
    Geo(#[from] GeoError),

    #[error("neighbor search failed: {0}")]
    Neighbors(#[from] NeighborSearchError),

    #[error("persisting login failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("detection timed out after {0:?}")]
    Timeout(Duration),
}

impl DetectionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DetectionError::Validation(_))
    }
}
