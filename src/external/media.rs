//! Media ingestion: turns transport attachments into durable references.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::workflows::{GeoPoint, PhotoRef};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    #[error("attachment {0} not found")]
    NotFound(String),
    #[error("attachment rejected: {0}")]
    Invalid(String),
    #[error("media service unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait MediaIngestion: Send + Sync {
    async fn resolve_photo(&self, attachment_id: &str) -> Result<PhotoRef, MediaError>;

    /// Normalize a shared location into a coordinate pair.
    async fn resolve_location(&self, latitude: f64, longitude: f64)
        -> Result<GeoPoint, MediaError>;
}
