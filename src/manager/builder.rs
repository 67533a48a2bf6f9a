// ABOUTME: Image builder collaborator contract.
// ABOUTME: The build subsystem is external; only this narrow seam is consumed.

use crate::types::ImageId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from builder initialization.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("image builder initialization failed: {0}")]
    Init(String),
}

/// Request to build an image from a Dockerfile.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub dockerfile_path: PathBuf,
    pub build_context: PathBuf,
    pub image_tag: String,
}

/// Identity of a built image.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Tag to run the built image under.
    pub tag: String,
    pub image_id: Option<ImageId>,
}

/// Outcome of a build. Failure is a value, not an error; the create flow
/// falls back to the configured image when `success` is false.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub image: Option<ImageInfo>,
    pub error: Option<String>,
    pub build_output: String,
    pub build_duration: Duration,
    /// Whether the image was actually rebuilt or served from cache.
    pub rebuilt: bool,
}

/// The image-build subsystem, wired in by the caller.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn initialize(&self) -> Result<(), BuildError>;

    async fn build_image(&self, request: BuildRequest) -> BuildResult;
}
