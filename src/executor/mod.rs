//! External job execution

pub mod image;
pub mod response;
pub mod subprocess;

use async_trait::async_trait;
pub use image::{
    CatalogImageResolver, FrameworkImage, ImageDescriptor, ImageError, ImageRequest,
    ImageResolver, ImageSource,
};
pub use response::{JobError, JobRequest, JobResult};
pub use subprocess::SubprocessExecutor;

/// Trait for job execution - allows for different implementations
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one data job to completion
    async fn execute(&self, request: JobRequest) -> Result<JobResult, JobError>;
}
