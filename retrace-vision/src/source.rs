//! Capture source seam. The pipeline depends only on this shape, not on
//! the acquisition mechanism.

use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Single grab failed; the loop retries with backoff.
    #[error("transient capture error: {0}")]
    Transient(String),

    /// The source terminated (grant revoked, display gone). Terminal for
    /// the session; restart only happens while user intent is still active.
    #[error("capture source ended")]
    Ended,
}

/// One acquired visual source. Dropping it releases the underlying grant.
pub trait CaptureSource: Send {
    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError>;
}

/// Re-acquires a source for each capture session and recovery attempt.
pub type SourceFactory =
    dyn Fn() -> Result<Box<dyn CaptureSource>, CaptureError> + Send + Sync;
