//! xcap-backed capture source grabbing the primary monitor.

use crate::source::{CaptureError, CaptureSource};
use image::RgbaImage;
use tracing::debug;
use xcap::Monitor;

pub struct MonitorSource {
    monitor: Monitor,
}

impl MonitorSource {
    /// Acquire the primary monitor (first listed when none is marked
    /// primary).
    pub fn acquire() -> Result<Self, CaptureError> {
        let monitors =
            Monitor::all().map_err(|e| CaptureError::Transient(e.to_string()))?;
        let monitor = monitors
            .into_iter()
            .next()
            .ok_or(CaptureError::Ended)?;
        debug!("acquired primary monitor for capture");
        Ok(Self { monitor })
    }
}

impl CaptureSource for MonitorSource {
    fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        self.monitor
            .capture_image()
            .map_err(|e| CaptureError::Transient(e.to_string()))
    }
}
