pub mod core;
pub mod diffing;
pub mod language;
pub mod monitor;
pub mod ocr;
pub mod source;
pub mod tesseract;

pub use crate::core::{
    CandidateFrame, CaptureConfig, CaptureScheduler, CaptureState, ControlMessage,
    DEFAULT_SAMPLE_INTERVAL,
};
pub use diffing::{is_distinct, DEFAULT_DIFF_THRESHOLD};
pub use language::Language;
pub use monitor::MonitorSource;
pub use ocr::{
    downscale_to_fit, EnrichmentQueue, EnrichmentSink, ExtractError, TextExtractor,
    DEFAULT_MAX_DIMENSION, DEFAULT_WORKERS,
};
pub use source::{CaptureError, CaptureSource, SourceFactory};
pub use tesseract::TesseractExtractor;
