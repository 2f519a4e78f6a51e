//! Tesseract-backed text extraction.

use crate::language::Language;
use crate::ocr::{ExtractError, TextExtractor};
use async_trait::async_trait;
use image::DynamicImage;
use rusty_tesseract::{Args, Image};
use std::collections::HashMap;

#[derive(Default)]
pub struct TesseractExtractor;

impl TesseractExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// Tesseract reports all failures as strings; sort them into the retryable
/// buckets by message content.
fn classify_error(message: String) -> ExtractError {
    let lower = message.to_lowercase();
    if lower.contains("tessdata") || lower.contains("lang") {
        ExtractError::Language(message)
    } else if lower.contains("memory") || lower.contains("alloc") {
        ExtractError::Resource(message)
    } else {
        ExtractError::Other(message)
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(
        &self,
        image: &DynamicImage,
        language: Language,
    ) -> Result<String, ExtractError> {
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let args = Args {
                lang: language.backend_code().to_string(),
                config_variables: HashMap::new(),
                dpi: Some(600),
                psm: Some(1),
                oem: Some(1),
            };
            let input = Image::from_dynamic_image(&image)
                .map_err(|e| ExtractError::Other(e.to_string()))?;
            rusty_tesseract::image_to_string(&input, &args)
                .map(|text| text.trim().to_string())
                .map_err(|e| classify_error(e.to_string()))
        })
        .await
        .map_err(|e| ExtractError::Other(format!("extraction task panicked: {e}")))?
    }
}
