use leptess::tesseract::TessApi;
use opencv::prelude::*;
use plate_watch_common::config::OcrConfig;
use std::ffi::CString;
use tracing::info;

/// Turns a grayscale candidate region into text.
pub trait TextRecognizer {
    /// Returns the recognized text with surrounding whitespace removed.
    /// An empty string is a valid answer.
    fn recognize(&mut self, region: &Mat) -> Result<String, OcrError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("failed to initialize Tesseract: {0}")]
    Init(String),
    #[error("failed to set Tesseract variable {0}: {1}")]
    Variable(String, String),
    #[error("region is not a contiguous 8-bit grayscale image: {0}")]
    Region(String),
    #[error("Tesseract recognition failed: {0}")]
    Recognize(String),
}

/// Tesseract, configured for a single line of text per image.
pub struct TesseractRecognizer {
    api: TessApi,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Result<Self, OcrError> {
        let mut api = TessApi::new(config.data_path.as_deref(), &config.language)
            .map_err(|e| OcrError::Init(format!("{e:?}")))?;

        let psm = config.page_seg_mode.to_string();
        set_variable(&mut api, "tessedit_pageseg_mode", &psm)?;

        info!(
            language = config.language,
            page_seg_mode = config.page_seg_mode,
            "Tesseract initialized"
        );
        Ok(Self { api })
    }
}

fn set_variable(api: &mut TessApi, name: &str, value: &str) -> Result<(), OcrError> {
    let as_cstring =
        |s: &str| CString::new(s).map_err(|e| OcrError::Variable(name.to_string(), e.to_string()));
    api.raw
        .set_variable(&as_cstring(name)?, &as_cstring(value)?)
        .map_err(|e| OcrError::Variable(name.to_string(), format!("{e:?}")))
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&mut self, region: &Mat) -> Result<String, OcrError> {
        if region.channels() != 1 || !region.is_continuous() {
            return Err(OcrError::Region(format!("{region:?}")));
        }
        let cols = region.cols();
        let rows = region.rows();
        let bytes = region
            .data_bytes()
            .map_err(|e| OcrError::Region(e.to_string()))?;

        self.api
            .raw
            .set_image(bytes, cols, rows, 1, cols)
            .map_err(|e| OcrError::Recognize(format!("{e:?}")))?;
        let text = self
            .api
            .get_utf8_text()
            .map_err(|e| OcrError::Recognize(format!("{e:?}")))?;

        Ok(clean_text(&text))
    }
}

/// Tesseract ends every line with a newline and may pad with spaces.
pub fn clean_text(raw: &str) -> String {
    raw.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_trims_both_ends_only() {
        assert_eq!(clean_text("AB 12 CD 3456\n"), "AB 12 CD 3456");
        assert_eq!(clean_text("  WB 74 AH 6561 \n\n"), "WB 74 AH 6561");
        assert_eq!(clean_text("AB  12"), "AB  12");
    }

    #[test]
    fn clean_text_of_blank_output_is_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n\t\n"), "");
    }
}
