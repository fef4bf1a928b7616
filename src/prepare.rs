// Upload preparation for page images. Runs one page at a time in page order;
// output order always equals input order.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::codec::{self, OutputFormat};
use crate::error::PipelineError;
use crate::types::{PageSettings, StagedFile};

/// How a page ended up in the upload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreparedOutcome {
    /// Re-encoded as lossless WebP.
    Encoded,
    /// Could not be decoded; uploaded as selected.
    PassedThrough,
    /// Lossless output was over the upload limit; JPEG at this quality.
    JpegFallback { quality: f32 },
}

#[derive(Debug, Clone)]
pub struct PreparedPage {
    pub file: StagedFile,
    pub outcome: PreparedOutcome,
}

/// Prepare every page sequentially. The first encode failure aborts the whole run.
pub fn prepare_pages(
    files: &[StagedFile],
    settings: &PageSettings,
) -> Result<Vec<PreparedPage>, PipelineError> {
    let mut prepared = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let page = prepare_page(file, settings)?;
        log::debug!(
            "page {index} prepared as {:?}: {} -> {} bytes",
            page.outcome,
            file.size(),
            page.file.size()
        );
        prepared.push(page);
    }
    Ok(prepared)
}

pub fn prepare_page(file: &StagedFile, settings: &PageSettings) -> Result<PreparedPage, PipelineError> {
    let image = match codec::decode_rgba(&file.bytes) {
        Ok(image) => image,
        Err(err) => {
            log::warn!("passing {:?} through unchanged: {err}", file.name);
            return Ok(PreparedPage {
                file: file.clone(),
                outcome: PreparedOutcome::PassedThrough,
            });
        }
    };

    let format = OutputFormat::WebpLossless;
    let bytes = codec::encode(&image, format)?;
    if bytes.len() <= settings.max_upload_bytes {
        return Ok(PreparedPage {
            file: StagedFile::new(
                codec::with_extension(&file.name, format.extension()),
                format.mime(),
                bytes,
            ),
            outcome: PreparedOutcome::Encoded,
        });
    }

    log::info!(
        "{:?} is {} bytes as lossless WebP, over the {} byte limit",
        file.name,
        bytes.len(),
        settings.max_upload_bytes
    );
    let mut last = None;
    for quality in quality_steps(settings) {
        let format = OutputFormat::Jpeg { quality };
        let bytes = codec::encode(&image, format)?;
        let fits = bytes.len() <= settings.max_upload_bytes;
        last = Some((bytes, quality));
        if fits {
            break;
        }
    }
    // quality_steps always yields at least one value
    let (bytes, quality) = last.ok_or_else(|| PipelineError::Encode("no fallback quality".into()))?;
    let format = OutputFormat::Jpeg { quality };
    Ok(PreparedPage {
        file: StagedFile::new(
            codec::with_extension(&file.name, format.extension()),
            format.mime(),
            bytes,
        ),
        outcome: PreparedOutcome::JpegFallback { quality },
    })
}

/// Qualities tried by the JPEG fallback: 1.0 stepping down to the floor, floor included.
pub fn quality_steps(settings: &PageSettings) -> Vec<f32> {
    // Hundredths avoid float drift in the loop.
    let floor = (settings.min_fallback_quality * 100.0).round().clamp(1.0, 100.0) as u32;
    let step = ((settings.quality_step * 100.0).round() as u32).max(1);
    let mut steps = Vec::new();
    let mut quality = 100;
    loop {
        steps.push(quality as f32 / 100.0);
        if quality <= floor {
            break;
        }
        quality = quality.saturating_sub(step).max(floor);
    }
    steps
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// Prepared pages handed back to JS for the multipart upload.
#[wasm_bindgen]
pub struct WasmPreparedPages {
    pages: Vec<PreparedPage>,
}

impl WasmPreparedPages {
    pub(crate) fn new(pages: Vec<PreparedPage>) -> Self {
        WasmPreparedPages { pages }
    }

    pub(crate) fn pages(&self) -> &[PreparedPage] {
        &self.pages
    }

    fn page(&self, index: usize) -> Result<&PreparedPage, JsValue> {
        self.pages.get(index).ok_or_else(|| {
            crate::to_js(PipelineError::IndexOutOfRange {
                index,
                len: self.pages.len(),
            })
        })
    }
}

#[wasm_bindgen]
impl WasmPreparedPages {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn name(&self, index: usize) -> Result<String, JsValue> {
        Ok(self.page(index)?.file.name.clone())
    }

    pub fn mime(&self, index: usize) -> Result<String, JsValue> {
        Ok(self.page(index)?.file.mime.clone())
    }

    pub fn bytes(&self, index: usize) -> Result<Vec<u8>, JsValue> {
        Ok(self.page(index)?.file.bytes.to_vec())
    }

    /// `{"kind":"encoded"}`, `{"kind":"passed_through"}` or
    /// `{"kind":"jpeg_fallback","quality":0.85}`.
    pub fn outcome_json(&self, index: usize) -> Result<String, JsValue> {
        serde_json::to_string(&self.page(index)?.outcome)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
