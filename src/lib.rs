// cyoa_pipeline: client-side image pipeline for the CYOA catalog upload form.
// Card cropper, ordered page list, tall-page splitter and upload preparation.
// Everything pixel-related happens here; JS only moves bytes and events.

mod cache;
mod codec;
mod compressor;
mod debounce;
mod error;
mod form;
mod pages;
mod prepare;
mod preview;
mod splitter;
mod types;

use wasm_bindgen::prelude::*;

pub use cache::{default_backend, CacheBackend, CacheStore, MemoryBackend, WasmCache};
pub use codec::{decode_rgba, encode, read_dimensions, OutputFormat};
pub use compressor::{CardCropper, CardSummary, WasmCardCropper, CARD_FILENAME};
pub use debounce::Debouncer;
pub use error::PipelineError;
pub use form::{
    ContentKind, FormIssue, GameDraft, PartValue, SubmissionPart, TagCategory, TagRef, WasmGameForm,
    WasmSubmission, GAMES_COLLECTION,
};
pub use pages::{PageEntry, PageId, PageList, WasmPageList};
pub use prepare::{
    prepare_page, prepare_pages as prepare_files, quality_steps, PreparedOutcome, PreparedPage,
    WasmPreparedPages,
};
pub use preview::{default_registry, MemoryPreviews, PreviewRegistry, PreviewUrl, StagedImage};
pub use splitter::{
    ImageSplitter, SplitOutcome, SplitPlan, SplitPreview, SplitThreshold, SplitterState, WasmImageSplitter,
};
pub use types::*;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

pub(crate) fn to_js(err: PipelineError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// True when a page of this height must be split before upload.
#[wasm_bindgen]
pub fn needs_split(height: u32) -> bool {
    PixelSize::new(0, height).exceeds_canvas_limit(MAX_CANVAS_DIMENSION)
}

/// Prepare the list's pages for upload, in order.
#[wasm_bindgen]
pub fn prepare_pages(pages: &WasmPageList) -> Result<WasmPreparedPages, JsValue> {
    let prepared = prepare::prepare_pages(&pages.files(), pages.page_settings()).map_err(to_js)?;
    Ok(WasmPreparedPages::new(prepared))
}
