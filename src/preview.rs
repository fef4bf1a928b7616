// Preview URLs for staged images. A PreviewUrl is owned by exactly one
// StagedImage and revokes itself when dropped, so replace, remove and unmount
// all release it without extra bookkeeping.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::error::PipelineError;
use crate::types::StagedFile;

/// Creates and revokes preview URLs for in-memory payloads.
pub trait PreviewRegistry {
    fn create(&self, bytes: &[u8], mime: &str) -> Result<String, PipelineError>;
    fn revoke(&self, url: &str);
}

/// Registry for native builds and tests. Hands out `mem://preview/N` URLs
/// and tracks which are still live.
#[derive(Debug, Default)]
pub struct MemoryPreviews {
    next: RefCell<u64>,
    live: RefCell<BTreeSet<String>>,
}

impl MemoryPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live.borrow().contains(url)
    }
}

impl PreviewRegistry for MemoryPreviews {
    fn create(&self, _bytes: &[u8], _mime: &str) -> Result<String, PipelineError> {
        let mut next = self.next.borrow_mut();
        *next += 1;
        let url = format!("mem://preview/{}", *next);
        self.live.borrow_mut().insert(url.clone());
        Ok(url)
    }

    fn revoke(&self, url: &str) {
        self.live.borrow_mut().remove(url);
    }
}

/// Browser object URLs (`URL.createObjectURL`).
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Default)]
pub struct ObjectUrlPreviews;

#[cfg(target_arch = "wasm32")]
impl PreviewRegistry for ObjectUrlPreviews {
    fn create(&self, bytes: &[u8], mime: &str) -> Result<String, PipelineError> {
        use web_sys::{Blob, BlobPropertyBag, Url};

        let js_err = |err: wasm_bindgen::JsValue| {
            PipelineError::Encode(err.as_string().unwrap_or_else(|| "object url failed".into()))
        };
        let parts = js_sys::Array::new();
        parts.push(&js_sys::Uint8Array::from(bytes).buffer());
        let options = BlobPropertyBag::new();
        if !mime.trim().is_empty() {
            options.set_type(mime);
        }
        let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &options).map_err(js_err)?;
        Url::create_object_url_with_blob(&blob).map_err(js_err)
    }

    fn revoke(&self, url: &str) {
        let _ = web_sys::Url::revoke_object_url(url);
    }
}

/// Object URLs in the browser, in-memory handles everywhere else.
pub fn default_registry() -> Rc<dyn PreviewRegistry> {
    #[cfg(target_arch = "wasm32")]
    {
        Rc::new(ObjectUrlPreviews)
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        Rc::new(MemoryPreviews::new())
    }
}

/// Owned preview URL. Revoked on drop.
pub struct PreviewUrl {
    url: String,
    registry: Rc<dyn PreviewRegistry>,
}

impl PreviewUrl {
    pub fn create(
        registry: &Rc<dyn PreviewRegistry>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<Self, PipelineError> {
        let url = registry.create(bytes, mime)?;
        Ok(PreviewUrl {
            url,
            registry: Rc::clone(registry),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for PreviewUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreviewUrl").field(&self.url).finish()
    }
}

impl Drop for PreviewUrl {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}

/// An image selected or derived locally but not uploaded yet.
#[derive(Debug)]
pub struct StagedImage {
    file: StagedFile,
    preview: PreviewUrl,
}

impl StagedImage {
    pub fn new(file: StagedFile, registry: &Rc<dyn PreviewRegistry>) -> Result<Self, PipelineError> {
        let preview = PreviewUrl::create(registry, &file.bytes, &file.mime)?;
        Ok(StagedImage { file, preview })
    }

    pub fn file(&self) -> &StagedFile {
        &self.file
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn size(&self) -> usize {
        self.file.size()
    }

    pub fn preview_url(&self) -> &str {
        self.preview.as_str()
    }

    /// Drop the preview and keep only the payload.
    pub fn into_file(self) -> StagedFile {
        self.file
    }
}
