// Ordered page image list. Index = page order; every mutation reports the
// full ordered payload list to listeners.

use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::codec;
use crate::error::PipelineError;
use crate::preview::{default_registry, PreviewRegistry, StagedImage};
use crate::splitter::{SplitOutcome, WasmImageSplitter};
use crate::types::{PageSettings, PipelineConfig, PixelSize, StagedFile};

/// Receives the full ordered page list after every mutation.
pub type PagesListener = Box<dyn FnMut(&[StagedFile])>;

/// Stable identity of a page across reorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageId(u64);

impl PageId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct PageEntry {
    id: PageId,
    image: StagedImage,
    size: Option<PixelSize>,
}

impl PageEntry {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn image(&self) -> &StagedImage {
        &self.image
    }

    /// Natural size, or `None` when the header could not be read.
    pub fn size(&self) -> Option<PixelSize> {
        self.size
    }

    /// Undecodable pages are never flagged; preparation passes them through.
    pub fn needs_split(&self, limit: u32) -> bool {
        self.size.is_some_and(|size| size.exceeds_canvas_limit(limit))
    }
}

/// Row of `WasmPageList::entries_json`.
#[derive(Debug, Serialize)]
struct PageRow<'a> {
    id: PageId,
    name: &'a str,
    bytes: usize,
    width: Option<u32>,
    height: Option<u32>,
    needs_split: bool,
    preview_url: &'a str,
}

pub struct PageList {
    limit: u32,
    registry: Rc<dyn PreviewRegistry>,
    entries: Vec<PageEntry>,
    next_id: u64,
    listeners: Vec<PagesListener>,
}

impl PageList {
    pub fn new(settings: &PageSettings, registry: Rc<dyn PreviewRegistry>) -> Self {
        PageList {
            limit: settings.max_canvas_dimension,
            registry,
            entries: Vec::new(),
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&[StagedFile]) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&PageEntry> {
        self.entries.get(index)
    }

    /// Ordered payloads, without preview metadata.
    pub fn files(&self) -> Vec<StagedFile> {
        self.entries.iter().map(|entry| entry.image.file().clone()).collect()
    }

    /// Add files after the existing pages, in selection order.
    pub fn append(&mut self, files: Vec<StagedFile>) -> Result<(), PipelineError> {
        if files.is_empty() {
            return Ok(());
        }
        let staged = self.stage_all(files)?;
        log::debug!("appending {} page(s) to {}", staged.len(), self.entries.len());
        self.entries.extend(staged);
        self.notify();
        Ok(())
    }

    /// Move one page; all others keep their relative order.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), PipelineError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        self.notify();
        Ok(())
    }

    /// Delete one page and close the gap. Its preview is revoked.
    pub fn remove(&mut self, index: usize) -> Result<StagedFile, PipelineError> {
        self.check_index(index)?;
        let entry = self.entries.remove(index);
        self.notify();
        Ok(entry.image.into_file())
    }

    /// Text carried by a drag that starts on `index`.
    pub fn drag_payload(index: usize) -> String {
        index.to_string()
    }

    /// Drop a dragged page onto position `to`.
    pub fn drop_on(&mut self, payload: &str, to: usize) -> Result<(), PipelineError> {
        let from = payload
            .trim()
            .parse::<usize>()
            .map_err(|_| PipelineError::InvalidDragPayload(payload.to_string()))?;
        self.reorder(from, to)
    }

    /// Splice the two halves of a split page in place of the original.
    pub fn replace_with_split(
        &mut self,
        index: usize,
        halves: [StagedFile; 2],
    ) -> Result<(), PipelineError> {
        self.check_index(index)?;
        let staged = self.stage_all(Vec::from(halves))?;
        let removed = self.entries.splice(index..=index, staged);
        let original: Vec<PageEntry> = removed.collect();
        log::info!(
            "page {} ({:?}) replaced by its split halves",
            index,
            original.first().map(|entry| entry.image.name())
        );
        self.notify();
        Ok(())
    }

    pub fn apply_split(&mut self, outcome: SplitOutcome) -> Result<(), PipelineError> {
        let (index, halves) = outcome.into_parts();
        self.replace_with_split(index, halves)
    }

    pub fn needs_split(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .is_some_and(|entry| entry.needs_split(self.limit))
    }

    /// Oversized pages block submission until they are split.
    pub fn any_needs_split(&self) -> bool {
        self.entries.iter().any(|entry| entry.needs_split(self.limit))
    }

    pub fn oversized_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.needs_split(self.limit))
            .map(|(index, _)| index)
            .collect()
    }

    fn stage_all(&mut self, files: Vec<StagedFile>) -> Result<Vec<PageEntry>, PipelineError> {
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            let size = match codec::read_dimensions(&file.bytes) {
                Ok(size) => Some(size),
                Err(err) => {
                    log::warn!("page {:?} has no readable dimensions: {err}", file.name);
                    None
                }
            };
            let image = StagedImage::new(file, &self.registry)?;
            staged.push((image, size));
        }
        // Ids are only handed out once every preview exists.
        Ok(staged
            .into_iter()
            .map(|(image, size)| {
                self.next_id += 1;
                PageEntry {
                    id: PageId(self.next_id),
                    image,
                    size,
                }
            })
            .collect())
    }

    fn check_index(&self, index: usize) -> Result<(), PipelineError> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(PipelineError::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
        }
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let files = self.files();
        for listener in &mut self.listeners {
            listener(&files);
        }
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed page list.
#[wasm_bindgen]
pub struct WasmPageList {
    inner: PageList,
    config: PipelineConfig,
}

impl WasmPageList {
    pub(crate) fn files(&self) -> Vec<StagedFile> {
        self.inner.files()
    }

    pub(crate) fn page_settings(&self) -> &PageSettings {
        &self.config.pages
    }
}

fn files_to_js(files: &[StagedFile]) -> Result<JsValue, JsValue> {
    let pages = js_sys::Array::new();
    for file in files {
        let page = js_sys::Object::new();
        js_sys::Reflect::set(&page, &"name".into(), &file.name.as_str().into())?;
        js_sys::Reflect::set(&page, &"mime".into(), &file.mime.as_str().into())?;
        js_sys::Reflect::set(&page, &"bytes".into(), &js_sys::Uint8Array::from(&file.bytes[..]))?;
        pages.push(&page);
    }
    Ok(pages.into())
}

#[wasm_bindgen]
impl WasmPageList {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<WasmPageList, JsValue> {
        let config = PipelineConfig::from_json(config_json).map_err(crate::to_js)?;
        Ok(WasmPageList {
            inner: PageList::new(&config.pages, default_registry()),
            config,
        })
    }

    /// Called after every mutation with the ordered pages as
    /// `{ name, mime, bytes: Uint8Array }` objects.
    pub fn set_on_change(&mut self, callback: js_sys::Function) {
        self.inner.subscribe(move |files| {
            let result = files_to_js(files).and_then(|pages| callback.call1(&JsValue::NULL, &pages));
            if let Err(err) = result {
                log::warn!("page list change callback failed: {err:?}");
            }
        });
    }

    pub fn append_file(&mut self, name: &str, mime: &str, bytes: &[u8]) -> Result<(), JsValue> {
        self.inner
            .append(vec![StagedFile::new(name, mime, bytes.to_vec())])
            .map_err(crate::to_js)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> Result<(), JsValue> {
        self.inner.reorder(from, to).map_err(crate::to_js)
    }

    pub fn remove(&mut self, index: usize) -> Result<(), JsValue> {
        self.inner.remove(index).map(|_| ()).map_err(crate::to_js)
    }

    pub fn drag_payload(index: usize) -> String {
        PageList::drag_payload(index)
    }

    pub fn drop_on(&mut self, payload: &str, to: usize) -> Result<(), JsValue> {
        self.inner.drop_on(payload, to).map_err(crate::to_js)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn needs_split(&self, index: usize) -> bool {
        self.inner.needs_split(index)
    }

    pub fn any_needs_split(&self) -> bool {
        self.inner.any_needs_split()
    }

    pub fn file_bytes(&self, index: usize) -> Option<Vec<u8>> {
        self.inner.get(index).map(|entry| entry.image().file().bytes.to_vec())
    }

    pub fn entries_json(&self) -> Result<String, JsValue> {
        let rows: Vec<PageRow<'_>> = self
            .inner
            .entries()
            .iter()
            .map(|entry| PageRow {
                id: entry.id(),
                name: entry.image().name(),
                bytes: entry.image().size(),
                width: entry.size().map(|size| size.width),
                height: entry.size().map(|size| size.height),
                needs_split: entry.needs_split(self.inner.limit),
                preview_url: entry.image().preview_url(),
            })
            .collect();
        serde_json::to_string(&rows)
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Open a splitter on the page at `index`.
    pub fn open_splitter(&self, index: usize) -> Result<WasmImageSplitter, JsValue> {
        let entry = self.inner.get(index).ok_or_else(|| {
            crate::to_js(PipelineError::IndexOutOfRange {
                index,
                len: self.inner.len(),
            })
        })?;
        Ok(WasmImageSplitter::from_parts(
            entry.image().file().clone(),
            index,
            self.config.splitter.clone(),
        ))
    }

    /// Run the splitter's split and splice the halves into the list.
    pub fn split_with(&mut self, splitter: &mut WasmImageSplitter) -> Result<(), JsValue> {
        let outcome = splitter.split_outcome().map_err(crate::to_js)?;
        self.inner.apply_split(outcome).map_err(crate::to_js)
    }
}
