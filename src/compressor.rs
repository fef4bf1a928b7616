// Card image compressor: decode, cap the width, let the user slide a 3:4
// window vertically, then crop and re-encode as JPEG.

use std::rc::Rc;

use image::RgbaImage;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::codec::{self, OutputFormat};
use crate::error::PipelineError;
use crate::preview::{default_registry, PreviewRegistry, StagedImage};
use crate::types::{CardSettings, CropRegion, PipelineConfig, PixelSize, StagedFile, CARD_ASPECT_RATIO};

pub const CARD_FILENAME: &str = "cropped_image.jpg";

/// Receives the cropped card, or `None` once the user removes it.
pub type CardListener = Box<dyn FnMut(Option<&StagedImage>)>;

/// Sizes reported next to the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CardSummary {
    pub original_size: usize,
    pub compressed_size: Option<usize>,
}

/// Height of the 3:4 crop window for a canvas of the given width.
pub fn window_height_for(width: u32) -> u32 {
    (f64::from(width) / CARD_ASPECT_RATIO).round() as u32
}

/// Clamp a window offset into `[0, canvas_height - window_height]`.
/// A canvas shorter than the window pins the offset to 0.
pub fn clamp_offset(offset: f64, canvas: PixelSize) -> f64 {
    let max = f64::from(canvas.height) - f64::from(window_height_for(canvas.width));
    offset.min(max).max(0.0)
}

struct LoadedCard {
    canvas: RgbaImage,
    original_size: usize,
}

impl LoadedCard {
    fn size(&self) -> PixelSize {
        PixelSize::new(self.canvas.width(), self.canvas.height())
    }
}

#[derive(Debug, Clone, Copy)]
struct DragState {
    start_pointer_y: f64,
    start_offset: f64,
}

pub struct CardCropper {
    settings: CardSettings,
    registry: Rc<dyn PreviewRegistry>,
    loaded: Option<LoadedCard>,
    offset_y: f64,
    drag: Option<DragState>,
    result: Option<StagedImage>,
    listeners: Vec<CardListener>,
}

impl CardCropper {
    pub fn new(settings: CardSettings, registry: Rc<dyn PreviewRegistry>) -> Self {
        CardCropper {
            settings,
            registry,
            loaded: None,
            offset_y: 0.0,
            drag: None,
            result: None,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(Option<&StagedImage>) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Decode a selected file and render it to the working canvas.
    /// On failure the previous state is kept.
    pub fn load(&mut self, bytes: &[u8], filename: &str) -> Result<PixelSize, PipelineError> {
        let decoded = codec::decode_rgba(bytes).map_err(|err| {
            log::warn!("card image {filename:?} failed to decode: {err}");
            err
        })?;
        let natural = PixelSize::new(decoded.width(), decoded.height());
        let canvas = codec::downscale_to_width(decoded, self.settings.max_width);
        let size = PixelSize::new(canvas.width(), canvas.height());
        log::debug!(
            "card image {filename:?} loaded: {}x{} -> {}x{}",
            natural.width,
            natural.height,
            size.width,
            size.height
        );

        self.loaded = Some(LoadedCard {
            canvas,
            original_size: bytes.len(),
        });
        self.offset_y = 0.0;
        self.drag = None;
        // Listeners must drop a card cropped from the previous image.
        if self.result.take().is_some() {
            self.notify();
        }
        Ok(size)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn canvas_size(&self) -> Option<PixelSize> {
        self.loaded.as_ref().map(LoadedCard::size)
    }

    pub fn window_height(&self) -> Option<u32> {
        self.canvas_size().map(|size| window_height_for(size.width))
    }

    pub fn offset(&self) -> f64 {
        self.offset_y
    }

    pub fn set_offset(&mut self, offset: f64) -> f64 {
        if let Some(size) = self.canvas_size() {
            self.offset_y = clamp_offset(offset, size);
        }
        self.offset_y
    }

    pub fn begin_drag(&mut self, pointer_y: f64) {
        self.drag = Some(DragState {
            start_pointer_y: pointer_y,
            start_offset: self.offset_y,
        });
    }

    /// Move the window by the pointer delta since `begin_drag`.
    pub fn drag_to(&mut self, pointer_y: f64) -> f64 {
        if let Some(drag) = self.drag {
            let delta = pointer_y - drag.start_pointer_y;
            self.set_offset(drag.start_offset + delta);
        }
        self.offset_y
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    /// The current crop window in canvas pixels.
    pub fn crop_region(&self) -> Option<CropRegion> {
        let size = self.canvas_size()?;
        Some(CropRegion::pixels(
            0.0,
            self.offset_y,
            f64::from(size.width),
            f64::from(window_height_for(size.width)),
        ))
    }

    /// Crop the window out of the canvas and encode it.
    pub fn confirm(&mut self) -> Result<&StagedImage, PipelineError> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or(PipelineError::NotReady("no card image loaded"))?;
        let format = OutputFormat::Jpeg {
            quality: self.settings.quality,
        };
        let window = window_height_for(loaded.canvas.width());
        let band = codec::crop_rows(&loaded.canvas, self.offset_y.round() as u32, window);
        let bytes = codec::encode(&band, format)?;
        log::info!(
            "card cropped to {}x{}: {} -> {} bytes",
            band.width(),
            band.height(),
            loaded.original_size,
            bytes.len()
        );

        let staged = StagedImage::new(StagedFile::new(CARD_FILENAME, format.mime(), bytes), &self.registry)?;
        self.result = Some(staged);
        self.notify();
        self.result
            .as_ref()
            .ok_or(PipelineError::NotReady("card result missing"))
    }

    /// Forget the image entirely and tell listeners there is no card.
    pub fn remove(&mut self) {
        self.loaded = None;
        self.result = None;
        self.offset_y = 0.0;
        self.drag = None;
        self.notify();
    }

    pub fn result(&self) -> Option<&StagedImage> {
        self.result.as_ref()
    }

    pub fn summary(&self) -> Option<CardSummary> {
        self.loaded.as_ref().map(|loaded| CardSummary {
            original_size: loaded.original_size,
            compressed_size: self.result.as_ref().map(StagedImage::size),
        })
    }

    fn notify(&mut self) {
        for listener in &mut self.listeners {
            listener(self.result.as_ref());
        }
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed card cropper. Pointer coordinates are canvas pixels.
#[wasm_bindgen]
pub struct WasmCardCropper {
    inner: CardCropper,
}

impl WasmCardCropper {
    pub(crate) fn card_file(&self) -> Option<StagedFile> {
        self.inner.result().map(|image| image.file().clone())
    }
}

#[wasm_bindgen]
impl WasmCardCropper {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<WasmCardCropper, JsValue> {
        let config = PipelineConfig::from_json(config_json).map_err(crate::to_js)?;
        Ok(WasmCardCropper {
            inner: CardCropper::new(config.card, default_registry()),
        })
    }

    /// Returns `{ width, height }` of the working canvas.
    pub fn load(&mut self, bytes: &[u8], filename: &str) -> Result<String, JsValue> {
        let size = self.inner.load(bytes, filename).map_err(crate::to_js)?;
        serde_json::to_string(&size).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn window_height(&self) -> Option<u32> {
        self.inner.window_height()
    }

    pub fn offset(&self) -> f64 {
        self.inner.offset()
    }

    pub fn begin_drag(&mut self, pointer_y: f64) {
        self.inner.begin_drag(pointer_y);
    }

    pub fn drag_to(&mut self, pointer_y: f64) -> f64 {
        self.inner.drag_to(pointer_y)
    }

    pub fn end_drag(&mut self) {
        self.inner.end_drag();
    }

    /// Encoded JPEG bytes of the cropped card.
    pub fn confirm(&mut self) -> Result<Vec<u8>, JsValue> {
        let staged = self.inner.confirm().map_err(crate::to_js)?;
        Ok(staged.file().bytes.to_vec())
    }

    pub fn preview_url(&self) -> Option<String> {
        self.inner.result().map(|image| image.preview_url().to_string())
    }

    pub fn remove(&mut self) {
        self.inner.remove();
    }

    pub fn summary_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.summary())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures;
    use crate::preview::MemoryPreviews;
    use proptest::prelude::*;
    use std::cell::RefCell;

    fn cropper() -> (Rc<MemoryPreviews>, CardCropper) {
        let previews = Rc::new(MemoryPreviews::new());
        let registry: Rc<dyn PreviewRegistry> = previews.clone();
        (previews, CardCropper::new(CardSettings::default(), registry))
    }

    #[test]
    fn small_images_keep_natural_size() {
        let (_, mut cropper) = cropper();
        let size = cropper.load(&fixtures::png(300, 500), "small.png").unwrap();
        assert_eq!(size, PixelSize::new(300, 500));
        assert_eq!(cropper.window_height(), Some(400));
    }

    #[test]
    fn wide_images_are_downscaled() {
        let (_, mut cropper) = cropper();
        let size = cropper.load(&fixtures::png(1200, 2000), "big.png").unwrap();
        assert_eq!(size, PixelSize::new(600, 1000));
        assert_eq!(cropper.window_height(), Some(800));
    }

    #[test]
    fn drag_is_clamped_to_canvas() {
        let (_, mut cropper) = cropper();
        cropper.load(&fixtures::png(600, 1000), "card.png").unwrap();

        cropper.begin_drag(50.0);
        assert_eq!(cropper.drag_to(120.0), 70.0);
        assert_eq!(cropper.drag_to(5_000.0), 200.0);
        assert_eq!(cropper.drag_to(-5_000.0), 0.0);
        cropper.end_drag();

        // Without an active drag pointer moves are ignored.
        assert_eq!(cropper.drag_to(100.0), 0.0);
    }

    #[test]
    fn short_canvas_pins_offset_to_zero() {
        let (_, mut cropper) = cropper();
        cropper.load(&fixtures::png(300, 300), "wide.png").unwrap();
        assert_eq!(cropper.set_offset(50.0), 0.0);

        let staged = cropper.confirm().unwrap();
        let size = codec::read_dimensions(&staged.file().bytes).unwrap();
        assert_eq!(size, PixelSize::new(300, 400));
    }

    #[test]
    fn confirm_emits_jpeg_of_window_size() {
        let (_, mut cropper) = cropper();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        cropper.subscribe(move |image| sink.borrow_mut().push(image.map(|i| i.name().to_string())));

        cropper.load(&fixtures::png(1200, 2000), "big.png").unwrap();
        cropper.set_offset(150.0);
        let staged = cropper.confirm().unwrap();
        assert_eq!(staged.file().mime, "image/jpeg");
        assert_eq!(
            codec::read_dimensions(&staged.file().bytes).unwrap(),
            PixelSize::new(600, 800)
        );
        assert_eq!(
            cropper.crop_region(),
            Some(CropRegion::pixels(0.0, 150.0, 600.0, 800.0))
        );
        assert_eq!(*seen.borrow(), vec![Some(CARD_FILENAME.to_string())]);

        let summary = cropper.summary().unwrap();
        assert!(summary.compressed_size.is_some());
    }

    #[test]
    fn decode_failure_keeps_previous_image() {
        let (_, mut cropper) = cropper();
        cropper.load(&fixtures::png(300, 500), "ok.png").unwrap();
        let err = cropper.load(b"garbage", "bad.png").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(cropper.canvas_size(), Some(PixelSize::new(300, 500)));
    }

    #[test]
    fn confirm_without_image_is_not_ready() {
        let (_, mut cropper) = cropper();
        assert!(matches!(cropper.confirm(), Err(PipelineError::NotReady(_))));
    }

    #[test]
    fn replacing_and_removing_revoke_previews() {
        let (previews, mut cropper) = cropper();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        cropper.subscribe(move |image| sink.borrow_mut().push(image.is_some()));

        cropper.load(&fixtures::png(300, 500), "a.png").unwrap();
        assert!(seen.borrow().is_empty());
        cropper.confirm().unwrap();
        cropper.confirm().unwrap();
        assert_eq!(previews.live_count(), 1);

        cropper.load(&fixtures::png(300, 500), "b.png").unwrap();
        assert_eq!(previews.live_count(), 0);
        assert_eq!(seen.borrow().last(), Some(&false));

        cropper.confirm().unwrap();
        cropper.remove();
        assert_eq!(previews.live_count(), 0);
        assert!(cropper.summary().is_none());
        assert_eq!(*seen.borrow(), vec![true, true, false, true, false]);
    }

    #[test]
    fn wasm_cropper_defaults() {
        let cropper = WasmCardCropper::new("{}");
        assert!(cropper.is_ok());
    }

    proptest! {
        #[test]
        fn offset_stays_in_window_range(
            width in 1u32..2_000,
            height in 1u32..6_000,
            start in -10_000f64..10_000f64,
            moves in prop::collection::vec(-50_000f64..50_000f64, 1..20),
        ) {
            let canvas = PixelSize::new(width, height);
            let max = (f64::from(height) - f64::from(width) / CARD_ASPECT_RATIO).max(0.0);
            let mut offset = clamp_offset(start, canvas);
            for pointer in moves {
                offset = clamp_offset(offset + pointer, canvas);
                prop_assert!(offset >= 0.0);
                prop_assert!(offset <= max + 0.5, "offset {} > max {}", offset, max);
            }
        }
    }
}
