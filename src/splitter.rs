// Image splitter for pages taller than the canvas limit.
// The crop view shows the image at `display_scale`; the selected band's
// height in view pixels divided by that scale is the split row in natural pixels.

use image::{imageops, RgbaImage};
use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::codec::{self, OutputFormat};
use crate::debounce::Debouncer;
use crate::error::PipelineError;
use crate::types::{CropRegion, Millis, PipelineConfig, PixelSize, SplitterSettings, StagedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SplitterState {
    /// Waiting for the file to decode.
    Loading,
    /// Crop UI shown with the default selection.
    Ready,
    /// Previews rendered for the latest settled selection.
    Previewing,
    /// Both halves produced and handed back.
    Split,
    Closed,
}

/// A split row in natural pixels, strictly inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitThreshold(u32);

impl SplitThreshold {
    pub fn new(threshold: u32, height: u32) -> Result<Self, PipelineError> {
        if threshold == 0 || threshold >= height {
            return Err(PipelineError::InvalidSplit { threshold, height });
        }
        Ok(SplitThreshold(threshold))
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Segment heights in natural pixels. Always sums to the source height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitPlan {
    pub top_height: u32,
    pub bottom_height: u32,
}

impl SplitPlan {
    /// Map a selection height in view pixels to natural rows.
    pub fn from_view(view_height: f64, display_scale: f64, natural_height: u32) -> Self {
        let rows = (view_height / display_scale).round();
        let top_height = if rows.is_finite() {
            rows.clamp(0.0, f64::from(natural_height)) as u32
        } else {
            0
        };
        SplitPlan {
            top_height,
            bottom_height: natural_height - top_height,
        }
    }

    pub fn source_height(&self) -> u32 {
        self.top_height + self.bottom_height
    }

    /// Check both segments are non-empty and fit on a canvas.
    pub fn validate(&self, limit: u32) -> Result<SplitThreshold, PipelineError> {
        let threshold = SplitThreshold::new(self.top_height, self.source_height())?;
        for height in [self.top_height, self.bottom_height] {
            if height > limit {
                return Err(PipelineError::SegmentTooTall { height, limit });
            }
        }
        Ok(threshold)
    }
}

/// Rendered top and bottom canvases for the current selection.
#[derive(Debug, Clone)]
pub struct SplitPreview {
    pub plan: SplitPlan,
    pub top: RgbaImage,
    pub bottom: RgbaImage,
}

/// The two halves of a split page, tagged with the page's position.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    index: usize,
    top: StagedFile,
    bottom: StagedFile,
}

impl SplitOutcome {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn top(&self) -> &StagedFile {
        &self.top
    }

    pub fn bottom(&self) -> &StagedFile {
        &self.bottom
    }

    pub fn into_parts(self) -> (usize, [StagedFile; 2]) {
        (self.index, [self.top, self.bottom])
    }
}

pub struct ImageSplitter {
    settings: SplitterSettings,
    file: StagedFile,
    index: usize,
    state: SplitterState,
    source: Option<RgbaImage>,
    selection: Option<CropRegion>,
    /// The selection moved since the preview was rendered.
    stale_preview: bool,
    pending: Debouncer<f64>,
    preview: Option<SplitPreview>,
}

impl ImageSplitter {
    pub fn new(file: StagedFile, index: usize, settings: SplitterSettings) -> Self {
        let pending = Debouncer::new(settings.debounce_ms);
        ImageSplitter {
            settings,
            file,
            index,
            state: SplitterState::Loading,
            source: None,
            selection: None,
            stale_preview: false,
            pending,
            preview: None,
        }
    }

    pub fn state(&self) -> SplitterState {
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Decode the page. A decode failure keeps the splitter in Loading.
    pub fn load(&mut self) -> Result<PixelSize, PipelineError> {
        if self.state != SplitterState::Loading {
            return Err(PipelineError::NotReady("splitter already loaded or closed"));
        }
        let source = codec::decode_rgba(&self.file.bytes).map_err(|err| {
            log::warn!("splitter could not decode {:?}: {err}", self.file.name);
            err
        })?;
        let size = PixelSize::new(source.width(), source.height());
        log::debug!(
            "splitter ready for page {} ({}x{})",
            self.index,
            size.width,
            size.height
        );
        self.source = Some(source);
        self.selection = Some(CropRegion::top_band(self.settings.default_selection_percent));
        self.state = SplitterState::Ready;
        Ok(size)
    }

    pub fn natural_size(&self) -> Option<PixelSize> {
        self.source
            .as_ref()
            .map(|source| PixelSize::new(source.width(), source.height()))
    }

    /// Size of the image as laid out in the crop view.
    pub fn display_size(&self) -> Option<PixelSize> {
        let scale = self.settings.display_scale;
        self.natural_size().map(|size| {
            PixelSize::new(
                (f64::from(size.width) * scale).round() as u32,
                (f64::from(size.height) * scale).round() as u32,
            )
        })
    }

    /// Scroll position that brings the likely split point into view.
    pub fn initial_scroll_offset(&self) -> Option<u32> {
        let display = self.display_size()?;
        let offset = (display.height / 2).saturating_sub(self.settings.scroll_margin_px);
        Some(offset.min(self.settings.max_canvas_dimension))
    }

    /// Current selection, in percent of the displayed image.
    pub fn selection(&self) -> Option<CropRegion> {
        self.selection
    }

    /// Only the height of the selection may change; it always starts at the top
    /// and spans the full width.
    pub fn on_crop_change(&mut self, crop: CropRegion) -> Result<CropRegion, PipelineError> {
        let display = self.display_size().ok_or(PipelineError::NotReady("splitter not loaded"))?;
        let percent = crop.to_percent(display);
        let selection = CropRegion::top_band(percent.height);
        self.selection = Some(selection);
        self.stale_preview = true;
        Ok(selection)
    }

    /// Record a finished drag. Previews render on the next `tick` after the
    /// settle period.
    pub fn on_crop_complete(&mut self, view_height: f64, now: Millis) -> Result<(), PipelineError> {
        if self.source.is_none() || self.state == SplitterState::Closed {
            return Err(PipelineError::NotReady("splitter not loaded"));
        }
        self.pending.trigger(view_height, now);
        Ok(())
    }

    /// Render previews if a selection has settled. Returns true when they changed.
    pub fn tick(&mut self, now: Millis) -> bool {
        match self.pending.poll(now) {
            Some(view_height) => self.render_preview(view_height),
            None => false,
        }
    }

    pub fn preview(&self) -> Option<&SplitPreview> {
        self.preview.as_ref()
    }

    pub fn plan(&self) -> Option<SplitPlan> {
        self.preview.as_ref().map(|preview| preview.plan)
    }

    /// Encode both halves at the latest selection. Either both come back or
    /// neither does. Only one split per splitter.
    pub fn split(&mut self) -> Result<SplitOutcome, PipelineError> {
        match self.state {
            SplitterState::Ready | SplitterState::Previewing => {}
            SplitterState::Loading => return Err(PipelineError::NotReady("splitter not loaded")),
            SplitterState::Split | SplitterState::Closed => {
                return Err(PipelineError::NotReady("page already split or splitter closed"))
            }
        }
        if let Some(view_height) = self.pending.flush() {
            self.render_preview(view_height);
        } else if self.preview.is_none() || self.stale_preview {
            let view_height = self
                .selection_view_height()
                .ok_or(PipelineError::NotReady("no selection"))?;
            self.render_preview(view_height);
        }
        let preview = self
            .preview
            .as_ref()
            .ok_or(PipelineError::NotReady("no split preview rendered"))?;
        preview.plan.validate(self.settings.max_canvas_dimension)?;

        let top = codec::encode(&preview.top, OutputFormat::Png)?;
        let bottom = codec::encode(&preview.bottom, OutputFormat::Png)?;
        let mime = OutputFormat::Png.mime();
        let stem = codec::file_stem(&self.file.name);
        let outcome = SplitOutcome {
            index: self.index,
            top: StagedFile::new(format!("{stem}_top.png"), mime, top),
            bottom: StagedFile::new(format!("{stem}_bottom.png"), mime, bottom),
        };
        log::info!(
            "page {} split at row {} ({} + {} bytes)",
            self.index,
            preview.plan.top_height,
            outcome.top.size(),
            outcome.bottom.size()
        );
        self.state = SplitterState::Split;
        Ok(outcome)
    }

    /// Terminal. Returns the page index so the owner can drop this splitter.
    pub fn close(&mut self) -> usize {
        self.pending.cancel();
        self.preview = None;
        self.source = None;
        self.state = SplitterState::Closed;
        self.index
    }

    /// Selection height in view pixels.
    fn selection_view_height(&self) -> Option<f64> {
        let display = self.display_size()?;
        Some(self.selection?.to_pixels(display).height)
    }

    fn render_preview(&mut self, view_height: f64) -> bool {
        let Some(source) = self.source.as_ref() else {
            return false;
        };
        let (width, height) = source.dimensions();
        let plan = SplitPlan::from_view(view_height, self.settings.display_scale, height);
        let top = imageops::crop_imm(source, 0, 0, width, plan.top_height).to_image();
        let bottom = imageops::crop_imm(source, 0, plan.top_height, width, plan.bottom_height).to_image();
        log::debug!(
            "split preview: top {} rows, bottom {} rows",
            plan.top_height,
            plan.bottom_height
        );
        self.preview = Some(SplitPreview { plan, top, bottom });
        self.stale_preview = false;
        if self.state == SplitterState::Ready {
            self.state = SplitterState::Previewing;
        }
        true
    }
}

// =============================================================================
// WASM Bindings
// =============================================================================

/// WASM-exposed splitter. Timestamps are `performance.now()` milliseconds.
#[wasm_bindgen]
pub struct WasmImageSplitter {
    inner: ImageSplitter,
}

impl WasmImageSplitter {
    pub(crate) fn from_parts(file: StagedFile, index: usize, settings: SplitterSettings) -> Self {
        WasmImageSplitter {
            inner: ImageSplitter::new(file, index, settings),
        }
    }

    pub(crate) fn split_outcome(&mut self) -> Result<SplitOutcome, PipelineError> {
        self.inner.split()
    }
}

#[wasm_bindgen]
impl WasmImageSplitter {
    #[wasm_bindgen(constructor)]
    pub fn new(
        name: &str,
        mime: &str,
        bytes: &[u8],
        index: usize,
        config_json: &str,
    ) -> Result<WasmImageSplitter, JsValue> {
        let config = PipelineConfig::from_json(config_json).map_err(crate::to_js)?;
        Ok(WasmImageSplitter::from_parts(
            StagedFile::new(name, mime, bytes.to_vec()),
            index,
            config.splitter,
        ))
    }

    /// Returns `{ width, height }` in natural pixels.
    pub fn load(&mut self) -> Result<String, JsValue> {
        let size = self.inner.load().map_err(crate::to_js)?;
        serde_json::to_string(&size).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn initial_scroll_offset(&self) -> Option<u32> {
        self.inner.initial_scroll_offset()
    }

    /// Returns the normalized selection height in percent.
    pub fn on_crop_change(&mut self, height_percent: f64) -> Result<f64, JsValue> {
        let selection = self
            .inner
            .on_crop_change(CropRegion::top_band(height_percent))
            .map_err(crate::to_js)?;
        Ok(selection.height)
    }

    pub fn on_crop_complete(&mut self, view_height: f64, now_ms: f64) -> Result<(), JsValue> {
        self.inner
            .on_crop_complete(view_height, Millis::new(now_ms.max(0.0) as u64))
            .map_err(crate::to_js)
    }

    pub fn tick(&mut self, now_ms: f64) -> bool {
        self.inner.tick(Millis::new(now_ms.max(0.0) as u64))
    }

    /// `{ top_height, bottom_height }` of the rendered preview, or null.
    pub fn plan_json(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.inner.plan())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Raw RGBA pixels of the top preview, for `ImageData`.
    pub fn top_preview_rgba(&self) -> Option<Vec<u8>> {
        self.inner.preview().map(|preview| preview.top.as_raw().clone())
    }

    pub fn bottom_preview_rgba(&self) -> Option<Vec<u8>> {
        self.inner.preview().map(|preview| preview.bottom.as_raw().clone())
    }

    pub fn state(&self) -> String {
        format!("{:?}", self.inner.state())
    }

    pub fn close(&mut self) -> usize {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fixtures;
    use crate::types::MAX_CANVAS_DIMENSION;
    use image::Rgba;
    use proptest::prelude::*;

    fn splitter(bytes: Vec<u8>) -> ImageSplitter {
        ImageSplitter::new(
            StagedFile::new("tall.png", "image/png", bytes),
            3,
            SplitterSettings::default(),
        )
    }

    fn row_colour(y: u32) -> Rgba<u8> {
        Rgba([(y % 256) as u8, (y / 256 % 256) as u8, 0, 255])
    }

    #[test]
    fn load_selects_top_half_and_scrolls_to_middle() {
        let mut splitter = splitter(fixtures::png(4, 20_000));
        assert_eq!(splitter.state(), SplitterState::Loading);

        assert_eq!(splitter.load().unwrap(), PixelSize::new(4, 20_000));
        assert_eq!(splitter.state(), SplitterState::Ready);
        assert_eq!(splitter.selection(), Some(CropRegion::top_band(50.0)));
        assert_eq!(splitter.display_size(), Some(PixelSize::new(2, 10_000)));
        // 10000 / 2 - 600
        assert_eq!(splitter.initial_scroll_offset(), Some(4_400));
    }

    #[test]
    fn scroll_offset_is_capped_at_canvas_limit() {
        let mut splitter = splitter(fixtures::png(1, 80_000));
        splitter.load().unwrap();
        assert_eq!(splitter.initial_scroll_offset(), Some(MAX_CANVAS_DIMENSION));
    }

    #[test]
    fn crop_changes_only_move_height() {
        let mut splitter = splitter(fixtures::png(4, 20_000));
        splitter.load().unwrap();
        let selection = splitter
            .on_crop_change(CropRegion::percent(12.0, 30.0, 40.0, 35.0))
            .unwrap();
        assert_eq!(selection, CropRegion::top_band(35.0));

        // Pixel crops are normalized against the displayed size.
        let selection = splitter
            .on_crop_change(CropRegion::pixels(1.0, 5.0, 1.0, 2_500.0))
            .unwrap();
        assert_eq!(selection, CropRegion::top_band(25.0));
    }

    #[test]
    fn previews_wait_for_the_selection_to_settle() {
        let mut splitter = splitter(fixtures::png(4, 20_000));
        splitter.load().unwrap();

        splitter.on_crop_complete(4_000.0, Millis::new(0)).unwrap();
        assert!(!splitter.tick(Millis::new(50)));
        splitter.on_crop_complete(5_000.0, Millis::new(60)).unwrap();
        assert!(!splitter.tick(Millis::new(150)));
        assert!(splitter.tick(Millis::new(160)));

        assert_eq!(splitter.state(), SplitterState::Previewing);
        assert_eq!(
            splitter.plan(),
            Some(SplitPlan {
                top_height: 10_000,
                bottom_height: 10_000
            })
        );
        let preview = splitter.preview().unwrap();
        assert_eq!(preview.top.dimensions(), (4, 10_000));
        assert_eq!(preview.bottom.dimensions(), (4, 10_000));
    }

    #[test]
    fn split_returns_both_halves_in_order() {
        let mut splitter = splitter(fixtures::striped_png(3, 20_000));
        splitter.load().unwrap();
        splitter.on_crop_complete(5_000.0, Millis::new(0)).unwrap();
        splitter.tick(Millis::new(100));

        let outcome = splitter.split().unwrap();
        assert_eq!(splitter.state(), SplitterState::Split);
        assert_eq!(outcome.index(), 3);
        assert_eq!(outcome.top().name, "tall_top.png");
        assert_eq!(outcome.bottom().name, "tall_bottom.png");

        let top = codec::decode_rgba(&outcome.top().bytes).unwrap();
        let bottom = codec::decode_rgba(&outcome.bottom().bytes).unwrap();
        assert_eq!(top.height() + bottom.height(), 20_000);
        assert_eq!(top.get_pixel(0, 9_999), &row_colour(9_999));
        assert_eq!(bottom.get_pixel(0, 0), &row_colour(10_000));
    }

    #[test]
    fn split_flushes_a_pending_selection() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        splitter.on_crop_complete(4_500.0, Millis::new(0)).unwrap();

        let outcome = splitter.split().unwrap();
        let top = codec::read_dimensions(&outcome.top().bytes).unwrap();
        assert_eq!(top.height, 9_000);
    }

    #[test]
    fn default_selection_splits_in_half() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();

        let outcome = splitter.split().unwrap();
        assert_eq!(splitter.state(), SplitterState::Split);
        assert_eq!(codec::read_dimensions(&outcome.top().bytes).unwrap().height, 10_000);
        assert_eq!(codec::read_dimensions(&outcome.bottom().bytes).unwrap().height, 10_000);
    }

    #[test]
    fn split_uses_the_changed_selection() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        splitter.on_crop_complete(5_000.0, Millis::new(0)).unwrap();
        splitter.tick(Millis::new(100));
        splitter.on_crop_change(CropRegion::percent(0.0, 0.0, 100.0, 35.0)).unwrap();

        let outcome = splitter.split().unwrap();
        assert_eq!(
            splitter.plan(),
            Some(SplitPlan {
                top_height: 7_000,
                bottom_height: 13_000
            })
        );
        assert_eq!(codec::read_dimensions(&outcome.top().bytes).unwrap().height, 7_000);
        assert_eq!(codec::read_dimensions(&outcome.bottom().bytes).unwrap().height, 13_000);
    }

    #[test]
    fn second_split_is_refused() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        splitter.split().unwrap();
        assert!(matches!(splitter.split(), Err(PipelineError::NotReady(_))));
        assert_eq!(splitter.state(), SplitterState::Split);
    }

    #[test]
    fn split_before_load_is_not_ready() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        assert!(matches!(splitter.split(), Err(PipelineError::NotReady(_))));
    }

    #[test]
    fn short_pages_scroll_to_the_top() {
        let mut splitter = splitter(fixtures::png(2, 1_000));
        splitter.load().unwrap();
        // 500 / 2 - 600 saturates.
        assert_eq!(splitter.initial_scroll_offset(), Some(0));
    }

    #[test]
    fn oversized_segment_aborts_without_output() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        splitter.on_crop_complete(9_000.0, Millis::new(0)).unwrap();
        splitter.tick(Millis::new(100));

        let err = splitter.split().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SegmentTooTall {
                height: 18_000,
                limit: MAX_CANVAS_DIMENSION
            }
        ));
        assert_eq!(splitter.state(), SplitterState::Previewing);
    }

    #[test]
    fn empty_segment_aborts_without_output() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        splitter.on_crop_complete(12_000.0, Millis::new(0)).unwrap();
        splitter.tick(Millis::new(100));
        assert_eq!(splitter.plan().unwrap().bottom_height, 0);
        assert!(matches!(
            splitter.split(),
            Err(PipelineError::InvalidSplit { threshold: 20_000, height: 20_000 })
        ));
    }

    #[test]
    fn decode_failure_stays_loading() {
        let mut splitter = splitter(b"not an image".to_vec());
        assert!(matches!(splitter.load(), Err(PipelineError::Decode(_))));
        assert_eq!(splitter.state(), SplitterState::Loading);
        assert!(splitter.on_crop_complete(10.0, Millis::new(0)).is_err());
    }

    #[test]
    fn close_is_terminal() {
        let mut splitter = splitter(fixtures::png(2, 20_000));
        splitter.load().unwrap();
        assert_eq!(splitter.close(), 3);
        assert_eq!(splitter.state(), SplitterState::Closed);
        assert!(splitter.load().is_err());
        assert!(splitter.on_crop_complete(10.0, Millis::new(0)).is_err());
        assert!(!splitter.tick(Millis::new(1_000)));
        assert!(matches!(splitter.split(), Err(PipelineError::NotReady(_))));
    }

    #[test]
    fn threshold_must_be_interior() {
        assert!(SplitThreshold::new(0, 10).is_err());
        assert!(SplitThreshold::new(10, 10).is_err());
        assert_eq!(SplitThreshold::new(4, 10).unwrap().as_u32(), 4);
    }

    proptest! {
        #[test]
        fn plan_segments_sum_to_source(view in 0f64..40_000f64, height in 1u32..60_000) {
            let plan = SplitPlan::from_view(view, 0.5, height);
            prop_assert_eq!(plan.top_height + plan.bottom_height, height);
            let expected_top = ((view * 2.0).round() as u32).min(height);
            prop_assert_eq!(plan.top_height, expected_top);
        }

        #[test]
        fn valid_plans_fit_on_a_canvas(view in 1f64..20_000f64, height in 2u32..40_000) {
            let plan = SplitPlan::from_view(view, 0.5, height);
            if let Ok(threshold) = plan.validate(MAX_CANVAS_DIMENSION) {
                prop_assert!(threshold.as_u32() > 0 && threshold.as_u32() < height);
                prop_assert!(plan.top_height <= MAX_CANVAS_DIMENSION);
                prop_assert!(plan.bottom_height <= MAX_CANVAS_DIMENSION);
            }
        }
    }
}
