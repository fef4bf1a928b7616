// Strong typing over raw numbers. Newtypes for timestamps, pixel sizes and crop rectangles.
// Configuration crosses the wasm boundary as JSON and lands in PipelineConfig.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Largest 2D canvas dimension common browser engines will allocate.
pub const MAX_CANVAS_DIMENSION: u32 = 16_383;

/// Card thumbnails are always 3:4 (width:height).
pub const CARD_ASPECT_RATIO: f64 = 3.0 / 4.0;

/// Event-loop timestamp in milliseconds (e.g. `performance.now()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Millis(u64);

impl Millis {
    pub fn new(ms: u64) -> Self {
        Millis(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, ms: u64) -> Self {
        Millis(self.0.saturating_add(ms))
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        PixelSize { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the height exceeds what a canvas can hold.
    pub fn exceeds_canvas_limit(&self, limit: u32) -> bool {
        self.height > limit
    }
}

/// Unit a crop rectangle is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropUnit {
    /// Percent of the displayed image size.
    Percent,
    /// Absolute pixels in natural (source) coordinates.
    Px,
}

/// Crop rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRegion {
    pub unit: CropUnit,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRegion {
    pub fn percent(x: f64, y: f64, width: f64, height: f64) -> Self {
        CropRegion {
            unit: CropUnit::Percent,
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixels(x: f64, y: f64, width: f64, height: f64) -> Self {
        CropRegion {
            unit: CropUnit::Px,
            x,
            y,
            width,
            height,
        }
    }

    /// Full-width band starting at the top, `height_percent` tall.
    pub fn top_band(height_percent: f64) -> Self {
        CropRegion::percent(0.0, 0.0, 100.0, height_percent.clamp(0.0, 100.0))
    }

    /// Resolve into pixels of an image of the given size.
    pub fn to_pixels(&self, size: PixelSize) -> CropRegion {
        match self.unit {
            CropUnit::Px => *self,
            CropUnit::Percent => {
                let w = f64::from(size.width) / 100.0;
                let h = f64::from(size.height) / 100.0;
                CropRegion::pixels(self.x * w, self.y * h, self.width * w, self.height * h)
            }
        }
    }

    /// Express as percentages of an image of the given size.
    pub fn to_percent(&self, size: PixelSize) -> CropRegion {
        match self.unit {
            CropUnit::Percent => *self,
            CropUnit::Px => {
                if size.is_empty() {
                    return CropRegion::percent(0.0, 0.0, 0.0, 0.0);
                }
                let w = 100.0 / f64::from(size.width);
                let h = 100.0 / f64::from(size.height);
                CropRegion::percent(self.x * w, self.y * h, self.width * w, self.height * h)
            }
        }
    }
}

/// An image payload without preview metadata. This is what listeners and
/// the submission form see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub name: String,
    pub mime: String,
    pub bytes: Rc<[u8]>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Rc<[u8]>>) -> Self {
        StagedFile {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Engine configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub card: CardSettings,
    #[serde(default)]
    pub pages: PageSettings,
    #[serde(default)]
    pub splitter: SplitterSettings,
    #[serde(default)]
    pub cache: CachePolicy,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.card.max_width == 0 {
            return Err(PipelineError::InvalidConfig("card.max_width must be > 0".into()));
        }
        if !(self.card.quality > 0.0 && self.card.quality <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "card.quality must be in (0, 1], got {}",
                self.card.quality
            )));
        }
        if self.pages.max_canvas_dimension == 0 {
            return Err(PipelineError::InvalidConfig(
                "pages.max_canvas_dimension must be > 0".into(),
            ));
        }
        if !(self.pages.min_fallback_quality > 0.0 && self.pages.min_fallback_quality <= 1.0) {
            return Err(PipelineError::InvalidConfig(
                "pages.min_fallback_quality must be in (0, 1]".into(),
            ));
        }
        if self.pages.quality_step <= 0.0 {
            return Err(PipelineError::InvalidConfig("pages.quality_step must be > 0".into()));
        }
        if self.splitter.display_scale.is_nan() || self.splitter.display_scale <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "splitter.display_scale must be > 0".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.splitter.default_selection_percent) {
            return Err(PipelineError::InvalidConfig(
                "splitter.default_selection_percent must be within 0..=100".into(),
            ));
        }
        Ok(())
    }
}

/// Card image compressor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSettings {
    /// Wider images are downscaled to this width before cropping.
    #[serde(default = "default_card_max_width")]
    pub max_width: u32,
    /// Lossy encoder quality in (0, 1].
    #[serde(default = "default_card_quality")]
    pub quality: f32,
}

impl Default for CardSettings {
    fn default() -> Self {
        CardSettings {
            max_width: default_card_max_width(),
            quality: default_card_quality(),
        }
    }
}

fn default_card_max_width() -> u32 {
    600
}

fn default_card_quality() -> f32 {
    0.8
}

/// Page upload and preparation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSettings {
    /// Pages strictly taller than this must be split before submission.
    #[serde(default = "default_max_canvas_dimension")]
    pub max_canvas_dimension: u32,
    /// Prepared payloads above this size fall back to stepped JPEG quality.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_min_fallback_quality")]
    pub min_fallback_quality: f32,
    #[serde(default = "default_quality_step")]
    pub quality_step: f32,
}

impl Default for PageSettings {
    fn default() -> Self {
        PageSettings {
            max_canvas_dimension: default_max_canvas_dimension(),
            max_upload_bytes: default_max_upload_bytes(),
            min_fallback_quality: default_min_fallback_quality(),
            quality_step: default_quality_step(),
        }
    }
}

fn default_max_canvas_dimension() -> u32 {
    MAX_CANVAS_DIMENSION
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_min_fallback_quality() -> f32 {
    0.7
}

fn default_quality_step() -> f32 {
    0.05
}

/// Image splitter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterSettings {
    /// Scale the crop view renders the image at. View pixels divided by this
    /// give natural pixels.
    #[serde(default = "default_display_scale")]
    pub display_scale: f64,
    /// Settle period before previews are re-rendered.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Initial selection height as percent of the image.
    #[serde(default = "default_selection_percent")]
    pub default_selection_percent: f64,
    /// Distance kept above the likely split point when scrolling into view.
    #[serde(default = "default_scroll_margin")]
    pub scroll_margin_px: u32,
    #[serde(default = "default_max_canvas_dimension")]
    pub max_canvas_dimension: u32,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        SplitterSettings {
            display_scale: default_display_scale(),
            debounce_ms: default_debounce_ms(),
            default_selection_percent: default_selection_percent(),
            scroll_margin_px: default_scroll_margin(),
            max_canvas_dimension: default_max_canvas_dimension(),
        }
    }
}

fn default_display_scale() -> f64 {
    0.5
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_selection_percent() -> f64 {
    50.0
}

fn default_scroll_margin() -> u32 {
    600
}

/// Expiry and size bounds for the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default = "default_cache_max_items")]
    pub max_items: usize,
    #[serde(default = "default_cache_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            max_items: default_cache_max_items(),
            max_bytes: default_cache_max_bytes(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

fn default_cache_max_items() -> usize {
    200
}

fn default_cache_max_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_cache_ttl_ms() -> u64 {
    12 * 60 * 60 * 1000
}
