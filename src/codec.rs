// Decode, resize, crop and encode. Thin layer over the image crate so the
// components only ever see RgbaImage and byte payloads.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader, RgbaImage};

use crate::error::PipelineError;
use crate::types::PixelSize;

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    /// Lossy, quality in (0, 1].
    Jpeg { quality: f32 },
    Png,
    WebpLossless,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::WebpLossless => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::WebpLossless => "webp",
        }
    }
}

pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    let image = image::load_from_memory(bytes).map_err(|err| PipelineError::Decode(err.to_string()))?;
    Ok(image.to_rgba8())
}

/// Read dimensions from the header without decoding pixels.
pub fn read_dimensions(bytes: &[u8]) -> Result<PixelSize, PipelineError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| PipelineError::Decode(err.to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| PipelineError::Decode(err.to_string()))?;
    Ok(PixelSize::new(width, height))
}

/// Size after capping the width at `max_width`, keeping the aspect ratio.
pub fn fit_width(size: PixelSize, max_width: u32) -> PixelSize {
    if size.width <= max_width || size.width == 0 {
        return size;
    }
    let height = (f64::from(size.height) * f64::from(max_width) / f64::from(size.width))
        .round()
        .max(1.0) as u32;
    PixelSize::new(max_width, height)
}

pub fn downscale_to_width(image: RgbaImage, max_width: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    let target = fit_width(PixelSize::new(width, height), max_width);
    if target.width == width && target.height == height {
        return image;
    }
    imageops::resize(&image, target.width, target.height, FilterType::Triangle)
}

/// Full-width band of `height` rows starting at `y`. Rows past the source
/// stay transparent, the same way a canvas draw past the edge would.
pub fn crop_rows(image: &RgbaImage, y: u32, height: u32) -> RgbaImage {
    let mut band = RgbaImage::new(image.width(), height);
    imageops::replace(&mut band, image, 0, -i64::from(y));
    band
}

pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>, PipelineError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::Encode(format!(
            "cannot encode empty {width}x{height} image"
        )));
    }

    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg { quality } => {
            let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            // No alpha in JPEG: transparent pixels flatten to their RGB (black for empty).
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(|err| PipelineError::Encode(err.to_string()))?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut out)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|err| PipelineError::Encode(err.to_string()))?;
        }
        OutputFormat::WebpLossless => {
            WebPEncoder::new_lossless(&mut out)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|err| PipelineError::Encode(err.to_string()))?;
        }
    }
    Ok(out)
}

/// Name without its final extension. Dotfiles keep their leading dot.
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// `page.PNG` -> `page.webp`; names without an extension get one appended.
pub fn with_extension(name: &str, extension: &str) -> String {
    format!("{}.{extension}", file_stem(name))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{Rgba, RgbaImage};

    use super::{encode, OutputFormat};

    /// PNG bytes of a solid image, for feeding the decode paths.
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 40, 90, 255]));
        encode(&image, OutputFormat::Png).unwrap()
    }

    /// PNG whose rows are coloured by their index, to check which rows a crop kept.
    pub fn striped_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |_, y| Rgba([(y % 256) as u8, (y / 256 % 256) as u8, 0, 255]));
        encode(&image, OutputFormat::Png).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;

    #[test]
    fn header_dimensions_are_read() {
        let bytes = fixtures::png(7, 13);
        assert_eq!(read_dimensions(&bytes).unwrap(), PixelSize::new(7, 13));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_rgba(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert!(matches!(
            read_dimensions(b"nope").unwrap_err(),
            PipelineError::Decode(_)
        ));
    }

    #[test]
    fn narrow_images_are_not_resized() {
        let image = RgbaImage::new(300, 900);
        let out = downscale_to_width(image, 600);
        assert_eq!(out.dimensions(), (300, 900));
    }

    #[test]
    fn wide_images_are_scaled_to_max_width() {
        let image = RgbaImage::new(1200, 1001);
        let out = downscale_to_width(image, 600);
        // 1001 * 600 / 1200 = 500.5 -> 501
        assert_eq!(out.dimensions(), (600, 501));
    }

    #[test]
    fn crop_rows_pads_past_the_source() {
        let image = RgbaImage::from_pixel(4, 10, Rgba([255, 255, 255, 255]));
        let band = crop_rows(&image, 6, 8);
        assert_eq!(band.dimensions(), (4, 8));
        assert_eq!(band.get_pixel(0, 3), &Rgba([255, 255, 255, 255]));
        assert_eq!(band.get_pixel(0, 4), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn every_format_round_trips_dimensions() {
        let image = RgbaImage::from_pixel(5, 9, Rgba([10, 20, 30, 255]));
        for format in [
            OutputFormat::Jpeg { quality: 0.8 },
            OutputFormat::Png,
            OutputFormat::WebpLossless,
        ] {
            let bytes = encode(&image, format).unwrap();
            assert_eq!(read_dimensions(&bytes).unwrap(), PixelSize::new(5, 9), "{format:?}");
        }
    }

    #[test]
    fn empty_images_fail_to_encode() {
        let err = encode(&RgbaImage::new(4, 0), OutputFormat::Png).unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
    }

    #[test]
    fn extension_swap() {
        assert_eq!(with_extension("page_01.PNG", "webp"), "page_01.webp");
        assert_eq!(with_extension("scan", "webp"), "scan.webp");
        assert_eq!(with_extension(".hidden", "png"), ".hidden.png");
        assert_eq!(file_stem("a.b.jpg"), "a.b");
    }

    proptest! {
        #[test]
        fn fit_width_matches_rounded_ratio(width in 1u32..10_000, height in 1u32..40_000, max in 1u32..2_000) {
            let out = fit_width(PixelSize::new(width, height), max);
            if width <= max {
                prop_assert_eq!(out, PixelSize::new(width, height));
            } else {
                let expected = ((height as f64) * (max as f64) / (width as f64)).round().max(1.0) as u32;
                prop_assert_eq!(out, PixelSize::new(max, expected));
            }
        }
    }
}
