use image::{DynamicImage, GrayImage, Luma};
use std::path::Path;

use super::ExtractFailure;

const UPSCALE_FACTOR: u32 = 2;
const BILATERAL_DIAMETER: u32 = 7;
const BILATERAL_SIGMA_COLOR: f32 = 50.0;
const BILATERAL_SIGMA_SPACE: f32 = 50.0;
const THRESHOLD_BLOCK_SIZE: u32 = 31;
const THRESHOLD_OFFSET: f32 = 10.0;

/// Read and decode an image through its raw bytes, so paths never go through
/// a locale-dependent decoder API.
pub(super) fn decode_image(path: &Path) -> Result<DynamicImage, ExtractFailure> {
    let bytes = std::fs::read(path).map_err(|source| ExtractFailure::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Grayscale, upscale small creatives, smooth, then binarize locally.
pub(super) fn prepare_for_ocr(image: &DynamicImage, upscale_floor: u32) -> GrayImage {
    let luma = flatten_to_luma(image);
    let resized = upscale_if_small(luma, upscale_floor);
    let smoothed = bilateral_filter(
        &resized,
        BILATERAL_DIAMETER,
        BILATERAL_SIGMA_COLOR,
        BILATERAL_SIGMA_SPACE,
    );
    adaptive_gaussian_threshold(&smoothed, THRESHOLD_BLOCK_SIZE, THRESHOLD_OFFSET)
}

fn flatten_to_luma(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    // Transparent regions composite onto white.
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

pub(super) fn upscale_if_small(image: GrayImage, floor: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width.max(height) >= floor || width == 0 || height == 0 {
        return image;
    }
    image::imageops::resize(
        &image,
        width.saturating_mul(UPSCALE_FACTOR),
        height.saturating_mul(UPSCALE_FACTOR),
        image::imageops::FilterType::CatmullRom,
    )
}

/// Edge-preserving smoothing over a `diameter`-pixel window.
pub(super) fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    imageproc::filter::bilateral_filter(image, diameter, sigma_color, sigma_space)
}

/// White where a pixel is brighter than its Gaussian-weighted neighbourhood
/// minus `offset`, black otherwise.
pub(super) fn adaptive_gaussian_threshold(
    image: &GrayImage,
    block_size: u32,
    offset: f32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let local_mean =
        imageproc::filter::gaussian_blur_f32(image, gaussian_sigma_for_block(block_size));

    let mut output = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let threshold = local_mean.get_pixel(x, y)[0] as f32 - offset;
        let value = if pixel[0] as f32 > threshold { 255 } else { 0 };
        output.put_pixel(x, y, Luma([value]));
    }
    output
}

// Sigma a Gaussian kernel of `block_size` taps conventionally gets.
fn gaussian_sigma_for_block(block_size: u32) -> f32 {
    0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn upscales_only_below_floor() {
        let small = GrayImage::new(600, 400);
        let scaled = upscale_if_small(small, 1400);
        assert_eq!(scaled.dimensions(), (1200, 800));

        let large = GrayImage::new(1400, 300);
        let kept = upscale_if_small(large, 1400);
        assert_eq!(kept.dimensions(), (1400, 300));
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        let luma = flatten_to_luma(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(luma.get_pixel(0, 0)[0], 255);
        assert_eq!(luma.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn bilateral_keeps_flat_regions_and_sharp_edges() {
        let mut image = GrayImage::from_pixel(20, 20, Luma([200]));
        for y in 0..20 {
            for x in 10..20 {
                image.put_pixel(x, y, Luma([20]));
            }
        }
        let filtered = bilateral_filter(&image, 7, 50.0, 50.0);
        assert!(filtered.get_pixel(2, 10)[0].abs_diff(200) <= 1);
        assert!(filtered.get_pixel(17, 10)[0].abs_diff(20) <= 1);
        // A 180-level step is far outside sigma_color, so it must survive.
        assert!(filtered.get_pixel(9, 10)[0] > 190);
        assert!(filtered.get_pixel(10, 10)[0] < 30);
    }

    #[test]
    fn threshold_is_binary_and_follows_local_background() {
        // Dark text on a left-to-right gradient a global cut would split.
        let mut image = GrayImage::new(120, 40);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            pixel[0] = (60 + x * 160 / 120) as u8;
        }
        for x in [20u32, 100] {
            for dy in 15..25 {
                for dx in 0..4 {
                    let value = image.get_pixel(x + dx, dy)[0];
                    image.put_pixel(x + dx, dy, Luma([value.saturating_sub(50)]));
                }
            }
        }
        let binary = adaptive_gaussian_threshold(&image, 31, 10.0);
        assert!(binary.pixels().all(|pixel| pixel[0] == 0 || pixel[0] == 255));
        assert_eq!(binary.get_pixel(21, 20)[0], 0);
        assert_eq!(binary.get_pixel(101, 20)[0], 0);
        assert_eq!(binary.get_pixel(60, 5)[0], 255);
    }

    #[test]
    fn solid_image_binarizes_to_white() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 30, Luma([90])));
        let prepared = prepare_for_ocr(&image, 1400);
        assert_eq!(prepared.dimensions(), (100, 60));
        assert!(prepared.pixels().all(|pixel| pixel[0] == 255));
    }

    #[test]
    fn missing_and_empty_files_fail_to_decode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("tom.png");
        std::fs::write(&empty, b"").expect("write");
        assert!(matches!(
            decode_image(&empty),
            Err(ExtractFailure::Decode(_))
        ));
        assert!(matches!(
            decode_image(&dir.path().join("saknas.png")),
            Err(ExtractFailure::Read { .. })
        ));
    }
}
