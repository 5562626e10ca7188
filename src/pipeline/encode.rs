//! Image encoding in both directions of the pipeline.
//!
//! * Page source: camera photos and uploads are decoded, downscaled to
//!   [`crate::config::ScanConfig::max_page_width`] and re-encoded as JPEG.
//!   A 12 MP phone photo becomes a ~150 KB page the model reads just as well.
//! * Model payload: every page travels as a base64 `ImageData` attachment.
//! * Crops: a cropped region is encoded in the configured
//!   [`CropFormat`] for the review UI and the exported report.

use crate::config::CropFormat;
use crate::document::{EncodedImage, MediaType, PageAsset};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Wrap a page as a base64 attachment for the analysis request.
///
/// `detail: "high"` asks tiling models to read the full resolution; small
/// print on medication leaflets is lost at the low-detail overview.
pub fn page_image_data(page: &PageAsset) -> ImageData {
    let b64 = page.to_base64();
    debug!("Encoded {} page → {} bytes base64", page.mime_type(), b64.len());
    ImageData::new(b64, page.mime_type().as_str()).with_detail("high")
}

/// Decode a raster page, cap its width and re-encode it as JPEG.
///
/// Images narrower than `max_width` keep their size but are still
/// re-encoded so every page reaching the model has the same format.
pub fn normalize_page(
    bytes: &[u8],
    max_width: u32,
    quality: u8,
) -> Result<PageAsset, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_width {
        let height = scaled_height(img.width(), img.height(), max_width);
        debug!(
            "Downscaling page {}x{} → {}x{}",
            img.width(),
            img.height(),
            max_width,
            height
        );
        img.resize_exact(max_width, height, FilterType::Triangle)
    } else {
        img
    };
    let encoded = encode_jpeg(&img, quality)?;
    Ok(PageAsset::new(encoded.data, MediaType::Jpeg))
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let h = (height as u64 * target_width as u64 + width as u64 / 2) / width as u64;
    (h as u32).max(1)
}

/// Encode an image in the requested crop format.
pub fn encode_image(img: &DynamicImage, format: CropFormat) -> Result<EncodedImage, image::ImageError> {
    match format {
        CropFormat::Jpeg { quality } => encode_jpeg(img, quality),
        CropFormat::Png => {
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
            Ok(EncodedImage {
                data: buf,
                mime_type: MediaType::Png,
                width: img.width(),
                height: img.height(),
            })
        }
    }
}

/// JPEG has no alpha channel; transparent PNG pages are flattened to RGB.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
    Ok(EncodedImage {
        data: buf,
        mime_type: MediaType::Jpeg,
        width: img.width(),
        height: img.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use image::{Rgba, RgbaImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 30, 30, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn page_payload_is_base64_with_mime() {
        let page = PageAsset::new(png_bytes(4, 4), MediaType::Png);
        let data = page_image_data(&page);
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, page.data());
    }

    #[test]
    fn wide_page_is_downscaled_to_jpeg() {
        let page = normalize_page(&png_bytes(2048, 1024), 1024, 70).unwrap();
        assert_eq!(page.mime_type(), MediaType::Jpeg);
        let img = image::load_from_memory(page.data()).unwrap();
        assert_eq!((img.width(), img.height()), (1024, 512));
    }

    #[test]
    fn narrow_page_keeps_size() {
        let page = normalize_page(&png_bytes(300, 400), 1024, 70).unwrap();
        let img = image::load_from_memory(page.data()).unwrap();
        assert_eq!((img.width(), img.height()), (300, 400));
    }

    #[test]
    fn undecodable_page_is_an_error() {
        assert!(normalize_page(b"not an image", 1024, 70).is_err());
    }

    #[test]
    fn encode_crop_formats() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 6, Rgba([0, 0, 255, 128])));
        let jpeg = encode_image(&img, CropFormat::Jpeg { quality: 85 }).unwrap();
        assert_eq!(jpeg.mime_type, MediaType::Jpeg);
        assert_eq!(MediaType::sniff(&jpeg.data), Some(MediaType::Jpeg));
        assert_eq!((jpeg.width, jpeg.height), (10, 6));

        let png = encode_image(&img, CropFormat::Png).unwrap();
        assert_eq!(MediaType::sniff(&png.data), Some(MediaType::Png));
    }

    #[test]
    fn scaled_height_rounds_and_never_hits_zero() {
        assert_eq!(scaled_height(3000, 4000, 1024), 1365);
        assert_eq!(scaled_height(10000, 1, 100), 1);
    }
}
