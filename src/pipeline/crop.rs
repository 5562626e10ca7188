//! Region cropper: cut detected graphics out of their source pages.
//!
//! Boxes are `[ymin, xmin, ymax, xmax]` in thousandths of the page they were
//! detected on, so the same box means the same region whatever resolution
//! the page source produced. Geometry is clamped to the decoded image; a box
//! that clamps to nothing is declined (`Ok(None)`), never an error.
//!
//! [`crop_all`] runs one blocking task per graphic and joins them
//! all-settled: a failed crop is logged and leaves the others untouched.

use crate::config::CropFormat;
use crate::document::{BoundingBox, DetectedGraphic, EncodedImage, ExtractedGraphic, PageAsset};
use crate::error::CropError;
use crate::pipeline::encode::encode_image;
use futures::future::join_all;
use tracing::{debug, warn};

/// Pixel rectangle inside a decoded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Map a normalised box onto an image of `width` × `height` pixels.
///
/// Returns `None` when the clamped rectangle has no area.
pub fn crop_rect(bbox: BoundingBox, width: u32, height: u32) -> Option<CropRect> {
    let (w, h) = (width as f64, height as f64);
    let x = (bbox.xmin() as f64 / 1000.0 * w).max(0.0);
    let y = (bbox.ymin() as f64 / 1000.0 * h).max(0.0);
    // Coordinates span the whole i32 range; subtract in f64.
    let cw = ((bbox.xmax() as f64 - bbox.xmin() as f64) / 1000.0 * w).min(w - x);
    let ch = ((bbox.ymax() as f64 - bbox.ymin() as f64) / 1000.0 * h).min(h - y);
    if cw <= 0.0 || ch <= 0.0 {
        return None;
    }

    let x = x.floor() as u32;
    let y = y.floor() as u32;
    if x >= width || y >= height {
        return None;
    }
    let cw = (cw.round() as u32).clamp(1, width - x);
    let ch = (ch.round() as u32).clamp(1, height - y);
    Some(CropRect {
        x,
        y,
        width: cw,
        height: ch,
    })
}

/// Crop one region out of `page`.
///
/// `page_index` only labels errors. PDF pages are declined.
pub fn crop(
    page: &PageAsset,
    page_index: usize,
    bbox: BoundingBox,
    format: CropFormat,
) -> Result<Option<EncodedImage>, CropError> {
    if page.is_pdf() {
        debug!("Page {}: PDF source, crop skipped", page_index);
        return Ok(None);
    }

    let img = image::load_from_memory(page.data()).map_err(|e| CropError::Decode {
        page: page_index,
        detail: e.to_string(),
    })?;

    let Some(rect) = crop_rect(bbox, img.width(), img.height()) else {
        debug!("Page {}: degenerate box {:?}, crop skipped", page_index, bbox.0);
        return Ok(None);
    };

    let region = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
    encode_image(&region, format)
        .map(Some)
        .map_err(|e| CropError::Encode {
            detail: e.to_string(),
        })
}

/// Crop every detected graphic concurrently and keep the successes.
///
/// `graphics` pairs each graphic with its position in the model's array,
/// which becomes the `graphic-<n>` id. Output order follows input order.
pub async fn crop_all(
    pages: &[PageAsset],
    graphics: Vec<(usize, DetectedGraphic)>,
    format: CropFormat,
) -> Vec<ExtractedGraphic> {
    let tasks = graphics.into_iter().filter_map(|(idx, graphic)| {
        let (page_index, page) = resolve_page(pages, graphic.page_index)?;
        let page = page.clone();
        Some(async move {
            let bbox = graphic.bbox;
            let result = tokio::task::spawn_blocking(move || crop(&page, page_index, bbox, format))
                .await
                .map_err(|e| CropError::TaskFailed(e.to_string()))
                .and_then(|r| r);
            (idx, graphic, page_index, result)
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .filter_map(|(idx, graphic, page_index, result)| match result {
            Ok(Some(image)) => Some(ExtractedGraphic {
                id: format!("graphic-{idx}"),
                bbox: graphic.bbox,
                label: graphic.label,
                page_index,
                image,
                selected: true,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Graphic {} ({}) dropped: {}", idx, graphic.label, e);
                None
            }
        })
        .collect()
}

/// `pages[index]`, falling back to the first page when out of range.
fn resolve_page(pages: &[PageAsset], index: usize) -> Option<(usize, &PageAsset)> {
    match pages.get(index) {
        Some(page) => Some((index, page)),
        None => {
            let first = pages.first()?;
            warn!(
                "page_index {} out of range ({} pages), cropping page 0",
                index,
                pages.len()
            );
            Some((0, first))
        }
    }
}
