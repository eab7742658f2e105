use std::sync::Arc;

use image::{imageops, DynamicImage, GenericImageView, Rgb, RgbImage};

use super::decode::is_pdf;
use super::pdfium::{PdfPageRenderer, DEFAULT_RENDER_DPI};
use super::ExtractionError;

const CANVAS_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Turns a multi-page PDF into one tall image, pages top to bottom.
pub struct PdfStitcher {
    renderer: Arc<dyn PdfPageRenderer>,
    dpi: u32,
}

impl PdfStitcher {
    pub fn new(renderer: Arc<dyn PdfPageRenderer>) -> Self {
        Self {
            renderer,
            dpi: DEFAULT_RENDER_DPI,
        }
    }

    pub fn stitch(&self, pdf_bytes: &[u8]) -> Result<RgbImage, ExtractionError> {
        if !is_pdf(pdf_bytes) {
            return Err(ExtractionError::UnsupportedOrCorruptDocument(
                "missing %PDF- header".into(),
            ));
        }
        let pages = self.renderer.render_pages(pdf_bytes, self.dpi)?;
        let stitched = stitch_pages(&pages)?;
        tracing::debug!(
            pages = pages.len(),
            width = stitched.width(),
            height = stitched.height(),
            "PDF stitched"
        );
        Ok(stitched)
    }
}

/// Paste pages left-aligned at cumulative offsets on a white canvas of
/// max width × summed height. No scaling, no centering.
pub fn stitch_pages(pages: &[DynamicImage]) -> Result<RgbImage, ExtractionError> {
    if pages.is_empty() {
        return Err(ExtractionError::EmptyDocument);
    }

    let width = pages.iter().map(|p| p.width()).max().unwrap_or(0);
    let height = pages
        .iter()
        .try_fold(0u32, |acc, p| acc.checked_add(p.height()))
        .ok_or_else(|| ExtractionError::ImageProcessing("stitched height overflows".into()))?;

    let mut canvas = RgbImage::from_pixel(width, height, CANVAS_BACKGROUND);
    let mut offset = 0u32;
    for page in pages {
        imageops::replace(&mut canvas, &page.to_rgb8(), 0, offset);
        offset += page.height();
    }
    Ok(canvas)
}
