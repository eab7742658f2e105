//! PDF page rendering via Google PDFium.
//!
//! `PdfiumRenderer` is stateless (`Send + Sync`). Each call binds a fresh
//! `Pdfium` instance because the upstream type is `!Send`; the OS caches the
//! `dlopen`, so repeat loads are near-free.

use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::ExtractionError;

/// Maximum dimension (width or height) for a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

pub const DEFAULT_RENDER_DPI: u32 = 200;

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Rasterizes every page of a PDF, in order.
pub trait PdfPageRenderer: Send + Sync {
    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, ExtractionError>;
}

pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Create a renderer, verifying the PDFium library is loadable.
    pub fn new() -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self)
    }
}

/// Load the PDFium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path)
/// 2. Alongside the running executable, then `<exe_dir>/pdfium/lib`
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading PDFium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(|e| {
            ExtractionError::PdfRendering {
                page: 0,
                reason: format!("Failed to load PDFium from {path}: {e}"),
            }
        })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.to_path_buf(),
                exe_dir.join("pdfium").join("lib"),
            ];
            for dir in &candidates {
                let lib_path = Pdfium::pdfium_platform_library_name_at_path(
                    dir.to_string_lossy().as_ref(),
                );
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    debug!(dir = %dir.display(), "Loaded PDFium from candidate directory");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ),
        })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> ExtractionError {
    load_failure(&e.to_string())
}

/// Password-protected files are reported as such; the flow treats them like
/// any other unreadable document.
fn load_failure(message: &str) -> ExtractionError {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::UnsupportedOrCorruptDocument("PDF is password-protected".into())
    } else {
        ExtractionError::UnsupportedOrCorruptDocument(format!("Failed to load PDF: {message}"))
    }
}

/// Pixel size for a page, both sides clamped to [1, MAX_DIMENSION_PX] with
/// the aspect ratio preserved when capping.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn render_pages(&self, pdf_bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, ExtractionError> {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(map_load_error)?;

        let mut rendered = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let (target_w, target_h) =
                compute_render_dimensions(page.width().value, page.height().value, dpi);
            if target_w == MAX_DIMENSION_PX || target_h == MAX_DIMENSION_PX {
                warn!(page = index, target_w, target_h, "Page dimensions capped");
            }

            let config = PdfRenderConfig::new()
                .set_target_width(target_w as i32)
                .set_maximum_height(target_h as i32);

            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| ExtractionError::PdfRendering {
                    page: index,
                    reason: format!("Rendering failed: {e}"),
                })?;

            let image = bitmap.as_image();
            debug!(page = index, width = image.width(), height = image.height(), "Rendered PDF page");
            rendered.push(image);
        }

        Ok(rendered)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock renderer producing solid pages of fixed sizes, without PDFium.
pub struct MockPdfPageRenderer {
    page_sizes: Vec<(u32, u32)>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockPdfPageRenderer {
    pub fn new(page_sizes: Vec<(u32, u32)>) -> Self {
        Self {
            page_sizes,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every render fails as a corrupt PDF would.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fill colour of page `index`, so tests can tell pages apart.
    pub fn page_color(index: usize) -> Rgb<u8> {
        let shade = (index as u8).wrapping_mul(40);
        Rgb([shade, 0, 255 - shade])
    }
}

impl PdfPageRenderer for MockPdfPageRenderer {
    fn render_pages(&self, _pdf_bytes: &[u8], _dpi: u32) -> Result<Vec<DynamicImage>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ExtractionError::PdfRendering {
                page: 0,
                reason: "mock render failure".into(),
            });
        }
        Ok(self
            .page_sizes
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Self::page_color(i)))
            })
            .collect())
    }
}
