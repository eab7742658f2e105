pub mod decode;
pub mod pdfium;
pub mod stitch;

pub use decode::*;
pub use pdfium::*;
pub use stitch::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Document has no pages")]
    EmptyDocument,

    #[error("Unsupported or corrupt document: {0}")]
    UnsupportedOrCorruptDocument(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),
}
