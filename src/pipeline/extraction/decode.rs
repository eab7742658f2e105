use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, RgbImage};

use super::ExtractionError;

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

const JPEG_QUALITY: u8 = 90;

/// Largest width or height a JPEG header can describe.
pub const JPEG_MAX_DIMENSION: u32 = 65_535;

/// Encoded image bytes and the extension they should be stored under.
#[derive(Debug)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Decode any supported raster format into 8-bit RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ExtractionError> {
    if bytes.is_empty() {
        return Err(ExtractionError::UnsupportedOrCorruptDocument(
            "empty upload".into(),
        ));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| ExtractionError::UnsupportedOrCorruptDocument(e.to_string()))?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, ExtractionError> {
    encode(image, ImageOutputFormat::Jpeg(JPEG_QUALITY), "JPEG")
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, ExtractionError> {
    encode(image, ImageOutputFormat::Png, "PNG")
}

/// JPEG when the image fits the format, PNG otherwise. Long stitched reports
/// outgrow JPEG's 16-bit dimensions.
pub fn encode_for_model(image: &RgbImage) -> Result<EncodedImage, ExtractionError> {
    let (width, height) = image.dimensions();
    if width <= JPEG_MAX_DIMENSION && height <= JPEG_MAX_DIMENSION {
        return Ok(EncodedImage {
            bytes: encode_jpeg(image)?,
            extension: "jpg",
        });
    }

    tracing::debug!(width, height, "Image exceeds JPEG limits, encoding as PNG");
    Ok(EncodedImage {
        bytes: encode_png(image)?,
        extension: "png",
    })
}

fn encode(
    image: &RgbImage,
    format: ImageOutputFormat,
    label: &str,
) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut cursor, format)
        .map_err(|e| ExtractionError::ImageProcessing(format!("{label} encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn decodes_png_to_rgb() {
        let source = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let decoded = decode_image(&encode_png(&source).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedOrCorruptDocument(_)));
    }

    #[test]
    fn empty_is_corrupt() {
        assert!(matches!(
            decode_image(&[]),
            Err(ExtractionError::UnsupportedOrCorruptDocument(_))
        ));
    }

    #[test]
    fn jpeg_round_trip_keeps_dimensions() {
        let source = RgbImage::from_pixel(16, 8, Rgb([200, 200, 200]));
        let jpeg = encode_jpeg(&source).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(decode_image(&jpeg).unwrap().dimensions(), (16, 8));
    }

    #[test]
    fn small_images_are_sent_as_jpeg() {
        let encoded = encode_for_model(&RgbImage::from_pixel(16, 8, Rgb([0, 0, 0]))).unwrap();
        assert_eq!(encoded.extension, "jpg");
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn canvas_taller_than_jpeg_limit_falls_back_to_png() {
        let tall = RgbImage::from_pixel(2, JPEG_MAX_DIMENSION + 1, Rgb([255, 255, 255]));
        let encoded = encode_for_model(&tall).unwrap();
        assert_eq!(encoded.extension, "png");
        assert_eq!(&encoded.bytes[..4], b"\x89PNG");
        assert_eq!(
            decode_image(&encoded.bytes).unwrap().dimensions(),
            (2, JPEG_MAX_DIMENSION + 1)
        );
    }

    #[test]
    fn pdf_magic_detection() {
        assert!(is_pdf(b"%PDF-1.7\n..."));
        assert!(!is_pdf(b"\x89PNG"));
        assert!(!is_pdf(b""));
    }
}
