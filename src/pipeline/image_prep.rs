use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("empty image upload")]
    EmptyUpload,
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("decoded image has zero width or height")]
    ZeroDimension,
}

/// The two views of an uploaded image: the orientation-corrected original and
/// the fixed-size copy the model consumes. `inference` is always derived from
/// `original` after orientation correction, so box scale factors and drawn
/// annotations agree.
#[derive(Debug)]
pub struct PreparedImage {
    pub original: RgbImage,
    pub inference: RgbImage,
}

/// Decode an upload, apply EXIF orientation, and resize to the inference
/// grid. CatmullRom is the resampling filter and is held fixed: reconciled
/// coordinates are scaled against exact pixel counts.
pub fn prepare(raw_bytes: &[u8], input_size: u32) -> Result<PreparedImage, PrepareError> {
    if raw_bytes.is_empty() {
        return Err(PrepareError::EmptyUpload);
    }

    let reader = image::ImageReader::new(Cursor::new(raw_bytes))
        .with_guessed_format()
        .map_err(|e| PrepareError::Decode(e.to_string()))?;
    let decoded = reader
        .decode()
        .map_err(|e| PrepareError::Decode(e.to_string()))?;

    let orientation = read_exif_orientation(raw_bytes);
    let original = apply_orientation(decoded, orientation).to_rgb8();

    if original.width() == 0 || original.height() == 0 {
        return Err(PrepareError::ZeroDimension);
    }

    let inference = imageops::resize(&original, input_size, input_size, FilterType::CatmullRom);

    Ok(PreparedImage {
        original,
        inference,
    })
}

/// Read the EXIF orientation tag (0x0112) from the raw upload. Missing or
/// unreadable metadata counts as upright (1).
fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(reader) => reader,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// Rotate/flip pixel data so it matches the intended upright viewing
/// orientation. Values outside 1..=8 are treated as upright.
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
