use crate::pipeline::bounding_box::LabeledDetection;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use std::io::Cursor;
use thiserror::Error;

pub const SUCCESS_MESSAGE: &str = "Detection completed";
const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to encode image as JPEG: {0}")]
    Jpeg(String),
}

#[derive(Serialize, Debug, Clone)]
pub struct DetectedObject {
    pub class: String,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

#[derive(Serialize, Debug)]
pub struct DetectResponse {
    pub processed_image_base64: String,
    pub detected_objects: Vec<DetectedObject>,
    pub message: String,
}

/// Pure serialization boundary: JPEG at the configured quality, base64 with a
/// media-type prefix, plus the kept detections verbatim. No filtering or
/// coordinate transformation happens here.
pub fn encode_response(
    image: &RgbImage,
    kept: &[LabeledDetection],
    jpeg_quality: u8,
) -> Result<DetectResponse, EncodeError> {
    let processed_image_base64 = encode_jpeg_data_uri(image, jpeg_quality)?;

    let detected_objects = kept
        .iter()
        .map(|detection| DetectedObject {
            class: detection.class_label.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
        })
        .collect();

    Ok(DetectResponse {
        processed_image_base64,
        detected_objects,
        message: SUCCESS_MESSAGE.to_string(),
    })
}

pub fn encode_jpeg_data_uri(image: &RgbImage, quality: u8) -> Result<String, EncodeError> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder
            .encode_image(image)
            .map_err(|e| EncodeError::Jpeg(e.to_string()))?;
    }

    Ok(format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(&buffer)))
}
