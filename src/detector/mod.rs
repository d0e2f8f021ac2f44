pub mod labels;
pub mod ort;

use crate::pipeline::bounding_box::RawDetection;
use async_trait::async_trait;
use image::RgbImage;
use labels::ClassLabel;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("model inference failed: {0}")]
    Inference(String),
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
    #[error("class id {0} is not in the label table")]
    UnknownClass(usize),
}

/// Boundary to the detection model. Implementations map the model's native
/// output into `RawDetection` values in the inference image's own pixel grid:
/// no normalization, no confidence filtering — the threshold is applied once,
/// downstream, so the annotated image and the returned list cannot disagree.
#[async_trait]
pub trait DetectorService: Send + Sync + 'static {
    async fn detect(&self, inference: &RgbImage) -> Result<Vec<RawDetection>, DetectionError>;

    /// The id→label table, fixed for the lifetime of the loaded model.
    fn class_labels(&self) -> &[ClassLabel];

    fn label_for(&self, class_id: usize) -> Result<&ClassLabel, DetectionError> {
        self.class_labels()
            .get(class_id)
            .ok_or(DetectionError::UnknownClass(class_id))
    }
}
