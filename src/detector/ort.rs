use crate::{
    config::ModelConfig,
    detector::{labels::ClassLabel, DetectionError, DetectorService},
    pipeline::bounding_box::RawDetection,
};
use async_trait::async_trait;
use image::RgbImage;
use ndarray::{s, Array, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime detector. Sessions are not guaranteed thread-safe, so each
/// lives behind a mutex and requests pick one round-robin.
pub struct OrtDetector {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    input_size: u32,
    iou_threshold: f32,
    class_labels: Vec<ClassLabel>,
}

impl OrtDetector {
    pub fn new(
        model_config: &ModelConfig,
        class_labels: Vec<ClassLabel>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit();
        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            input_size: model_config.input_size,
            iou_threshold: model_config.iou_threshold,
            class_labels,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| DetectionError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| DetectionError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("inference failed: {}", e)))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectionError::MalformedOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

#[async_trait]
impl DetectorService for OrtDetector {
    async fn detect(&self, inference: &RgbImage) -> Result<Vec<RawDetection>, DetectionError> {
        let input = image_to_tensor(inference, self.input_size)?;
        let outputs = self.run_inference(&input)?;
        let boxes = parse_predictions(&outputs, (self.input_size, self.input_size))?;
        let detections = non_maximum_suppression(boxes, self.iou_threshold);

        tracing::debug!("model produced {} candidate detections", detections.len());
        Ok(detections)
    }

    fn class_labels(&self) -> &[ClassLabel] {
        &self.class_labels
    }
}

/// Pixel data to an NCHW float tensor in [0,1]. The image must already be at
/// the inference resolution; the preparer owns the resize.
fn image_to_tensor(image: &RgbImage, input_size: u32) -> Result<Array<f32, Ix4>, DetectionError> {
    if image.dimensions() != (input_size, input_size) {
        return Err(DetectionError::Inference(format!(
            "expected {size}x{size} inference image, got {w}x{h}",
            size = input_size,
            w = image.width(),
            h = image.height()
        )));
    }

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let (x, y) = (x as usize, y as usize);
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Decode the `[1, 4+num_classes, N]` output tensor: per anchor column a
/// center-format box in inference pixels plus one score per class, of which
/// the argmax becomes the candidate's class id and confidence. Every anchor
/// is passed through — thresholding happens downstream.
fn parse_predictions(
    outputs: &ndarray::ArrayD<f32>,
    grid: (u32, u32),
) -> Result<Vec<RawDetection>, DetectionError> {
    let shape = outputs.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
        return Err(DetectionError::MalformedOutput(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }

    let output = outputs.slice(s![0, .., ..]);
    let mut boxes = Vec::with_capacity(shape[2]);

    for column in output.axis_iter(Axis(1)) {
        let column: Vec<f32> = column.iter().copied().collect();
        let (class_id, confidence) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
            .ok_or_else(|| {
                DetectionError::MalformedOutput("output column has no class scores".to_string())
            })?;

        let (xc, yc, w, h) = (column[0], column[1], column[2], column[3]);
        boxes.push(RawDetection::from_corners(
            class_id,
            confidence,
            (xc - w / 2., yc - h / 2., xc + w / 2., yc + h / 2.),
            grid,
        ));
    }

    Ok(boxes)
}

fn intersection(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &RawDetection, box2: &RawDetection) -> f32 {
    box1.area() + box2.area() - intersection(box1, box2)
}

/// Greedy NMS, confidence-sorted. Deduplicates overlapping candidates of the
/// model grid; it never drops by confidence alone.
fn non_maximum_suppression(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|other| {
            let union = union(&best, other);
            union <= 0. || intersection(&best, other) / union < iou_threshold
        });
        result.push(best);
    }

    result
}
