use crate::detector::labels::ClassLabel;
use crate::pipeline::bounding_box::{LabeledDetection, PixelBox, RawDetection};

/// Map a raw detection from inference-pixel space back into the original
/// image.
///
/// Per-axis scale factors rescale the box into original-pixel space, the
/// result is clamped to the image bounds and truncated to integers exactly
/// once, and the normalized `[0,1]` bbox is derived from those same integers
/// so the drawn annotations and the returned coordinates can never diverge.
/// Scale math runs in f64 so that exact ratios (e.g. a box covering the full
/// inference grid) survive the float round trip.
pub fn reconcile(
    raw: &RawDetection,
    label: &ClassLabel,
    original_size: (u32, u32),
    inference_size: (u32, u32),
) -> LabeledDetection {
    let (orig_w, orig_h) = original_size;
    let (infer_w, infer_h) = inference_size;

    let to_original = |coord: f32, orig: u32, infer: u32| -> u32 {
        (coord as f64 * orig as f64 / infer as f64).clamp(0.0, orig as f64) as u32
    };

    let pixel_box = PixelBox {
        x1: to_original(raw.x1, orig_w, infer_w),
        y1: to_original(raw.y1, orig_h, infer_h),
        x2: to_original(raw.x2, orig_w, infer_w),
        y2: to_original(raw.y2, orig_h, infer_h),
    };

    let bbox = [
        pixel_box.x1 as f32 / orig_w as f32,
        pixel_box.y1 as f32 / orig_h as f32,
        pixel_box.x2 as f32 / orig_w as f32,
        pixel_box.y2 as f32 / orig_h as f32,
    ];

    LabeledDetection {
        class_label: label.label.clone(),
        red: label.red,
        green: label.green,
        blue: label.blue,
        confidence: raw.confidence,
        bbox,
        pixel_box,
    }
}

/// Keep detections with `confidence >= threshold`. Invoked once per request;
/// the returned list is the single source of truth for both the annotator
/// and the response payload.
pub fn filter_detections(
    detections: Vec<LabeledDetection>,
    threshold: f32,
) -> Vec<LabeledDetection> {
    detections
        .into_iter()
        .filter(|detection| detection.confidence >= threshold)
        .collect()
}
