use crate::pipeline::bounding_box::LabeledDetection;
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

/// The two ways a request's image can leave the annotator: drawn on, or the
/// untouched original when drawing is unavailable. Either way the request
/// carries on and the detection list is returned.
pub enum AnnotationOutcome {
    Annotated(RgbImage),
    Unannotated(RgbImage),
}

impl AnnotationOutcome {
    pub fn into_image(self) -> RgbImage {
        match self {
            AnnotationOutcome::Annotated(image) => image,
            AnnotationOutcome::Unannotated(image) => image,
        }
    }

    pub fn is_annotated(&self) -> bool {
        matches!(self, AnnotationOutcome::Annotated(_))
    }
}

/// Draws rectangles and `"<class> <confidence>"` labels for the kept
/// detections onto a copy of the original image.
pub struct Annotator {
    font: Option<FontRef<'static>>,
}

impl Annotator {
    pub fn new() -> Self {
        let font = match FontRef::try_from_slice(include_bytes!("../../assets/font.ttf")) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!("label font unavailable, annotations disabled: {}", e);
                None
            }
        };
        Self { font }
    }

    /// Render the kept detections onto a copy of `original`. The caller's
    /// image is never mutated. Degenerate or off-canvas boxes are skipped.
    pub fn render(&self, original: &RgbImage, detections: &[LabeledDetection]) -> AnnotationOutcome {
        let Some(font) = &self.font else {
            return AnnotationOutcome::Unannotated(original.clone());
        };

        let mut image = original.clone();
        for detection in detections {
            draw_detection(&mut image, detection, font);
        }
        AnnotationOutcome::Annotated(image)
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

fn draw_detection(image: &mut RgbImage, detection: &LabeledDetection, font: &FontRef<'_>) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    let pixel_box = &detection.pixel_box;

    let x1 = (pixel_box.x1 as i32).clamp(0, width - 1);
    let y1 = (pixel_box.y1 as i32).clamp(0, height - 1);
    let x2 = (pixel_box.x2 as i32).clamp(0, width - 1);
    let y2 = (pixel_box.y2 as i32).clamp(0, height - 1);

    if x1 >= x2 || y1 >= y2 {
        return;
    }

    let color = Rgb([detection.red, detection.green, detection.blue]);

    for t in 0..BOX_THICKNESS {
        // Rect spans x..x+w-1, so the width is corner-inclusive.
        let box_width = x2 - x1 + 1 - 2 * t;
        let box_height = y2 - y1 + 1 - 2 * t;
        if box_width <= 0 || box_height <= 0 {
            break;
        }
        let rect = Rect::at(x1 + t, y1 + t).of_size(box_width as u32, box_height as u32);
        draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{} {:.2}", detection.class_label, detection.confidence);

    let text_width = (label.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    // Keep the label inside the canvas: above the box when there is room,
    // pushed down to the top edge otherwise.
    let label_x = x1;
    let label_y = (y1 - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(width - label_x);
    if label_width <= 0 {
        return;
    }

    let background = Rect::at(label_x, label_y).of_size(label_width as u32, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, background, color);

    draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        PxScale::from(LABEL_FONT_SIZE),
        font,
        &label,
    );
}
