use crate::{
    detector::DetectionError,
    pipeline::{
        annotate::AnnotationOutcome,
        encode::{encode_response, DetectResponse, EncodeError},
        image_prep::{prepare, PrepareError},
        reconcile::{filter_detections, reconcile},
    },
    server::SharedState,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectRequestError {
    #[error("missing `image` form field")]
    MissingImageField,
    #[error("invalid multipart request: {0}")]
    Multipart(String),
    #[error(transparent)]
    Prepare(#[from] PrepareError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl DetectRequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            DetectRequestError::MissingImageField
            | DetectRequestError::Multipart(_)
            | DetectRequestError::Prepare(_) => StatusCode::BAD_REQUEST,
            DetectRequestError::Detection(_) | DetectRequestError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DetectRequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!("detect request failed ({}): {}", status, self);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /detect`: decode and orientation-correct the upload, run the model
/// on the fixed-size view, reconcile boxes back to the original image, apply
/// the confidence threshold once, then annotate and serialize.
#[instrument(skip(state, multipart))]
pub async fn detect(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<DetectResponse>, DetectRequestError> {
    let image_bytes = read_image_field(&mut multipart).await?;

    let prepared = prepare(&image_bytes, state.model_config.input_size)?;
    let original_size = prepared.original.dimensions();
    let inference_size = prepared.inference.dimensions();

    let raw_detections = state.detector.detect(&prepared.inference).await?;

    let mut labeled = Vec::with_capacity(raw_detections.len());
    for raw in &raw_detections {
        let label = state.detector.label_for(raw.class_id)?;
        labeled.push(reconcile(raw, label, original_size, inference_size));
    }

    // The one filtering pass; the annotator and the payload both consume it.
    let kept = filter_detections(labeled, state.model_config.confidence_threshold);
    tracing::debug!(
        "keeping {} of {} detections at threshold {}",
        kept.len(),
        raw_detections.len(),
        state.model_config.confidence_threshold
    );

    let image = match state.annotator.render(&prepared.original, &kept) {
        AnnotationOutcome::Annotated(image) => image,
        AnnotationOutcome::Unannotated(image) => image,
    };

    let quality = state.encoder_config.jpeg_quality;
    let response = match encode_response(&image, &kept, quality) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                "annotated image encoding failed, returning unannotated original: {}",
                e
            );
            encode_response(&prepared.original, &kept, quality)?
        }
    };

    Ok(Json(response))
}

async fn read_image_field(multipart: &mut Multipart) -> Result<Vec<u8>, DetectRequestError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectRequestError::Multipart(e.to_string()))?
    {
        if field.name() == Some("image") {
            let data = field
                .bytes()
                .await
                .map_err(|e| DetectRequestError::Multipart(e.to_string()))?;
            return Ok(data.to_vec());
        }
    }

    Err(DetectRequestError::MissingImageField)
}
