//! Router-level tests: the /detect pipeline is exercised end to end with a
//! mock detector standing in for the ONNX session.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use image::{ImageBuffer, Rgb, RgbImage};
use image_detection::{
    config::{EncoderConfig, ModelConfig},
    detector::{labels::ClassLabel, DetectionError, DetectorService},
    pipeline::{annotate::Annotator, bounding_box::RawDetection},
    server::{build_router, SharedState},
};
use std::{io::Cursor, sync::Arc};
use tower::util::ServiceExt;

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";
const INPUT_SIZE: u32 = 384;

struct MockDetector {
    detections: Vec<RawDetection>,
    labels: Vec<ClassLabel>,
    fail: bool,
}

impl MockDetector {
    fn with_detections(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            labels: vec![
                ClassLabel {
                    label: "person".to_string(),
                    red: 255,
                    green: 0,
                    blue: 0,
                },
                ClassLabel {
                    label: "bicycle".to_string(),
                    red: 0,
                    green: 255,
                    blue: 0,
                },
            ],
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            detections: Vec::new(),
            labels: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl DetectorService for MockDetector {
    async fn detect(&self, _inference: &RgbImage) -> Result<Vec<RawDetection>, DetectionError> {
        if self.fail {
            return Err(DetectionError::Inference("session exploded".to_string()));
        }
        Ok(self.detections.clone())
    }

    fn class_labels(&self) -> &[ClassLabel] {
        &self.labels
    }
}

fn test_router(detector: MockDetector) -> axum::Router {
    let state = SharedState {
        detector: Arc::new(detector),
        annotator: Arc::new(Annotator::new()),
        model_config: ModelConfig {
            model_dir: ".".into(),
            onnx_file: "unused.onnx".to_string(),
            input_size: INPUT_SIZE,
            num_instances: 1,
            iou_threshold: 0.7,
            confidence_threshold: 0.5,
        },
        encoder_config: EncoderConfig { jpeg_quality: 90 },
    };
    build_router(state)
}

fn raw(class_id: usize, confidence: f32, corners: (f32, f32, f32, f32)) -> RawDetection {
    RawDetection::from_corners(class_id, confidence, corners, (INPUT_SIZE, INPUT_SIZE))
}

fn png_bytes(width: u32, height: u32, fill: [u8; 3]) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb(fill));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn multipart_request(field_name: &str, payload: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field_name}\"; \
             filename=\"upload.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/detect")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn decode_data_uri(value: &serde_json::Value) -> image::DynamicImage {
    let uri = value.as_str().unwrap();
    let payload = uri
        .strip_prefix("data:image/jpeg;base64,")
        .expect("missing media-type prefix");
    let bytes = STANDARD.decode(payload).unwrap();
    image::load_from_memory(&bytes).unwrap()
}

#[tokio::test]
async fn ping_returns_awake() {
    let router = test_router(MockDetector::with_detections(Vec::new()));

    let request = Request::builder()
        .method(Method::GET)
        .uri("/ping")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json.get("status").unwrap(), "awake");
}

#[tokio::test]
async fn detect_rejects_missing_image_field() {
    let router = test_router(MockDetector::with_detections(Vec::new()));

    let request = multipart_request("attachment", &png_bytes(10, 10, [0, 0, 0]));
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json.get("error").is_some());
    assert!(json.get("processed_image_base64").is_none());
}

#[tokio::test]
async fn detect_rejects_empty_upload() {
    let router = test_router(MockDetector::with_detections(Vec::new()));

    let request = multipart_request("image", &[]);
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json.get("error").is_some());
    assert!(json.get("processed_image_base64").is_none());
}

#[tokio::test]
async fn detect_rejects_undecodable_upload() {
    let router = test_router(MockDetector::with_detections(Vec::new()));

    let request = multipart_request("image", b"not an image at all");
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn detect_returns_filtered_detections_and_annotated_image() {
    let detections = vec![
        raw(0, 0.9, (96.0, 96.0, 288.0, 288.0)),
        raw(1, 0.3, (0.0, 0.0, 40.0, 40.0)),
        raw(1, 0.6, (300.0, 300.0, 380.0, 380.0)),
    ];
    let router = test_router(MockDetector::with_detections(detections));

    let request = multipart_request("image", &png_bytes(200, 100, [0, 0, 0]));
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    let objects = json.get("detected_objects").unwrap().as_array().unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].get("class").unwrap(), "person");
    assert_eq!(objects[1].get("class").unwrap(), "bicycle");
    for object in objects {
        let bbox = object.get("bbox").unwrap().as_array().unwrap();
        assert_eq!(bbox.len(), 4);
        for coord in bbox {
            let coord = coord.as_f64().unwrap();
            assert!((0.0..=1.0).contains(&coord));
        }
    }

    // The inference box (96,96,288,288) on a 200x100 original lands at
    // pixels (50,25)-(150,75).
    let person_bbox = objects[0].get("bbox").unwrap().as_array().unwrap();
    assert!((person_bbox[0].as_f64().unwrap() - 0.25).abs() < 1e-6);
    assert!((person_bbox[3].as_f64().unwrap() - 0.75).abs() < 1e-6);

    let annotated = decode_data_uri(json.get("processed_image_base64").unwrap()).to_rgb8();
    assert_eq!(annotated.dimensions(), (200, 100));
    // The person box edge is drawn in its class color; JPEG compression
    // smears it, so check the dominant channel only.
    let edge = annotated.get_pixel(50, 50);
    assert!(edge.0[0] > 128, "expected red box edge, got {:?}", edge);
}

#[tokio::test]
async fn detect_with_no_kept_detections_returns_clean_image() {
    let detections = vec![raw(0, 0.2, (10.0, 10.0, 60.0, 60.0))];
    let router = test_router(MockDetector::with_detections(detections));

    let request = multipart_request("image", &png_bytes(64, 64, [40, 80, 120]));
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;

    let objects = json.get("detected_objects").unwrap().as_array().unwrap();
    assert!(objects.is_empty());

    let decoded = decode_data_uri(json.get("processed_image_base64").unwrap()).to_rgb8();
    assert_eq!(decoded.dimensions(), (64, 64));
    // Nothing was drawn: the center pixel is still (approximately, modulo
    // JPEG) the upload's fill color.
    let center = decoded.get_pixel(32, 32);
    for (got, want) in center.0.iter().zip([40u8, 80, 120]) {
        assert!((*got as i16 - want as i16).abs() < 12, "pixel {:?}", center);
    }
}

#[tokio::test]
async fn detect_maps_unknown_class_to_internal_error() {
    let detections = vec![raw(7, 0.9, (10.0, 10.0, 60.0, 60.0))];
    let router = test_router(MockDetector::with_detections(detections));

    let request = multipart_request("image", &png_bytes(32, 32, [0, 0, 0]));
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn detect_maps_model_failure_to_internal_error() {
    let router = test_router(MockDetector::failing());

    let request = multipart_request("image", &png_bytes(32, 32, [0, 0, 0]));
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert!(json.get("error").is_some());
}
