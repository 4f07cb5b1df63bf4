// THEORY:
// The detector strategy delegates recognition to a hosted object-detection model.
// Each request carries one JPEG frame, base64-encoded, and the service answers with
// a list of center-form boxes. This module converts those into the corner-form
// `Detection`s the classifier understands. Everything network-shaped stays here;
// the library only ever sees the `Detector` trait.

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, RgbImage};
use pack_inspector::error::ClassificationError;
use pack_inspector::{BoundingBox, Detection, Detector};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://detect.roboflow.com";

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

/// One box as the service reports it: center, size, and a class name.
#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

impl From<Prediction> for Detection {
    fn from(p: Prediction) -> Self {
        let (half_w, half_h) = (p.width / 2.0, p.height / 2.0);
        Detection {
            label: p.class,
            confidence: p.confidence,
            bbox: BoundingBox {
                x1: p.x - half_w,
                y1: p.y - half_h,
                x2: p.x + half_w,
                y2: p.y + half_h,
            },
        }
    }
}

pub fn parse_detections(body: &str) -> Result<Vec<Detection>, ClassificationError> {
    let response: InferenceResponse = serde_json::from_str(body)
        .map_err(|err| ClassificationError::Detector(format!("unexpected detector response: {err}")))?;
    Ok(response.predictions.into_iter().map(Detection::from).collect())
}

pub struct HttpDetector {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl HttpDetector {
    pub fn new(api_url: &str, model_id: &str, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/{}", api_url.trim_end_matches('/'), model_id.trim_matches('/')),
            api_key,
        })
    }
}

fn encode_jpeg(image: &RgbImage) -> Result<String, ClassificationError> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Jpeg)
        .map_err(|err| ClassificationError::Detector(format!("encoding frame: {err}")))?;
    Ok(STANDARD.encode(bytes.into_inner()))
}

impl Detector for HttpDetector {
    fn detect(&mut self, image: &RgbImage, confidence_cutoff: f32) -> Result<Vec<Detection>, ClassificationError> {
        let payload = encode_jpeg(image)?;
        let confidence = (confidence_cutoff * 100.0).round().to_string();

        let body = self
            .client
            .post(&self.endpoint)
            .query(&[("api_key", self.api_key.as_str()), ("confidence", confidence.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.text())
            .map_err(|err| ClassificationError::Detector(err.without_url().to_string()))?;

        let detections = parse_detections(&body)?;
        debug!(count = detections.len(), "detector responded");
        Ok(detections)
    }
}
