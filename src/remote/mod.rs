//! Remote generation service client.
//!
//! The pipeline consumes two remote capabilities: text-to-image and
//! image-to-3D. Both are reached through [`GenerationService::call`], which
//! takes a capability id and a typed request and returns a typed response —
//! the wire-level "maybe this field, maybe that one" shapes are resolved
//! here into a tagged union, so callers never presence-check arbitrary keys.
//!
//! `HttpGenerationService` is the production implementation; tests supply
//! their own `GenerationService` with scripted responses.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::AppError;

// ── Request / response types ──────────────────────────────────────────────────

/// A request to a remote generation capability.
#[derive(Debug, Clone)]
pub enum GenerationRequest {
    /// Synthesize an image from a (usually expanded) text prompt.
    TextToImage { prompt: String },
    /// Synthesize a 3D asset from a base64-encoded source image.
    ImageToModel { image_base64: String },
}

/// Container format of a returned 3D asset. Chooses the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Glb,
    Mp4,
}

impl ModelFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ModelFormat::Glb => "glb",
            ModelFormat::Mp4 => "mp4",
        }
    }
}

/// A successfully decoded generation response.
///
/// Absent or malformed payloads never reach this type — they are reported as
/// [`AppError::Remote`] by the service implementation.
#[derive(Debug, Clone)]
pub enum GenerationResponse {
    Image { data: Vec<u8> },
    Model { data: Vec<u8>, format: ModelFormat },
}

// ── Service trait ─────────────────────────────────────────────────────────────

/// Blocking request/response access to a remote generation capability.
pub trait GenerationService: Send + Sync {
    fn call(
        &self,
        capability_id: &str,
        request: &GenerationRequest,
        user_id: &str,
    ) -> Result<GenerationResponse, AppError>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

/// Wire shape of the text-to-image capability's response.
#[derive(Deserialize)]
struct ImagePayload {
    /// Base64-encoded image bytes.
    result: Option<String>,
}

/// Wire shape of the image-to-3D capability's response. The asset arrives
/// under one of two alternative fields; `generated_object` is preferred.
#[derive(Deserialize)]
struct AssetPayload {
    generated_object: Option<String>,
    video_object: Option<String>,
}

pub struct HttpGenerationService {
    client: Client,
    /// Appended to capability ids that carry no domain part.
    network_suffix: String,
}

impl HttpGenerationService {
    pub fn new(network_suffix: String, timeout_seconds: u64) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Remote(format!("build http client: {e}")))?;
        Ok(Self { client, network_suffix })
    }

    /// Bare capability ids get the configured domain suffix appended.
    fn endpoint(&self, capability_id: &str) -> String {
        let host = if capability_id.contains('.') {
            capability_id.to_string()
        } else {
            format!("{capability_id}.{}", self.network_suffix)
        };
        format!("https://{host}/execution")
    }

    fn post_json(
        &self,
        capability_id: &str,
        body: &serde_json::Value,
        user_id: &str,
    ) -> Result<serde_json::Value, AppError> {
        let url = self.endpoint(capability_id);
        debug!(%url, %user_id, "calling generation capability");

        let resp = self
            .client
            .post(&url)
            .query(&[("uid", user_id)])
            .json(body)
            .send()
            .map_err(|e| AppError::Remote(format!("[{capability_id}] request: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Remote(format!("[{capability_id}] HTTP {status}")));
        }

        resp.json()
            .map_err(|e| AppError::Remote(format!("[{capability_id}] malformed response: {e}")))
    }
}

impl GenerationService for HttpGenerationService {
    fn call(
        &self,
        capability_id: &str,
        request: &GenerationRequest,
        user_id: &str,
    ) -> Result<GenerationResponse, AppError> {
        match request {
            GenerationRequest::TextToImage { prompt } => {
                let body = serde_json::json!({ "prompt": prompt });
                let raw = self.post_json(capability_id, &body, user_id)?;
                decode_image_payload(capability_id, raw)
            }
            GenerationRequest::ImageToModel { image_base64 } => {
                let body = serde_json::json!({ "input_image": image_base64 });
                let raw = self.post_json(capability_id, &body, user_id)?;
                decode_asset_payload(capability_id, raw)
            }
        }
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_image_payload(
    capability_id: &str,
    raw: serde_json::Value,
) -> Result<GenerationResponse, AppError> {
    let payload: ImagePayload = serde_json::from_value(raw)
        .map_err(|e| AppError::Remote(format!("[{capability_id}] unexpected shape: {e}")))?;

    let encoded = payload
        .result
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Remote(format!("[{capability_id}] response missing result")))?;

    let data = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| AppError::Remote(format!("[{capability_id}] invalid image payload: {e}")))?;

    Ok(GenerationResponse::Image { data })
}

fn decode_asset_payload(
    capability_id: &str,
    raw: serde_json::Value,
) -> Result<GenerationResponse, AppError> {
    let payload: AssetPayload = serde_json::from_value(raw)
        .map_err(|e| AppError::Remote(format!("[{capability_id}] unexpected shape: {e}")))?;

    // Prefer the generated object; the video rendition is a fallback.
    let (encoded, format) = match (
        payload.generated_object.filter(|s| !s.is_empty()),
        payload.video_object.filter(|s| !s.is_empty()),
    ) {
        (Some(obj), _) => (obj, ModelFormat::Glb),
        (None, Some(video)) => (video, ModelFormat::Mp4),
        (None, None) => {
            return Err(AppError::Remote(format!(
                "[{capability_id}] response missing generated_object and video_object"
            )));
        }
    };

    let data = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| AppError::Remote(format!("[{capability_id}] invalid asset payload: {e}")))?;

    Ok(GenerationResponse::Model { data, format })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(data: &[u8]) -> String {
        BASE64.encode(data)
    }

    #[test]
    fn image_payload_decodes() {
        let raw = serde_json::json!({ "result": b64(b"png-bytes") });
        let resp = decode_image_payload("app", raw).unwrap();
        match resp {
            GenerationResponse::Image { data } => assert_eq!(data, b"png-bytes"),
            _ => panic!("expected image response"),
        }
    }

    #[test]
    fn image_payload_missing_result_errors() {
        let err = decode_image_payload("app", serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("missing result"));
    }

    #[test]
    fn image_payload_empty_result_errors() {
        let raw = serde_json::json!({ "result": "" });
        assert!(decode_image_payload("app", raw).is_err());
    }

    #[test]
    fn asset_payload_prefers_generated_object() {
        let raw = serde_json::json!({
            "generated_object": b64(b"glb-bytes"),
            "video_object": b64(b"mp4-bytes"),
        });
        match decode_asset_payload("app", raw).unwrap() {
            GenerationResponse::Model { data, format } => {
                assert_eq!(data, b"glb-bytes");
                assert_eq!(format, ModelFormat::Glb);
            }
            _ => panic!("expected model response"),
        }
    }

    #[test]
    fn asset_payload_falls_back_to_video() {
        let raw = serde_json::json!({ "video_object": b64(b"mp4-bytes") });
        match decode_asset_payload("app", raw).unwrap() {
            GenerationResponse::Model { data, format } => {
                assert_eq!(data, b"mp4-bytes");
                assert_eq!(format, ModelFormat::Mp4);
            }
            _ => panic!("expected model response"),
        }
    }

    #[test]
    fn asset_payload_empty_fields_error() {
        let raw = serde_json::json!({ "generated_object": "", "video_object": "" });
        let err = decode_asset_payload("app", raw).unwrap_err();
        assert!(err.to_string().contains("missing generated_object"));
    }

    #[test]
    fn model_format_extensions() {
        assert_eq!(ModelFormat::Glb.extension(), "glb");
        assert_eq!(ModelFormat::Mp4.extension(), "mp4");
    }

    #[test]
    fn endpoint_appends_suffix_to_bare_ids() {
        let svc = HttpGenerationService::new("example.net".into(), 1).unwrap();
        assert_eq!(svc.endpoint("abc123"), "https://abc123.example.net/execution");
        assert_eq!(svc.endpoint("abc123.other.host"), "https://abc123.other.host/execution");
    }
}
