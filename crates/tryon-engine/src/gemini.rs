use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use tryon_contracts::TryOnError;

use crate::capability::{CapabilityRequest, GenerationCapability, Part};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
/// Credential travels in a header so it never shows up in URLs or error text.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Connection settings, read once at startup.
#[derive(Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub request_timeout_s: f64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("request_timeout_s", &self.request_timeout_s)
            .finish()
    }
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self, TryOnError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TryOnError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("GOOGLE_API_KEY"))
            .ok_or_else(|| TryOnError::configuration("GEMINI_API_KEY or GOOGLE_API_KEY not set"))?;
        let api_base = non_empty("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        let model = non_empty("TRYON_IMAGE_MODEL")
            .unwrap_or_else(|| DEFAULT_GEMINI_IMAGE_MODEL.to_string());
        let request_timeout_s = match non_empty("TRYON_REQUEST_TIMEOUT") {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                TryOnError::configuration(format!("TRYON_REQUEST_TIMEOUT is not a number: {raw}"))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_S,
        }
        .clamp(15.0, 300.0);

        Ok(Self {
            api_key,
            api_base,
            model,
            request_timeout_s,
        })
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        if let Some(model) = model.map(str::trim).filter(|value| !value.is_empty()) {
            self.model = model.to_string();
        }
        self
    }
}

pub struct GeminiCapability {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiCapability {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.config.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn build_payload(request: &CapabilityRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                Part::InlineImage { bytes, mime_type } => json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": BASE64.encode(bytes),
                    }
                }),
                Part::Text(text) => json!({ "text": text }),
            })
            .collect();
        let modalities: Vec<&str> = request
            .response_modalities
            .iter()
            .map(|modality| modality.as_str())
            .collect();
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": modalities,
            },
        })
    }

    /// Parts of the first candidate, images base64-decoded.
    fn extract_parts(response_payload: &Value) -> Result<Vec<Part>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(candidate) = candidates.first() else {
            if let Some(reason) = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                bail!("Gemini blocked the request ({reason})");
            }
            return Ok(Vec::new());
        };

        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();
        for part in parts {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object);
            if let Some(inline) = inline {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                out.push(Part::image(bytes, mime_type));
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push(Part::text(text));
            }
        }
        Ok(out)
    }
}

impl GenerationCapability for GeminiCapability {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> Option<&str> {
        Some(&self.config.model)
    }

    fn generate(&self, request: &CapabilityRequest) -> Result<Vec<Part>> {
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request);
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .timeout(Duration::from_secs_f64(self.config.request_timeout_s))
            .json(&payload)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_parts(&response_payload)
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            crate::truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
