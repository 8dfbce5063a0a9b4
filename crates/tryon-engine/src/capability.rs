use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

/// One element of a request or response exchanged with a generation capability.
#[derive(Clone, PartialEq, Eq)]
pub enum Part {
    InlineImage { bytes: Vec<u8>, mime_type: String },
    Text(String),
}

impl Part {
    pub fn image(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Part::InlineImage {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    /// JSON shape used in logs and receipts; image bytes are reduced to a length.
    pub fn summary(&self) -> Value {
        match self {
            Part::InlineImage { bytes, mime_type } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "size_bytes": bytes.len(),
                }
            }),
            Part::Text(text) => json!({ "text": text }),
        }
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Part::InlineImage { bytes, mime_type } => f
                .debug_struct("InlineImage")
                .field("mime_type", mime_type)
                .field("len", &bytes.len())
                .finish(),
            Part::Text(text) => f.debug_tuple("Text").field(text).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Image,
    Text,
}

impl ResponseModality {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseModality::Image => "IMAGE",
            ResponseModality::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub parts: Vec<Part>,
    pub response_modalities: Vec<ResponseModality>,
}

impl CapabilityRequest {
    pub fn summary(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert(
            "parts".to_string(),
            Value::Array(self.parts.iter().map(Part::summary).collect()),
        );
        out.insert(
            "responseModalities".to_string(),
            Value::Array(
                self.response_modalities
                    .iter()
                    .map(|modality| Value::String(modality.as_str().to_string()))
                    .collect(),
            ),
        );
        out
    }
}

/// External multimodal model invoked once per attempt.
pub trait GenerationCapability: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> Option<&str> {
        None
    }

    fn generate(&self, request: &CapabilityRequest) -> anyhow::Result<Vec<Part>>;
}

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn GenerationCapability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: GenerationCapability + 'static>(&mut self, capability: C) {
        self.capabilities
            .insert(capability.name().to_string(), Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationCapability>> {
        self.capabilities.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }
}
