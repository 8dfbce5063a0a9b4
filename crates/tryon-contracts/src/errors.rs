use std::fmt;

use thiserror::Error;

/// Fixed marker every post-validation failure message starts with.
pub const GENERATION_FAILED_PREFIX: &str = "Generation failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Subject,
    Outfit,
    Result,
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageRole::Subject => "subject",
            ImageRole::Outfit => "outfit",
            ImageRole::Result => "result",
        })
    }
}

/// Reasons a draft is rejected before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputProblem {
    #[error("Please upload a photo of yourself.")]
    MissingSubject,
    #[error("Please describe the outfit.")]
    EmptyOutfitText,
    #[error("Please upload an image of the outfit.")]
    MissingOutfitImage,
    #[error("Unsupported {role} image type '{mime_type}'. Use PNG, JPEG or WEBP.")]
    UnsupportedMediaType { role: ImageRole, mime_type: String },
    #[error("The {0} image is empty.")]
    EmptyImage(ImageRole),
    #[error("Creativity level {0} is outside 0-100.")]
    CreativityOutOfRange(i64),
    #[error("Generate an image first.")]
    NoResultYet,
}

/// Classified outcome of a request that reached the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("The model described what it would do instead of returning an image. Try rephrasing the outfit or adjusting the creativity level.")]
    ModelEchoedInstructions,
    #[error("The model returned a text response instead of an image: \"{0}\"")]
    ModelReturnedTextInstead(String),
    #[error("No image was generated. The model response contained no image data.")]
    EmptyResponse,
    #[error("{0}")]
    Capability(String),
}

impl FailureReason {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::ModelEchoedInstructions => "model_echoed_instructions",
            FailureReason::ModelReturnedTextInstead(_) => "model_returned_text_instead",
            FailureReason::EmptyResponse => "empty_response",
            FailureReason::Capability(_) => "capability_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryOnError {
    #[error(transparent)]
    InvalidInput(#[from] InputProblem),
    #[error("Generation failed. Could not decode the {image} image: {message}")]
    Decode { image: ImageRole, message: String },
    #[error("Generation failed. {0}")]
    Configuration(String),
    #[error("Generation failed. {0}")]
    Generation(#[from] FailureReason),
}

impl TryOnError {
    pub fn decode(image: ImageRole, err: impl fmt::Display) -> Self {
        TryOnError::Decode {
            image,
            message: err.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        TryOnError::Configuration(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TryOnError::InvalidInput(_) => "invalid_input",
            TryOnError::Decode { .. } => "decode_error",
            TryOnError::Configuration(_) => "configuration_error",
            TryOnError::Generation(reason) => reason.kind(),
        }
    }

    /// True when the attempt never reached the generation capability.
    pub fn is_pre_request(&self) -> bool {
        !matches!(self, TryOnError::Generation(_))
    }
}
