use std::fmt;

use crate::errors::{FailureReason, ImageRole, InputProblem, TryOnError};
use crate::inputs::{MediaType, SubjectImage};

/// Image returned by the generation capability.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl GeneratedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Declared type when allow-listed, otherwise whatever the bytes look like.
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_mime(&self.mime_type).or_else(|| MediaType::sniff(&self.bytes))
    }

    pub fn file_extension(&self) -> &'static str {
        self.media_type().map(MediaType::extension).unwrap_or("png")
    }

    /// Feeds the result back in as the next subject photo.
    pub fn into_subject(self) -> Result<SubjectImage, InputProblem> {
        let media_type =
            self.media_type()
                .ok_or_else(|| InputProblem::UnsupportedMediaType {
                    role: ImageRole::Result,
                    mime_type: self.mime_type.clone(),
                })?;
        SubjectImage::with_media_type(ImageRole::Result, self.bytes, media_type)
    }
}

impl fmt::Debug for GeneratedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedImage")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Image(GeneratedImage),
    Failure(FailureReason),
}

impl GenerationResult {
    pub fn into_result(self) -> Result<GeneratedImage, TryOnError> {
        match self {
            GenerationResult::Image(image) => Ok(image),
            GenerationResult::Failure(reason) => Err(TryOnError::Generation(reason)),
        }
    }
}
