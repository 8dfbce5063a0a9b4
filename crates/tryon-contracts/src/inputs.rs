use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::errors::{ImageRole, InputProblem, TryOnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Png,
    Jpeg,
    Webp,
}

impl MediaType {
    pub fn from_mime(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaType::Jpeg),
            "image/webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Detects the type from the leading bytes of an encoded image.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Png => Some(MediaType::Png),
            image::ImageFormat::Jpeg => Some(MediaType::Jpeg),
            image::ImageFormat::WebP => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Webp => "webp",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Encoded image bytes with an allow-listed media type.
///
/// Used for the person photo and for outfit reference photos alike.
#[derive(Clone, PartialEq, Eq)]
pub struct SubjectImage {
    bytes: Vec<u8>,
    media_type: MediaType,
}

impl SubjectImage {
    pub fn new(role: ImageRole, bytes: Vec<u8>, mime_type: &str) -> Result<Self, InputProblem> {
        let media_type =
            MediaType::from_mime(mime_type).ok_or_else(|| InputProblem::UnsupportedMediaType {
                role,
                mime_type: mime_type.trim().to_string(),
            })?;
        Self::with_media_type(role, bytes, media_type)
    }

    pub fn with_media_type(
        role: ImageRole,
        bytes: Vec<u8>,
        media_type: MediaType,
    ) -> Result<Self, InputProblem> {
        if bytes.is_empty() {
            return Err(InputProblem::EmptyImage(role));
        }
        Ok(Self { bytes, media_type })
    }

    /// Reads an image file, taking the media type from the extension and
    /// falling back to the file signature.
    pub fn from_path(role: ImageRole, path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let media_type = MediaType::from_extension(path)
            .or_else(|| MediaType::sniff(&bytes))
            .ok_or_else(|| InputProblem::UnsupportedMediaType {
                role,
                mime_type: path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            })?;
        Ok(Self::with_media_type(role, bytes, media_type)?)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn mime_type(&self) -> &'static str {
        self.media_type.mime()
    }
}

impl fmt::Debug for SubjectImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectImage")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Outfit description, trimmed and guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutfitText(String);

impl OutfitText {
    pub fn new(raw: &str) -> Result<Self, InputProblem> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InputProblem::EmptyOutfitText);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutfitMode {
    #[default]
    Text,
    Image,
}

impl OutfitMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "describe" => Some(OutfitMode::Text),
            "image" | "upload" => Some(OutfitMode::Image),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutfitMode::Text => "text",
            OutfitMode::Image => "image",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutfitSpec {
    TextDescription(OutfitText),
    ReferenceImage(SubjectImage),
}

impl OutfitSpec {
    pub fn text(raw: &str) -> Result<Self, InputProblem> {
        Ok(OutfitSpec::TextDescription(OutfitText::new(raw)?))
    }

    pub fn mode(&self) -> OutfitMode {
        match self {
            OutfitSpec::TextDescription(_) => OutfitMode::Text,
            OutfitSpec::ReferenceImage(_) => OutfitMode::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CreativityLevel(u8);

impl CreativityLevel {
    pub const MIN: u8 = 0;
    pub const MAX: u8 = 100;
    pub const DEFAULT: u8 = 25;

    pub fn new(value: i64) -> Result<Self, InputProblem> {
        if !(i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            return Err(InputProblem::CreativityOutOfRange(value));
        }
        Ok(Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for CreativityLevel {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

/// Outfit input as held while the user is still editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutfitDraft {
    Text(String),
    Image(Option<SubjectImage>),
}

impl Default for OutfitDraft {
    fn default() -> Self {
        OutfitDraft::Text(String::new())
    }
}

impl OutfitDraft {
    pub fn mode(&self) -> OutfitMode {
        match self {
            OutfitDraft::Text(_) => OutfitMode::Text,
            OutfitDraft::Image(_) => OutfitMode::Image,
        }
    }

    fn to_spec(&self) -> Result<OutfitSpec, InputProblem> {
        match self {
            OutfitDraft::Text(raw) => OutfitSpec::text(raw),
            OutfitDraft::Image(Some(image)) => Ok(OutfitSpec::ReferenceImage(image.clone())),
            OutfitDraft::Image(None) => Err(InputProblem::MissingOutfitImage),
        }
    }
}

/// Validated inputs for exactly one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnInputs {
    pub subject: SubjectImage,
    pub outfit: OutfitSpec,
    pub creativity: CreativityLevel,
}

impl TryOnInputs {
    pub fn new(subject: SubjectImage, outfit: OutfitSpec, creativity: CreativityLevel) -> Self {
        Self {
            subject,
            outfit,
            creativity,
        }
    }
}

/// Mutable session inputs. Switching outfit mode drops the other mode's data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TryOnDraft {
    subject: Option<SubjectImage>,
    outfit: OutfitDraft,
    creativity: CreativityLevel,
}

impl TryOnDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self) -> Option<&SubjectImage> {
        self.subject.as_ref()
    }

    pub fn outfit(&self) -> &OutfitDraft {
        &self.outfit
    }

    pub fn creativity(&self) -> CreativityLevel {
        self.creativity
    }

    pub fn mode(&self) -> OutfitMode {
        self.outfit.mode()
    }

    pub fn set_subject(&mut self, image: SubjectImage) {
        self.subject = Some(image);
    }

    pub fn set_mode(&mut self, mode: OutfitMode) {
        if self.outfit.mode() == mode {
            return;
        }
        self.outfit = match mode {
            OutfitMode::Text => OutfitDraft::Text(String::new()),
            OutfitMode::Image => OutfitDraft::Image(None),
        };
    }

    pub fn set_description(&mut self, text: impl Into<String>) {
        self.outfit = OutfitDraft::Text(text.into());
    }

    pub fn set_outfit_image(&mut self, image: SubjectImage) {
        self.outfit = OutfitDraft::Image(Some(image));
    }

    pub fn set_creativity(&mut self, level: CreativityLevel) {
        self.creativity = level;
    }

    pub fn validate(&self) -> Result<TryOnInputs, TryOnError> {
        let subject = self.subject.clone().ok_or(InputProblem::MissingSubject)?;
        let outfit = self.outfit.to_spec()?;
        Ok(TryOnInputs::new(subject, outfit, self.creativity))
    }

    pub fn can_generate(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn photo() -> SubjectImage {
        SubjectImage::new(ImageRole::Subject, vec![1, 2, 3], "image/jpeg").unwrap()
    }

    #[test]
    fn media_type_allow_list() {
        assert_eq!(MediaType::from_mime("image/PNG"), Some(MediaType::Png));
        assert_eq!(MediaType::from_mime("image/jpg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_mime(" image/webp "), Some(MediaType::Webp));
        assert_eq!(MediaType::from_mime("image/gif"), None);
        assert_eq!(
            MediaType::from_extension(Path::new("/tmp/a.JPEG")),
            Some(MediaType::Jpeg)
        );
        assert_eq!(MediaType::from_extension(Path::new("/tmp/a.bmp")), None);
    }

    #[test]
    fn subject_image_rejects_unsupported_and_empty() {
        let err = SubjectImage::new(ImageRole::Outfit, vec![1], "image/gif").unwrap_err();
        assert_eq!(
            err,
            InputProblem::UnsupportedMediaType {
                role: ImageRole::Outfit,
                mime_type: "image/gif".to_string(),
            }
        );
        let err = SubjectImage::new(ImageRole::Subject, Vec::new(), "image/png").unwrap_err();
        assert_eq!(err, InputProblem::EmptyImage(ImageRole::Subject));
    }

    #[test]
    fn subject_image_from_path_sniffs_unknown_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("photo.bin");
        let mut encoded = Vec::new();
        image::RgbImage::new(4, 4).write_to(
            &mut std::io::Cursor::new(&mut encoded),
            image::ImageFormat::Png,
        )?;
        std::fs::write(&path, &encoded)?;

        let loaded = SubjectImage::from_path(ImageRole::Subject, &path)?;
        assert_eq!(loaded.media_type(), MediaType::Png);
        assert_eq!(loaded.bytes(), encoded.as_slice());
        Ok(())
    }

    #[test]
    fn creativity_defaults_to_25_and_rejects_out_of_range() {
        assert_eq!(CreativityLevel::default().value(), 25);
        assert_eq!(CreativityLevel::new(0).unwrap().value(), 0);
        assert_eq!(CreativityLevel::new(100).unwrap().value(), 100);
        assert_eq!(
            CreativityLevel::new(101),
            Err(InputProblem::CreativityOutOfRange(101))
        );
        assert_eq!(
            CreativityLevel::new(-1),
            Err(InputProblem::CreativityOutOfRange(-1))
        );
    }

    #[test]
    fn outfit_text_is_trimmed() {
        let text = OutfitText::new("  black leather jacket \n").unwrap();
        assert_eq!(text.as_str(), "black leather jacket");
        assert_eq!(OutfitText::new(" \t "), Err(InputProblem::EmptyOutfitText));
    }

    #[test]
    fn validate_requires_subject() {
        let mut draft = TryOnDraft::new();
        draft.set_description("red dress");
        assert_eq!(
            draft.validate(),
            Err(TryOnError::InvalidInput(InputProblem::MissingSubject))
        );
        assert!(!draft.can_generate());
    }

    #[test]
    fn validate_rejects_whitespace_description() {
        let mut draft = TryOnDraft::new();
        draft.set_subject(photo());
        draft.set_description("   ");
        assert_eq!(
            draft.validate(),
            Err(TryOnError::InvalidInput(InputProblem::EmptyOutfitText))
        );
    }

    #[test]
    fn validate_rejects_image_mode_without_image() {
        let mut draft = TryOnDraft::new();
        draft.set_subject(photo());
        draft.set_mode(OutfitMode::Image);
        assert_eq!(
            draft.validate(),
            Err(TryOnError::InvalidInput(InputProblem::MissingOutfitImage))
        );
    }

    #[test]
    fn switching_modes_discards_the_other_input() {
        let mut draft = TryOnDraft::new();
        draft.set_subject(photo());
        draft.set_description("red dress");
        draft.set_mode(OutfitMode::Image);
        assert_eq!(draft.outfit(), &OutfitDraft::Image(None));

        draft.set_outfit_image(photo());
        draft.set_mode(OutfitMode::Text);
        assert_eq!(draft.outfit(), &OutfitDraft::Text(String::new()));

        draft.set_description("blue suit");
        draft.set_mode(OutfitMode::Text);
        assert_eq!(draft.outfit(), &OutfitDraft::Text("blue suit".to_string()));
    }

    #[test]
    fn validate_produces_inputs_for_each_mode() {
        let mut draft = TryOnDraft::new();
        draft.set_subject(photo());
        draft.set_description(" red dress ");
        let inputs = draft.validate().unwrap();
        assert_eq!(inputs.outfit, OutfitSpec::text("red dress").unwrap());
        assert_eq!(inputs.creativity.value(), 25);

        draft.set_outfit_image(photo());
        let inputs = draft.validate().unwrap();
        assert_eq!(inputs.outfit.mode(), OutfitMode::Image);
    }
}
