pub mod attempt;
pub mod capability;
pub mod compose;
pub mod dryrun;
pub mod gemini;
pub mod normalize;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tryon_contracts::events::{payload, EventLog};
use tryon_contracts::receipts::{TryOnReceipt, RECEIPT_SCHEMA_VERSION};
use tryon_contracts::{
    CreativityLevel, FailureReason, GeneratedImage, InputProblem, OutfitMode, OutfitSpec,
    SubjectImage, TryOnDraft, TryOnError, TryOnInputs,
};
use uuid::Uuid;

pub use attempt::{AttemptState, AttemptTracker};
pub use capability::{CapabilityRegistry, CapabilityRequest, GenerationCapability, Part};
pub use compose::{EchoDetector, GenerationRequest, PhraseEchoDetector, PromptTier, RequestComposer};
pub use dryrun::DryrunCapability;
pub use gemini::{GeminiCapability, GeminiConfig};
pub use normalize::{letterbox_outfit, normalize, Letterbox, NormalizedImage};

/// Capabilities available by name. Gemini is only present when configured.
pub fn default_capability_registry(gemini: Option<GeminiConfig>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(DryrunCapability);
    if let Some(config) = gemini {
        registry.register(GeminiCapability::new(config));
    }
    registry
}

/// Everything known about one finished attempt.
#[derive(Debug)]
pub struct AttemptReport {
    pub attempt_id: String,
    pub capability: String,
    pub model: Option<String>,
    pub creativity: CreativityLevel,
    pub history: Vec<AttemptState>,
    pub request: Option<GenerationRequest>,
    pub elapsed: Duration,
    pub outcome: Result<GeneratedImage, TryOnError>,
}

impl AttemptReport {
    pub fn final_state(&self) -> AttemptState {
        self.history.last().copied().unwrap_or(AttemptState::Idle)
    }

    pub fn receipt(&self, image_path: &Path) -> Option<TryOnReceipt> {
        let request = self.request.as_ref()?;
        let image = self.outcome.as_ref().ok()?;
        Some(TryOnReceipt {
            schema_version: RECEIPT_SCHEMA_VERSION,
            attempt_id: self.attempt_id.clone(),
            capability: self.capability.clone(),
            model: self.model.clone(),
            tier: request.tier().name().to_string(),
            creativity: self.creativity.value(),
            outfit_mode: request.outfit_mode().as_str().to_string(),
            instruction: request.instruction().to_string(),
            image_path: image_path.to_string_lossy().to_string(),
            mime_type: image.mime_type.clone(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            capability_request: request.capability_request().summary(),
        })
    }
}

/// Runs attempts: validate, normalize the outfit photo, compose, call once, classify.
pub struct TryOnEngine {
    capability: Arc<dyn GenerationCapability>,
    composer: RequestComposer,
    events: Option<EventLog>,
    normalize_outfit: bool,
}

impl TryOnEngine {
    pub fn new(capability: Arc<dyn GenerationCapability>) -> Self {
        Self {
            capability,
            composer: RequestComposer::new(),
            events: None,
            normalize_outfit: true,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_composer(mut self, composer: RequestComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_outfit_normalization(mut self, enabled: bool) -> Self {
        self.normalize_outfit = enabled;
        self
    }

    pub fn capability_name(&self) -> &str {
        self.capability.name()
    }

    pub fn events(&self) -> Option<&EventLog> {
        self.events.as_ref()
    }

    /// The request an attempt would send, without normalization or any call.
    pub fn preview(&self, inputs: &TryOnInputs) -> GenerationRequest {
        self.composer.compose(inputs)
    }

    pub fn run(&self, draft: &TryOnDraft) -> AttemptReport {
        let attempt_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut tracker = AttemptTracker::new(
            self.events
                .as_ref()
                .map(|log| log.for_attempt(attempt_id.clone())),
        );
        let mut request = None;

        advance(&mut tracker, AttemptState::Validating);
        let outcome = match draft.validate() {
            Err(err) => {
                advance(&mut tracker, AttemptState::InvalidInput);
                Err(err)
            }
            Ok(inputs) => {
                advance(&mut tracker, AttemptState::Requesting);
                let outcome = self.request(inputs, &tracker, &mut request);
                let next = if outcome.is_ok() {
                    AttemptState::Succeeded
                } else {
                    AttemptState::Failed
                };
                advance(&mut tracker, next);
                outcome
            }
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(image) => tracker.emit(
                "generation_succeeded",
                payload(json!({
                    "mime_type": image.mime_type,
                    "size_bytes": image.bytes.len(),
                    "elapsed_ms": elapsed.as_millis() as u64,
                })),
            ),
            Err(err) => tracker.emit(
                "generation_failed",
                payload(json!({
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "before_request": err.is_pre_request(),
                    "elapsed_ms": elapsed.as_millis() as u64,
                })),
            ),
        }

        AttemptReport {
            attempt_id,
            capability: self.capability.name().to_string(),
            model: self.capability.model().map(str::to_string),
            creativity: draft.creativity(),
            history: tracker.history().to_vec(),
            request,
            elapsed,
            outcome,
        }
    }

    fn request(
        &self,
        inputs: TryOnInputs,
        tracker: &AttemptTracker,
        slot: &mut Option<GenerationRequest>,
    ) -> Result<GeneratedImage, TryOnError> {
        let inputs = self.prepare_outfit(inputs, tracker)?;
        let request = self.composer.compose(&inputs);
        tracker.emit(
            "request_composed",
            payload(json!({
                "capability": self.capability.name(),
                "model": self.capability.model(),
                "tier": request.tier().name(),
                "creativity": inputs.creativity.value(),
                "outfit_mode": request.outfit_mode().as_str(),
                "parts": request.parts().len(),
                "prompt_chars": request.instruction().chars().count(),
                "fingerprint": request.fingerprint(),
            })),
        );

        let response = self.capability.generate(request.capability_request());
        *slot = Some(request);
        let parts = response.map_err(|err| {
            TryOnError::Generation(FailureReason::Capability(error_chain_text(&err, 1024)))
        })?;
        self.composer.classify(parts).into_result()
    }

    fn prepare_outfit(
        &self,
        inputs: TryOnInputs,
        tracker: &AttemptTracker,
    ) -> Result<TryOnInputs, TryOnError> {
        let TryOnInputs {
            subject,
            outfit,
            creativity,
        } = inputs;
        let outfit = match outfit {
            OutfitSpec::ReferenceImage(image) if self.normalize_outfit => {
                let normalized = letterbox_outfit(&subject, &image)?;
                tracker.emit(
                    "outfit_normalized",
                    payload(json!({
                        "width": normalized.width,
                        "height": normalized.height,
                        "scale": normalized.letterbox.scale,
                        "drawn_width": normalized.letterbox.drawn_width,
                        "drawn_height": normalized.letterbox.drawn_height,
                    })),
                );
                OutfitSpec::ReferenceImage(normalized.image)
            }
            other => other,
        };
        Ok(TryOnInputs::new(subject, outfit, creativity))
    }
}

fn advance(tracker: &mut AttemptTracker, next: AttemptState) {
    if let Err(err) = tracker.advance(next) {
        debug_assert!(false, "{err}");
    }
}

/// Holds the editable inputs and the latest result. One attempt at a time.
pub struct Session {
    engine: TryOnEngine,
    draft: TryOnDraft,
    last_result: Option<GeneratedImage>,
    last_report: Option<AttemptReport>,
}

impl Session {
    pub fn new(engine: TryOnEngine) -> Self {
        Self {
            engine,
            draft: TryOnDraft::new(),
            last_result: None,
            last_report: None,
        }
    }

    pub fn engine(&self) -> &TryOnEngine {
        &self.engine
    }

    pub fn draft(&self) -> &TryOnDraft {
        &self.draft
    }

    pub fn last_result(&self) -> Option<&GeneratedImage> {
        self.last_result.as_ref()
    }

    pub fn last_report(&self) -> Option<&AttemptReport> {
        self.last_report.as_ref()
    }

    pub fn set_subject(&mut self, image: SubjectImage) {
        self.draft.set_subject(image);
        self.last_result = None;
    }

    pub fn set_outfit_image(&mut self, image: SubjectImage) {
        self.draft.set_outfit_image(image);
        self.last_result = None;
    }

    pub fn set_description(&mut self, text: impl Into<String>) {
        self.draft.set_description(text);
    }

    pub fn set_mode(&mut self, mode: OutfitMode) {
        self.draft.set_mode(mode);
    }

    pub fn set_creativity(&mut self, level: CreativityLevel) {
        self.draft.set_creativity(level);
    }

    pub fn generate(&mut self) -> Result<&GeneratedImage, TryOnError> {
        self.last_result = None;
        let report = self.engine.run(&self.draft);
        let outcome = report.outcome.clone();
        self.last_report = Some(report);
        Ok(self.last_result.insert(outcome?))
    }

    /// Uses the latest result as the next subject photo.
    pub fn continue_styling(&mut self) -> Result<(), TryOnError> {
        let result = self
            .last_result
            .clone()
            .ok_or(InputProblem::NoResultYet)?;
        self.draft.set_subject(result.into_subject()?);
        self.last_result = None;
        Ok(())
    }

    /// Writes the latest result, adding an extension from its MIME type when missing.
    pub fn save_result(&self, path: &Path) -> Result<PathBuf> {
        let result = self
            .last_result
            .as_ref()
            .ok_or(InputProblem::NoResultYet)?;
        let path = if path.extension().is_some() {
            path.to_path_buf()
        } else {
            path.with_extension(result.file_extension())
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, &result.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use image::{ImageFormat, Rgb, RgbImage};
    use serde_json::Value;
    use tryon_contracts::events::EventLog;
    use tryon_contracts::{
        CreativityLevel, FailureReason, ImageRole, InputProblem, MediaType, OutfitMode,
        SubjectImage, TryOnError,
    };

    use super::{
        AttemptState, CapabilityRequest, DryrunCapability, GeminiCapability, GeminiConfig,
        GenerationCapability, Part, PromptTier, Session, TryOnEngine,
    };

    /// Records every request and answers with a fixed response.
    struct Scripted {
        response: Mutex<Option<Result<Vec<Part>>>>,
        calls: Mutex<Vec<CapabilityRequest>>,
    }

    impl Scripted {
        fn answering(response: Result<Vec<Part>>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response)),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<CapabilityRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GenerationCapability for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate(&self, request: &CapabilityRequest) -> Result<Vec<Part>> {
            self.calls.lock().unwrap().push(request.clone());
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(anyhow!("scripted response already used")))
        }
    }

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let mut out = Vec::new();
        RgbImage::from_pixel(width, height, Rgb([90, 120, 150]))
            .write_to(&mut Cursor::new(&mut out), format)
            .unwrap();
        out
    }

    fn subject_jpeg() -> SubjectImage {
        SubjectImage::with_media_type(
            ImageRole::Subject,
            encoded(800, 600, ImageFormat::Jpeg),
            MediaType::Jpeg,
        )
        .unwrap()
    }

    fn png_part() -> Part {
        Part::image(encoded(8, 8, ImageFormat::Png), "image/png")
    }

    #[test]
    fn missing_inputs_never_reach_the_capability() {
        let capability = Scripted::answering(Ok(vec![png_part()]));
        let engine = TryOnEngine::new(capability.clone());
        let mut session = Session::new(engine);

        let err = session.generate().unwrap_err();
        assert_eq!(err, TryOnError::InvalidInput(InputProblem::MissingSubject));

        session.set_subject(subject_jpeg());
        session.set_description("   ");
        let err = session.generate().unwrap_err();
        assert_eq!(err, TryOnError::InvalidInput(InputProblem::EmptyOutfitText));

        session.set_mode(OutfitMode::Image);
        let err = session.generate().unwrap_err();
        assert_eq!(err, TryOnError::InvalidInput(InputProblem::MissingOutfitImage));

        assert!(capability.calls().is_empty());
        let report = session.last_report().unwrap();
        assert_eq!(
            report.history,
            vec![
                AttemptState::Idle,
                AttemptState::Validating,
                AttemptState::InvalidInput,
            ]
        );
        assert!(report.request.is_none());
    }

    #[test]
    fn text_outfit_at_default_creativity_uses_balanced_tier() -> Result<()> {
        let capability = Scripted::answering(Ok(vec![png_part()]));
        let mut session = Session::new(TryOnEngine::new(capability.clone()));
        session.set_subject(subject_jpeg());
        session.set_description("black leather jacket");
        session.set_creativity(CreativityLevel::new(25)?);

        let image = session.generate()?.clone();
        assert_eq!(image.mime_type, "image/png");

        let calls = capability.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].parts.len(), 2);
        let Part::InlineImage { mime_type, .. } = &calls[0].parts[0] else {
            panic!("subject photo must come first");
        };
        assert_eq!(mime_type, "image/jpeg");
        let Part::Text(instruction) = &calls[0].parts[1] else {
            panic!("instruction must follow the photo");
        };
        assert!(instruction.contains("this specific outfit: \"black leather jacket\""));

        let report = session.last_report().unwrap();
        assert_eq!(report.final_state(), AttemptState::Succeeded);
        assert_eq!(
            report.request.as_ref().map(|request| request.tier()),
            Some(PromptTier::Balanced)
        );
        Ok(())
    }

    #[test]
    fn text_only_response_fails_with_the_model_text() -> Result<()> {
        let capability = Scripted::answering(Ok(vec![Part::text("I cannot help with that.")]));
        let mut session = Session::new(TryOnEngine::new(capability));
        session.set_subject(subject_jpeg());
        session.set_description("red dress");

        let err = session.generate().unwrap_err();
        assert_eq!(
            err,
            TryOnError::Generation(FailureReason::ModelReturnedTextInstead(
                "I cannot help with that.".to_string()
            ))
        );
        assert!(session.last_result().is_none());
        assert_eq!(
            session.last_report().map(|report| report.final_state()),
            Some(AttemptState::Failed)
        );
        Ok(())
    }

    #[test]
    fn echoed_instructions_are_detected() {
        let capability = Scripted::answering(Ok(vec![Part::text(
            "Okay, I will generate an Ultra-Realistic photo of you.",
        )]));
        let mut session = Session::new(TryOnEngine::new(capability));
        session.set_subject(subject_jpeg());
        session.set_description("red dress");

        let err = session.generate().unwrap_err();
        assert_eq!(
            err,
            TryOnError::Generation(FailureReason::ModelEchoedInstructions)
        );
    }

    #[test]
    fn capability_errors_keep_their_cause() {
        let capability = Scripted::answering(Err(
            anyhow!("connection reset").context("Gemini request failed")
        ));
        let mut session = Session::new(TryOnEngine::new(capability.clone()));
        session.set_subject(subject_jpeg());
        session.set_description("red dress");

        let err = session.generate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Generation failed. Gemini request failed | caused by: connection reset"
        );
        assert_eq!(capability.calls().len(), 1);
    }

    #[test]
    fn outfit_photo_is_letterboxed_to_subject_size() -> Result<()> {
        let capability = Scripted::answering(Ok(vec![png_part()]));
        let mut session = Session::new(TryOnEngine::new(capability.clone()));
        session.set_subject(subject_jpeg());
        session.set_mode(OutfitMode::Image);
        session.set_outfit_image(SubjectImage::new(
            ImageRole::Outfit,
            encoded(300, 600, ImageFormat::Png),
            "image/png",
        )?);

        session.generate()?;
        let calls = capability.calls();
        assert_eq!(calls[0].parts.len(), 3);
        let Part::InlineImage { bytes, mime_type } = &calls[0].parts[1] else {
            panic!("outfit photo must be the second part");
        };
        assert_eq!(mime_type, "image/png");
        let outfit = image::load_from_memory(bytes)?;
        assert_eq!((outfit.width(), outfit.height()), (800, 600));
        Ok(())
    }

    #[test]
    fn outfit_photo_is_sent_as_is_when_normalization_is_off() -> Result<()> {
        let capability = Scripted::answering(Ok(vec![png_part()]));
        let engine = TryOnEngine::new(capability.clone()).with_outfit_normalization(false);
        let mut session = Session::new(engine);
        let outfit_bytes = encoded(300, 600, ImageFormat::Png);
        session.set_subject(subject_jpeg());
        session.set_mode(OutfitMode::Image);
        session.set_outfit_image(SubjectImage::new(
            ImageRole::Outfit,
            outfit_bytes.clone(),
            "image/png",
        )?);

        session.generate()?;
        let calls = capability.calls();
        let Part::InlineImage { bytes, .. } = &calls[0].parts[1] else {
            panic!("outfit photo must be the second part");
        };
        assert_eq!(bytes, &outfit_bytes);
        Ok(())
    }

    #[test]
    fn undecodable_outfit_fails_before_the_call() -> Result<()> {
        let capability = Scripted::answering(Ok(vec![png_part()]));
        let mut session = Session::new(TryOnEngine::new(capability.clone()));
        session.set_subject(subject_jpeg());
        session.set_mode(OutfitMode::Image);
        session.set_outfit_image(SubjectImage::new(
            ImageRole::Outfit,
            vec![0x89, 0x50, 0x4e, 0x47, 0x00],
            "image/png",
        )?);

        let err = session.generate().unwrap_err();
        assert_eq!(err.kind(), "decode_error");
        assert!(capability.calls().is_empty());
        assert_eq!(
            session.last_report().map(|report| report.final_state()),
            Some(AttemptState::Failed)
        );
        Ok(())
    }

    #[test]
    fn continue_styling_reuses_the_result_as_subject() -> Result<()> {
        let mut session = Session::new(TryOnEngine::new(Arc::new(DryrunCapability)));
        assert_eq!(
            session.continue_styling(),
            Err(TryOnError::InvalidInput(InputProblem::NoResultYet))
        );

        session.set_subject(subject_jpeg());
        session.set_description("denim overalls");
        let result = session.generate()?.clone();
        session.continue_styling()?;

        let subject = session.draft().subject().unwrap();
        assert_eq!(subject.bytes(), result.bytes.as_slice());
        assert_eq!(subject.media_type(), MediaType::Png);
        assert!(session.last_result().is_none());
        Ok(())
    }

    #[test]
    fn save_result_adds_extension_and_receipt_describes_attempt() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut session = Session::new(TryOnEngine::new(Arc::new(DryrunCapability)));
        assert!(session.save_result(&temp.path().join("none")).is_err());

        session.set_subject(subject_jpeg());
        session.set_description("wool coat");
        session.set_creativity(CreativityLevel::new(90)?);
        session.generate()?;

        let saved = session.save_result(&temp.path().join("out/look"))?;
        assert_eq!(saved, temp.path().join("out/look.png"));
        assert!(saved.exists());

        let receipt = session
            .last_report()
            .and_then(|report| report.receipt(&saved))
            .unwrap();
        assert_eq!(receipt.capability, "dryrun");
        assert_eq!(receipt.model.as_deref(), Some("dryrun-tryon-1"));
        assert_eq!(receipt.tier, "editorial");
        assert_eq!(receipt.creativity, 90);
        assert_eq!(receipt.outfit_mode, "text");
        let summary = serde_json::to_string(&receipt.capability_request)?;
        assert!(summary.contains("size_bytes"));
        assert!(!summary.contains("\"data\""));
        Ok(())
    }

    #[test]
    fn attempts_are_written_to_the_event_log() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let engine = TryOnEngine::new(Arc::new(DryrunCapability))
            .with_events(EventLog::new(&path, "session-1"));
        let mut session = Session::new(engine);
        session.set_subject(subject_jpeg());
        session.set_description("linen suit");
        session.generate()?;

        let rows: Vec<Value> = std::fs::read_to_string(&path)?
            .lines()
            .map(|line| serde_json::from_str::<Value>(line))
            .collect::<Result<_, _>>()?;
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "attempt_state",
                "attempt_state",
                "request_composed",
                "attempt_state",
                "generation_succeeded",
            ]
        );
        let attempt_id = session.last_report().unwrap().attempt_id.clone();
        assert!(rows.iter().all(|row| row["attempt_id"] == attempt_id.as_str()));
        assert_eq!(rows[2]["tier"], "balanced");
        assert_eq!(rows[2]["parts"], 2);
        Ok(())
    }

    #[test]
    fn transport_failures_keep_the_api_key_out_of_messages_and_events() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let config = GeminiConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("SECRET-KEY-123".to_string()),
            "GEMINI_API_BASE" => Some("http://127.0.0.1:9".to_string()),
            _ => None,
        })?;
        let engine = TryOnEngine::new(Arc::new(GeminiCapability::new(config)))
            .with_events(EventLog::new(&path, "session-1"));
        let mut session = Session::new(engine);
        session.set_subject(subject_jpeg());
        session.set_description("linen suit");

        let err = session.generate().unwrap_err();
        assert_eq!(err.kind(), "capability_error");
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{err}");
        let log = std::fs::read_to_string(&path)?;
        assert!(!log.contains("SECRET-KEY-123"));
        assert!(log.contains("\"before_request\":false"));
        Ok(())
    }
}
