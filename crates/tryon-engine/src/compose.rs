use sha2::{Digest, Sha256};
use tryon_contracts::{
    CreativityLevel, FailureReason, GeneratedImage, GenerationResult, OutfitMode, OutfitSpec,
    TryOnInputs,
};

use crate::capability::{CapabilityRequest, Part, ResponseModality};

pub const IMAGE_ONLY_DIRECTIVE: &str = "CRITICAL: Your output MUST be only the final image. Do NOT output any text, confirmation, or explanation. Your only response should be the image itself.";

pub const PHOTOREALISM_DIRECTIVE: &str = "Your primary goal is to create an ultra-realistic, photorealistic image. It must look like a real photograph, not a render, illustration, or drawing.";

pub const OUTFIT_FIDELITY_INSTRUCTION: &str = "Faithfully transfer all details, textures, and colors from the outfit in the second image. If the outfit has any text, logos, or patterns, they must be preserved exactly as they are. Do not add any new text or logos.";

pub const NEGATIVE_PROMPT: &str = "Negative prompt: avoid cartoon, anime, illustration, 3d render, painting, drawing, sketches, unrealistic styles, text, letters, numbers, symbols, watermarks.";

/// Printed text on a reference outfit must survive, so text is not excluded here.
pub const IMAGE_NEGATIVE_PROMPT: &str = "Negative prompt: avoid cartoon, anime, illustration, 3d render, painting, drawing, sketches, unrealistic styles, watermarks.";

const OUTFIT_SLOT: &str = "{outfit}";

pub const DEFAULT_ECHO_PHRASES: &[&str] = &["i will generate", "ultra-realistic"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTier {
    Strict,
    Balanced,
    Reinterpret,
    Editorial,
}

struct TierBand {
    upper: u8,
    tier: PromptTier,
    template: &'static str,
}

/// Closed creativity bands, ascending by inclusive upper edge.
static TIER_BANDS: [TierBand; 4] = [
    TierBand {
        upper: 20,
        tier: PromptTier::Strict,
        template: "Critically important: Do NOT change the person's face, features, body pose, or the background from the first image. Your ONLY task is to photorealistically redraw that person wearing {outfit}. Preserve everything else from the original person's image.",
    },
    TierBand {
        upper: 50,
        tier: PromptTier::Balanced,
        template: "Preserve the person's face, features, and general body pose from the first image. Photorealistically redraw them in {outfit}. You may make subtle adjustments to the background and lighting to better match the new clothing style.",
    },
    TierBand {
        upper: 80,
        tier: PromptTier::Reinterpret,
        template: "Photorealistically redraw the person from the first image in {outfit}, keeping their facial identity. Feel free to adjust the body pose slightly for a more natural look and reinterpret the background to create a more cohesive and artistic scene that complements the outfit.",
    },
    TierBand {
        upper: 100,
        tier: PromptTier::Editorial,
        template: "Create a new artistic, photorealistic image inspired by the first image, featuring the same person but in {outfit}. Be highly creative with the pose, background, lighting, and overall style to produce a compelling fashion shot.",
    },
];

impl PromptTier {
    pub fn for_level(level: CreativityLevel) -> Self {
        Self::band_for(level).tier
    }

    fn band_for(level: CreativityLevel) -> &'static TierBand {
        TIER_BANDS
            .iter()
            .find(|band| level.value() <= band.upper)
            .unwrap_or(&TIER_BANDS[TIER_BANDS.len() - 1])
    }

    fn band(self) -> &'static TierBand {
        TIER_BANDS
            .iter()
            .find(|band| band.tier == self)
            .unwrap_or(&TIER_BANDS[0])
    }

    pub fn name(self) -> &'static str {
        match self {
            PromptTier::Strict => "strict",
            PromptTier::Balanced => "balanced",
            PromptTier::Reinterpret => "reinterpret",
            PromptTier::Editorial => "editorial",
        }
    }

    pub fn template(self) -> &'static str {
        self.band().template
    }

    /// Base instruction with the outfit reference substituted in.
    pub fn instruction(self, outfit: &OutfitSpec) -> String {
        self.template()
            .replace(OUTFIT_SLOT, &outfit_reference(outfit))
    }
}

fn outfit_reference(outfit: &OutfitSpec) -> String {
    match outfit {
        OutfitSpec::ReferenceImage(_) => "the outfit from the second image".to_string(),
        OutfitSpec::TextDescription(text) => format!("this specific outfit: \"{}\"", text.as_str()),
    }
}

/// Full text part sent after the image parts.
pub fn compose_instruction(tier: PromptTier, outfit: &OutfitSpec) -> String {
    let base = tier.instruction(outfit);
    match outfit {
        OutfitSpec::ReferenceImage(_) => [
            IMAGE_ONLY_DIRECTIVE,
            PHOTOREALISM_DIRECTIVE,
            base.as_str(),
            OUTFIT_FIDELITY_INSTRUCTION,
            IMAGE_NEGATIVE_PROMPT,
        ]
        .join(" "),
        OutfitSpec::TextDescription(_) => [
            IMAGE_ONLY_DIRECTIVE,
            PHOTOREALISM_DIRECTIVE,
            base.as_str(),
            NEGATIVE_PROMPT,
        ]
        .join(" "),
    }
}

/// Ordered request for one attempt. Only [`RequestComposer::compose`] builds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    request: CapabilityRequest,
    tier: PromptTier,
    outfit_mode: OutfitMode,
    instruction: String,
}

impl GenerationRequest {
    pub fn parts(&self) -> &[Part] {
        &self.request.parts
    }

    pub fn capability_request(&self) -> &CapabilityRequest {
        &self.request
    }

    pub fn tier(&self) -> PromptTier {
        self.tier
    }

    pub fn outfit_mode(&self) -> OutfitMode {
        self.outfit_mode
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// SHA-256 over every part, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in &self.request.parts {
            match part {
                Part::InlineImage { bytes, mime_type } => {
                    hasher.update(b"image:");
                    hasher.update(mime_type.as_bytes());
                    hasher.update((bytes.len() as u64).to_be_bytes());
                    hasher.update(bytes);
                }
                Part::Text(text) => {
                    hasher.update(b"text:");
                    hasher.update((text.len() as u64).to_be_bytes());
                    hasher.update(text.as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Decides whether a text-only reply is the model narrating its instructions.
pub trait EchoDetector: Send + Sync {
    fn is_echo(&self, text: &str) -> bool;
}

impl<F> EchoDetector for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_echo(&self, text: &str) -> bool {
        self(text)
    }
}

/// Case-insensitive substring match. Best effort only.
#[derive(Debug, Clone)]
pub struct PhraseEchoDetector {
    phrases: Vec<String>,
}

impl PhraseEchoDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|phrase| phrase.as_ref().trim().to_lowercase())
                .filter(|phrase| !phrase.is_empty())
                .collect(),
        }
    }
}

impl Default for PhraseEchoDetector {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_PHRASES)
    }
}

impl EchoDetector for PhraseEchoDetector {
    fn is_echo(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }
}

pub struct RequestComposer {
    echo_detector: Box<dyn EchoDetector>,
}

impl Default for RequestComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestComposer {
    pub fn new() -> Self {
        Self {
            echo_detector: Box::new(PhraseEchoDetector::default()),
        }
    }

    pub fn with_echo_detector<D: EchoDetector + 'static>(detector: D) -> Self {
        Self {
            echo_detector: Box::new(detector),
        }
    }

    /// Subject image first, optional outfit image second, instruction text last.
    pub fn compose(&self, inputs: &TryOnInputs) -> GenerationRequest {
        let tier = PromptTier::for_level(inputs.creativity);
        let mut parts = vec![Part::image(
            inputs.subject.bytes().to_vec(),
            inputs.subject.mime_type(),
        )];
        if let OutfitSpec::ReferenceImage(outfit) = &inputs.outfit {
            parts.push(Part::image(outfit.bytes().to_vec(), outfit.mime_type()));
        }
        let instruction = compose_instruction(tier, &inputs.outfit);
        parts.push(Part::text(instruction.clone()));

        GenerationRequest {
            request: CapabilityRequest {
                parts,
                response_modalities: vec![ResponseModality::Image, ResponseModality::Text],
            },
            tier,
            outfit_mode: inputs.outfit.mode(),
            instruction,
        }
    }

    /// First match wins: inline image, echoed instructions, other text, nothing.
    pub fn classify(&self, response: Vec<Part>) -> GenerationResult {
        let mut texts = Vec::new();
        for part in response {
            match part {
                Part::InlineImage { bytes, mime_type } if !bytes.is_empty() => {
                    return GenerationResult::Image(GeneratedImage::new(bytes, mime_type));
                }
                Part::InlineImage { .. } => {}
                Part::Text(text) => texts.push(text),
            }
        }

        let text = texts.concat();
        let text = text.trim();
        if text.is_empty() {
            return GenerationResult::Failure(FailureReason::EmptyResponse);
        }
        if self.echo_detector.is_echo(text) {
            return GenerationResult::Failure(FailureReason::ModelEchoedInstructions);
        }
        GenerationResult::Failure(FailureReason::ModelReturnedTextInstead(text.to_string()))
    }
}
