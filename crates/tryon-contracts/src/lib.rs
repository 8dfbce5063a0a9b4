pub mod errors;
pub mod events;
pub mod inputs;
pub mod receipts;
pub mod results;
pub mod session;

pub use errors::{FailureReason, ImageRole, InputProblem, TryOnError, GENERATION_FAILED_PREFIX};
pub use inputs::{
    CreativityLevel, MediaType, OutfitDraft, OutfitMode, OutfitSpec, OutfitText, SubjectImage,
    TryOnDraft, TryOnInputs,
};
pub use results::{GeneratedImage, GenerationResult};
