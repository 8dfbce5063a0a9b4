use std::io::Cursor;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use tryon_contracts::ImageRole;

use crate::capability::{CapabilityRequest, GenerationCapability, Part};
use crate::normalize::decode_dimensions;

/// Offline capability: answers with a flat PNG sized like the subject photo.
pub struct DryrunCapability;

impl GenerationCapability for DryrunCapability {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> Option<&str> {
        Some("dryrun-tryon-1")
    }

    fn generate(&self, request: &CapabilityRequest) -> Result<Vec<Part>> {
        let (width, height) = request
            .parts
            .iter()
            .find_map(|part| match part {
                Part::InlineImage { bytes, .. } => Some(bytes.as_slice()),
                Part::Text(_) => None,
            })
            .map(|bytes| decode_dimensions(bytes, ImageRole::Subject))
            .transpose()?
            .unwrap_or((512, 512));
        let instruction: String = request
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineImage { .. } => None,
            })
            .collect();

        let (r, g, b) = color_from_instruction(&instruction);
        let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun image encode failed")?;
        Ok(vec![Part::image(bytes, "image/png")])
    }
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(instruction.as_bytes());
    (digest[0], digest[1], digest[2])
}
