//! Letterboxes an outfit photo into the subject photo's frame.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use tryon_contracts::{ImageRole, MediaType, SubjectImage, TryOnError};

/// Largest canvas side we are willing to allocate.
pub const MAX_CANVAS_SIDE: u32 = 16_384;

const CANVAS_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub drawn_width: u32,
    pub drawn_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    /// Uniform fit of `candidate` inside `target`, centered. A zero-sized side
    /// yields a 1px draw with no offset.
    pub fn fit(target: (u32, u32), candidate: (u32, u32)) -> Self {
        let (target_w, target_h) = target;
        let (candidate_w, candidate_h) = (candidate.0.max(1), candidate.1.max(1));
        let scale = (f64::from(target_w) / f64::from(candidate_w))
            .min(f64::from(target_h) / f64::from(candidate_h));
        let drawn = |side: u32, limit: u32| -> u32 {
            ((f64::from(side) * scale).round() as u32).clamp(1, limit.max(1))
        };
        let drawn_width = drawn(candidate_w, target_w);
        let drawn_height = drawn(candidate_h, target_h);
        Self {
            scale,
            drawn_width,
            drawn_height,
            offset_x: target_w.saturating_sub(drawn_width) / 2,
            offset_y: target_h.saturating_sub(drawn_height) / 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: SubjectImage,
    pub width: u32,
    pub height: u32,
    pub letterbox: Letterbox,
}

pub fn decode_dimensions(bytes: &[u8], role: ImageRole) -> Result<(u32, u32), TryOnError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| TryOnError::decode(role, err))?
        .into_dimensions()
        .map_err(|err| TryOnError::decode(role, err))
}

fn decode_image(bytes: &[u8], role: ImageRole) -> Result<DynamicImage, TryOnError> {
    let image = image::load_from_memory(bytes).map_err(|err| TryOnError::decode(role, err))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(TryOnError::decode(role, "image has no pixels"));
    }
    Ok(image)
}

fn acquire_canvas(width: u32, height: u32) -> Result<RgbaImage, TryOnError> {
    if width == 0 || height == 0 || width > MAX_CANVAS_SIDE || height > MAX_CANVAS_SIDE {
        return Err(TryOnError::configuration(format!(
            "Could not prepare a {width}x{height} drawing surface for the outfit image."
        )));
    }
    Ok(RgbaImage::from_pixel(width, height, CANVAS_BACKGROUND))
}

/// Draws the candidate onto a white canvas of the target size and encodes it as PNG.
pub fn normalize(
    target_width: u32,
    target_height: u32,
    candidate: &[u8],
) -> Result<NormalizedImage, TryOnError> {
    let mut canvas = acquire_canvas(target_width, target_height)?;
    let candidate = decode_image(candidate, ImageRole::Outfit)?.to_rgba8();
    let letterbox = Letterbox::fit(
        (target_width, target_height),
        (candidate.width(), candidate.height()),
    );

    let drawn = if (letterbox.drawn_width, letterbox.drawn_height)
        == (candidate.width(), candidate.height())
    {
        candidate
    } else {
        imageops::resize(
            &candidate,
            letterbox.drawn_width,
            letterbox.drawn_height,
            FilterType::Triangle,
        )
    };
    imageops::overlay(
        &mut canvas,
        &drawn,
        i64::from(letterbox.offset_x),
        i64::from(letterbox.offset_y),
    );

    let mut encoded = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .map_err(|err| {
            TryOnError::configuration(format!("Could not encode the normalized outfit image: {err}"))
        })?;
    let image = SubjectImage::with_media_type(ImageRole::Outfit, encoded, MediaType::Png)?;

    Ok(NormalizedImage {
        image,
        width: target_width,
        height: target_height,
        letterbox,
    })
}

/// Frames `outfit` to match `subject`'s pixel dimensions.
pub fn letterbox_outfit(
    subject: &SubjectImage,
    outfit: &SubjectImage,
) -> Result<NormalizedImage, TryOnError> {
    let (width, height) = decode_dimensions(subject.bytes(), ImageRole::Subject)?;
    normalize(width, height, outfit.bytes())
}
