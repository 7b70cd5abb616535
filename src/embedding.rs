//! Block-mean embedding.
//!
//! Each 8x8 block carries one payload bit: the whole block is brightened for
//! a 1 and darkened for a 0 by the same integer offset. Bits are assigned
//! cyclically, `bit_for_block[i] = payload_bits[i mod 256]`, so images with
//! more than 256 blocks carry repeated copies and smaller images carry a
//! truncated prefix.

use image::GrayImage;

use crate::error::{Error, Result};
use crate::grid::BlockGrid;
use crate::payload::{Payload, PAYLOAD_BITS};

/// Default embedding strength (intensity levels per pixel).
pub const DEFAULT_STRENGTH: f32 = 2.0;

/// Smallest strength that moves pixels at all.
///
/// The offset is `trunc(strength)` levels, so anything lower embeds nothing.
pub const MIN_EFFECTIVE_STRENGTH: f32 = 1.0;

/// Embed `payload` into a copy of `image`.
///
/// The input is left untouched; see [`embed_in_place`] to modify a buffer
/// directly. Output dimensions equal input dimensions, and repeated calls
/// with identical inputs produce byte-identical images.
///
/// No pixel moves by more than `strength`. A strength in `(0, 1)` therefore
/// returns an unchanged copy; [`crate::WatermarkEngine`] rejects such values
/// (see [`MIN_EFFECTIVE_STRENGTH`]).
///
/// # Errors
///
/// Returns [`Error::InvalidStrength`] if `strength` is not finite or `<= 0`,
/// and [`Error::EmptyImage`] if the image has a zero dimension.
pub fn embed(image: &GrayImage, payload: &Payload, strength: f32) -> Result<GrayImage> {
    let mut marked = image.clone();
    embed_in_place(&mut marked, payload, strength)?;
    Ok(marked)
}

/// Embed `payload` by modifying `image` in place.
///
/// Every pixel of a block moves by `±trunc(strength)` levels and is clamped
/// to `[0, 255]`, so no pixel changes by more than `strength`.
///
/// # Errors
///
/// Same as [`embed`]. The image is unchanged when an error is returned.
pub fn embed_in_place(image: &mut GrayImage, payload: &Payload, strength: f32) -> Result<()> {
    let step = pixel_step(strength)?;
    let grid = BlockGrid::for_image(image)?;
    let bits = payload.to_bits();

    for (x, y, px) in image.enumerate_pixels_mut() {
        let bit = bits[grid.index_of(x, y) % PAYLOAD_BITS];
        let delta = if bit == 1 { step } else { -step };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = (i16::from(px[0]) + delta).clamp(0, 255) as u8;
        px[0] = value;
    }

    Ok(())
}

/// Number of payload bits an image of this size can carry (at most 256).
#[must_use]
pub fn capacity_bits(width: u32, height: u32) -> usize {
    BlockGrid::new(width, height).map_or(0, |grid| grid.len().min(PAYLOAD_BITS))
}

/// Number of complete payload copies an image of this size carries.
#[must_use]
pub fn repetitions(width: u32, height: u32) -> usize {
    BlockGrid::new(width, height).map_or(0, |grid| grid.len() / PAYLOAD_BITS)
}

/// Integer pixel offset for a strength value.
fn pixel_step(strength: f32) -> Result<i16> {
    if !strength.is_finite() || strength <= 0.0 {
        return Err(Error::InvalidStrength(strength));
    }
    #[allow(clippy::cast_possible_truncation)]
    let step = strength.trunc().min(255.0) as i16;
    Ok(step)
}
