//! Block-mean detection with local adaptive thresholds.
//!
//! Each block is compared with the average mean of its up, down, left and
//! right neighbours; a block brighter than its neighbourhood reads as 1.
//! Local thresholds tolerate slow brightness changes across the frame that
//! a single global threshold would not.
//!
//! When the image holds more than 256 blocks, the per-position readings are
//! folded by majority vote (ties read as 0). Confidence then depends on the
//! amount of redundancy:
//! - **two or more full copies**: share of full 256-block copies that agree
//!   bit-for-bit with the folded result
//! - **otherwise**: share of blocks whose mean clears its threshold by more
//!   than the margin
//!
//! The copy mode starts at two full copies (512 blocks), not at 257 blocks:
//! an image of 257-511 blocks holds a single full copy, and a share of one
//! copy can only be 0 or 1, so such images are scored by margin instead.
//!
//! Copy agreement is exact over all 256 bits. A single misread block in
//! every copy, which textured or noisy content easily causes, drops the
//! confidence to 0 even when the folded payload is correct. On flat content
//! the opposite failure exists: misreads aligned across copies survive the
//! vote and can be reported as `found` with wrong identifiers.

use image::GrayImage;
use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::grid::{self, BlockGrid};
use crate::payload::{Payload, PAYLOAD_BITS};

/// Minimum confidence for a detection to count as found.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Margin separating clear blocks from ambiguous ones, in intensity levels.
///
/// The detector does not know the strength used at embed time, so this is
/// one tenth of [`crate::embedding::DEFAULT_STRENGTH`].
pub const DEFAULT_MARGIN: f64 = 0.2;

/// Tunable detection parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    /// Confidence required for `found` (0.0-1.0).
    pub min_confidence: f32,
    /// Minimum `|mean - threshold|` for a block to count as clear.
    pub margin: f64,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            margin: DEFAULT_MARGIN,
        }
    }
}

/// Result of watermark detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Whether a readable payload was recovered with enough confidence.
    pub found: bool,
    /// Recovered device identifier, present only when `found`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Recovered session identifier, present only when `found`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Recovered bit sequence: one bit per block, folded to 256 positions
    /// when the image holds more blocks than that.
    #[serde(serialize_with = "bits_as_string")]
    pub bits: Vec<u8>,
    /// Raw recovered payload, whenever all 256 bits were recovered.
    ///
    /// Kept even when `found` is false so callers can audit it or call
    /// [`Payload::identifiers`] to see why decoding failed.
    pub payload: Option<Payload>,
    /// Number of blocks in the image.
    pub blocks: usize,
    /// Number of complete 256-block payload copies in the image.
    pub copies: usize,
}

/// Recover the payload from a possibly watermarked image.
///
/// A pure function of the image: an unmarked image yields `found == false`,
/// never an error.
///
/// # Errors
///
/// Returns [`crate::Error::EmptyImage`] if the image has a zero dimension.
pub fn detect(image: &GrayImage, opts: &DetectOptions) -> Result<Detection> {
    let grid = BlockGrid::for_image(image)?;
    let means = grid::block_means(image, &grid);
    let fallback = grid::global_mean(image);

    let reading = read_blocks(&means, &grid, fallback, opts.margin);
    let blocks = reading.bits.len();
    let copies = blocks / PAYLOAD_BITS;
    let bits = fold_majority(&reading.bits);

    #[allow(clippy::cast_precision_loss)]
    let confidence = if copies >= 2 {
        copy_agreement(&reading.bits, &bits)
    } else {
        reading.clear as f32 / blocks as f32
    };

    let payload = Payload::from_bits(&bits).ok();
    let identifiers = payload
        .and_then(|p| p.identifiers().ok())
        .filter(|(device_id, _)| !device_id.is_empty());

    let mut detection = Detection {
        found: false,
        device_id: None,
        session_id: None,
        confidence,
        bits,
        payload,
        blocks,
        copies,
    };

    if confidence >= opts.min_confidence {
        if let Some((device_id, session_id)) = identifiers {
            detection.found = true;
            detection.device_id = Some(device_id);
            detection.session_id = Some(session_id);
        }
    }

    Ok(detection)
}

/// Per-block bits plus the number of blocks outside the ambiguity margin.
struct BlockReading {
    bits: Vec<u8>,
    clear: usize,
}

fn read_blocks(means: &[f64], grid: &BlockGrid, fallback: f64, margin: f64) -> BlockReading {
    let mut bits = Vec::with_capacity(means.len());
    let mut clear = 0;
    for (index, &mean) in means.iter().enumerate() {
        let threshold = local_threshold(means, grid, index, fallback);
        bits.push(u8::from(mean > threshold));
        if (mean - threshold).abs() > margin {
            clear += 1;
        }
    }
    BlockReading { bits, clear }
}

/// Average of the neighbouring block means, or `fallback` for a lone block.
fn local_threshold(means: &[f64], grid: &BlockGrid, index: usize, fallback: f64) -> f64 {
    let (sum, count) = grid
        .neighbors(index)
        .fold((0.0, 0u32), |(sum, count), n| (sum + means[n], count + 1));
    if count == 0 {
        fallback
    } else {
        sum / f64::from(count)
    }
}

/// Majority vote per payload position; ties resolve to 0.
///
/// Sequences of at most 256 bits are returned unchanged.
fn fold_majority(bits: &[u8]) -> Vec<u8> {
    if bits.len() <= PAYLOAD_BITS {
        return bits.to_vec();
    }
    let mut ones = [0usize; PAYLOAD_BITS];
    let mut votes = [0usize; PAYLOAD_BITS];
    for (i, &bit) in bits.iter().enumerate() {
        ones[i % PAYLOAD_BITS] += usize::from(bit);
        votes[i % PAYLOAD_BITS] += 1;
    }
    ones.iter()
        .zip(&votes)
        .map(|(&ones, &votes)| u8::from(ones * 2 > votes))
        .collect()
}

/// Share of complete payload copies identical to the folded bits.
#[allow(clippy::cast_precision_loss)]
fn copy_agreement(bits: &[u8], folded: &[u8]) -> f32 {
    let copies = bits.chunks_exact(PAYLOAD_BITS);
    let total = copies.len();
    if total == 0 {
        return 0.0;
    }
    let agreeing = copies.filter(|copy| *copy == folded).count();
    agreeing as f32 / total as f32
}

#[allow(clippy::ptr_arg)]
fn bits_as_string<S: Serializer>(
    bits: &Vec<u8>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let text: String = bits.iter().map(|&b| if b == 1 { '1' } else { '0' }).collect();
    serializer.serialize_str(&text)
}
