//! File and batch processing around the watermark codec.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat};

use crate::detection::{self, DetectOptions, Detection, DEFAULT_MARGIN, DEFAULT_MIN_CONFIDENCE};
use crate::embedding::{self, DEFAULT_STRENGTH, MIN_EFFECTIVE_STRENGTH};
use crate::error::{Error, Result};
use crate::payload::{Payload, PAYLOAD_BITS};

/// Options controlling watermark processing behavior.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Per-block brightness offset used when embedding.
    pub strength: f32,
    /// Detection confidence threshold (0.0-1.0).
    pub min_confidence: f32,
    /// Ambiguity margin for single-copy confidence, in intensity levels.
    pub margin: f64,
    /// Embed even when the image cannot hold the full 256-bit payload.
    pub force: bool,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            margin: DEFAULT_MARGIN,
            force: false,
            verbose: false,
            quiet: false,
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (too small to carry the payload).
    pub skipped: bool,
    /// Detection confidence score (0.0 for embedding).
    pub confidence: f32,
    /// Full detection result, for detection runs that reached the detector.
    pub detection: Option<Detection>,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            skipped: false,
            confidence: 0.0,
            detection: None,
            message: String::new(),
        }
    }

    fn failed(path: &Path, message: String) -> Self {
        Self {
            message,
            ..Self::new(path)
        }
    }
}

/// The watermark engine holding validated embed and detect settings.
///
/// Holds no mutable state, so one engine can serve many threads at once.
#[derive(Debug, Clone)]
pub struct WatermarkEngine {
    strength: f32,
    detect: DetectOptions,
    force: bool,
}

impl WatermarkEngine {
    /// Create an engine with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            detect: DetectOptions::default(),
            force: false,
        }
    }

    /// Create an engine from processing options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStrength`] if the strength is not a finite
    /// positive number, and [`Error::IneffectiveStrength`] if it is below
    /// [`MIN_EFFECTIVE_STRENGTH`] and would leave images unchanged.
    pub fn with_options(opts: &ProcessOptions) -> Result<Self> {
        if !opts.strength.is_finite() || opts.strength <= 0.0 {
            return Err(Error::InvalidStrength(opts.strength));
        }
        if opts.strength < MIN_EFFECTIVE_STRENGTH {
            return Err(Error::IneffectiveStrength(opts.strength));
        }
        Ok(Self {
            strength: opts.strength,
            detect: DetectOptions {
                min_confidence: opts.min_confidence,
                margin: opts.margin,
            },
            force: opts.force,
        })
    }

    /// Embedding strength in use.
    #[must_use]
    pub fn strength(&self) -> f32 {
        self.strength
    }

    /// Embed a device and session identifier into a copy of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyImage`] for a zero-dimension image.
    pub fn embed(&self, image: &GrayImage, device_id: &str, session_id: &str) -> Result<GrayImage> {
        embedding::embed(image, &Payload::new(device_id, session_id), self.strength)
    }

    /// Detect a watermark in `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyImage`] for a zero-dimension image.
    pub fn detect(&self, image: &GrayImage) -> Result<Detection> {
        detection::detect(image, &self.detect)
    }

    /// Process a single image file: load, convert to grayscale, embed, save.
    #[must_use]
    pub fn embed_file(
        &self,
        input: &Path,
        output: &Path,
        device_id: &str,
        session_id: &str,
    ) -> ProcessResult {
        let mut result = ProcessResult::new(input);

        let gray = match image::open(input) {
            Ok(img) => to_grayscale(&img),
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let (w, h) = gray.dimensions();
        let capacity = embedding::capacity_bits(w, h);
        if capacity < PAYLOAD_BITS && !self.force {
            tracing::debug!(path = %input.display(), capacity, "image below payload capacity");
            result.skipped = true;
            result.success = true;
            result.message = format!(
                "Image too small ({w}x{h}) to carry {PAYLOAD_BITS} payload bits (holds {capacity})"
            );
            return result;
        }

        let marked = match self.embed(&gray, device_id, session_id) {
            Ok(img) => img,
            Err(e) => {
                result.message = format!("Failed to embed: {e}");
                return result;
            }
        };

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&marked, output) {
            Ok(()) => {
                tracing::info!(
                    input = %input.display(),
                    output = %output.display(),
                    copies = embedding::repetitions(w, h),
                    "watermark embedded"
                );
                result.success = true;
                result.message = format!("Watermark embedded -> {}", output.display());
            }
            Err(e) => {
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }

    /// Process a single image file: load, convert to grayscale, detect.
    ///
    /// A file without a watermark is still a success; check
    /// `result.detection` for the outcome.
    #[must_use]
    pub fn detect_file(&self, input: &Path) -> ProcessResult {
        let mut result = ProcessResult::new(input);

        let gray = match image::open(input) {
            Ok(img) => to_grayscale(&img),
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        match self.detect(&gray) {
            Ok(detection) => {
                tracing::debug!(
                    path = %input.display(),
                    found = detection.found,
                    confidence = detection.confidence,
                    blocks = detection.blocks,
                    "detection finished"
                );
                result.success = true;
                result.confidence = detection.confidence;
                result.message = match (&detection.device_id, &detection.session_id) {
                    (Some(device), Some(session)) => format!(
                        "device={device} session={session} ({:.0}% confidence)",
                        detection.confidence * 100.0
                    ),
                    _ => format!(
                        "No watermark found ({:.0}% confidence, {} blocks, {} copies)",
                        detection.confidence * 100.0,
                        detection.blocks,
                        detection.copies
                    ),
                };
                result.detection = Some(detection);
            }
            Err(e) => {
                result.message = format!("Failed to detect: {e}");
            }
        }

        result
    }

    /// Embed the same identifiers into every supported image in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    #[must_use]
    pub fn embed_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        device_id: &str,
        session_id: &str,
    ) -> Vec<ProcessResult> {
        let entries = match image_entries(input_dir) {
            Ok(entries) => entries,
            Err(e) => {
                return vec![ProcessResult::failed(
                    input_dir,
                    format!("Failed to read directory: {e}"),
                )];
            }
        };

        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                return vec![ProcessResult::failed(
                    output_dir,
                    format!("Failed to create output directory: {e}"),
                )];
            }
        }

        tracing::info!(count = entries.len(), dir = %input_dir.display(), "embedding directory");
        let embed_one = |input: &PathBuf| match input.file_name() {
            Some(name) => self.embed_file(input, &output_dir.join(name), device_id, session_id),
            None => ProcessResult::failed(input, "Path has no file name".to_string()),
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(embed_one).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(embed_one).collect()
        }
    }

    /// Run detection on every supported image in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    #[must_use]
    pub fn detect_directory(&self, input_dir: &Path) -> Vec<ProcessResult> {
        let entries = match image_entries(input_dir) {
            Ok(entries) => entries,
            Err(e) => {
                return vec![ProcessResult::failed(
                    input_dir,
                    format!("Failed to read directory: {e}"),
                )];
            }
        };

        tracing::info!(count = entries.len(), dir = %input_dir.display(), "scanning directory");

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(|p| self.detect_file(p)).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(|p| self.detect_file(p)).collect()
        }
    }
}

impl Default for WatermarkEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Supported image files directly inside `dir`, sorted by path.
fn image_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_supported_image(p))
        .collect();
    entries.sort();
    Ok(entries)
}

/// Reduce an image to grayscale by averaging its R, G and B channels.
///
/// The average truncates towards zero; alpha is ignored.
#[must_use]
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = img {
        return gray.clone();
    }
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let px = rgb.get_pixel(x, y);
        let sum = u16::from(px[0]) + u16::from(px[1]) + u16::from(px[2]);
        #[allow(clippy::cast_possible_truncation)]
        let avg = (sum / 3) as u8;
        image::Luma([avg])
    })
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save a grayscale image with format-specific quality settings.
///
/// Lossless formats are preferred: JPEG output uses quality 100 but may still
/// disturb the two-level block offsets of a default-strength watermark.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &GrayImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::Bmp => {
            img.save(path)?;
        }
        ImageFormat::WebP => {
            // The WebP encoder only accepts RGB(A) input.
            DynamicImage::ImageLuma8(img.clone()).to_rgb8().save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"frame.png"` becomes `"frame_watermarked.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_watermarked.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn with_options_rejects_bad_strength() {
        let opts = ProcessOptions {
            strength: 0.0,
            ..ProcessOptions::default()
        };
        assert!(matches!(
            WatermarkEngine::with_options(&opts),
            Err(Error::InvalidStrength(_))
        ));
    }

    #[test]
    fn with_options_rejects_sub_level_strength() {
        for strength in [0.5, 0.99] {
            let opts = ProcessOptions {
                strength,
                ..ProcessOptions::default()
            };
            assert!(matches!(
                WatermarkEngine::with_options(&opts),
                Err(Error::IneffectiveStrength(_))
            ));
        }
        let opts = ProcessOptions {
            strength: MIN_EFFECTIVE_STRENGTH,
            ..ProcessOptions::default()
        };
        assert!(WatermarkEngine::with_options(&opts).is_ok());
    }

    #[test]
    fn default_engine_uses_default_strength() {
        let engine = WatermarkEngine::default();
        assert!((engine.strength() - DEFAULT_STRENGTH).abs() < f32::EPSILON);
    }

    #[test]
    fn grayscale_averages_channels() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([10, 20, 30]));
        rgb.put_pixel(1, 0, Rgb([255, 255, 254]));
        let gray = to_grayscale(&DynamicImage::ImageRgb8(rgb));
        assert_eq!(gray.get_pixel(0, 0), &Luma([20]));
        assert_eq!(gray.get_pixel(1, 0), &Luma([254]));
    }

    #[test]
    fn grayscale_input_passes_through() {
        let gray = GrayImage::from_pixel(3, 3, Luma([77]));
        assert_eq!(to_grayscale(&DynamicImage::ImageLuma8(gray.clone())), gray);
    }

    #[test]
    fn default_output_path_appends_watermarked_suffix() {
        let p = default_output_path(Path::new("/tmp/frame.png"));
        assert_eq!(p, PathBuf::from("/tmp/frame_watermarked.png"));

        let p = default_output_path(Path::new("capture.bmp"));
        assert_eq!(
            p.file_name().unwrap().to_str().unwrap(),
            "capture_watermarked.bmp"
        );
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("frame.jpg")));
        assert!(is_supported_image(Path::new("frame.JPEG")));
        assert!(is_supported_image(Path::new("frame.png")));
        assert!(is_supported_image(Path::new("frame.webp")));
        assert!(is_supported_image(Path::new("frame.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("frame.gif")));
        assert!(!is_supported_image(Path::new("frame.txt")));
        assert!(!is_supported_image(Path::new("frame")));
    }
}
