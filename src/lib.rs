//! Invisible block-mean watermarks for tracing leaked screen captures.
//!
//! A 32-byte payload (16-byte device identifier + 16-byte session
//! identifier) is hidden in a grayscale frame by nudging the brightness of
//! each 8x8 block up for a 1 bit or down for a 0 bit. Detection compares each
//! block with its neighbours, folds repeated payload copies by majority vote,
//! and reports a confidence score alongside the recovered identifiers.
//!
//! # Quick Start
//!
//! ```no_run
//! use screen_watermark::{to_grayscale, WatermarkEngine};
//!
//! let engine = WatermarkEngine::new();
//! let frame = to_grayscale(&image::open("frame.png").unwrap());
//! let marked = engine.embed(&frame, "DEVICE-001", "SESSION-001").unwrap();
//! marked.save("frame_watermarked.png").unwrap();
//! ```
//!
//! # Detection
//!
//! Detection never fails just because no watermark is present; it reports
//! `found == false` instead.
//!
//! ```no_run
//! use screen_watermark::{to_grayscale, WatermarkEngine};
//!
//! let engine = WatermarkEngine::new();
//! let capture = to_grayscale(&image::open("leak.png").unwrap());
//! let result = engine.detect(&capture).unwrap();
//! if result.found {
//!     println!(
//!         "device={:?} session={:?} confidence={:.0}%",
//!         result.device_id,
//!         result.session_id,
//!         result.confidence * 100.0
//!     );
//! }
//! ```

#![deny(missing_docs)]

pub mod detection;
pub mod embedding;
mod engine;
pub mod error;
pub mod grid;
pub mod payload;
pub mod registry;

pub use detection::{DetectOptions, Detection};
pub use engine::{
    default_output_path, is_supported_image, save_image, to_grayscale, ProcessOptions,
    ProcessResult, WatermarkEngine,
};
pub use error::{Error, Result};
pub use payload::Payload;
pub use registry::Registry;
