//! Embed a watermark into a synthetic frame, save it, and detect it again.
//!
//! Usage:
//! ```sh
//! cargo run --example embed_and_detect -- [output.png]
//! ```
//!
//! The frame is flat, which the block detector reads cleanly. Textured or
//! noisy frames usually make at least one block per payload copy misread,
//! and the exact copy-agreement confidence then falls to zero.

use std::env;
use std::path::PathBuf;
use std::process;

use image::{GrayImage, Luma};
use screen_watermark::{save_image, to_grayscale, WatermarkEngine};

fn main() {
    let output = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("demo_watermarked.png"), PathBuf::from);

    // 1280x720 flat mid-gray background.
    let frame = GrayImage::from_pixel(1280, 720, Luma([128]));

    let engine = WatermarkEngine::new();
    let marked = match engine.embed(&frame, "DEVICE-001", "SESSION-001") {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = save_image(&marked, &output) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
    println!("Saved {}", output.display());

    let reloaded = match image::open(&output) {
        Ok(img) => to_grayscale(&img),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    match engine.detect(&reloaded) {
        Ok(d) if d.found => println!(
            "Found: device={} session={} ({:.0}% confidence)",
            d.device_id.unwrap_or_default(),
            d.session_id.unwrap_or_default(),
            d.confidence * 100.0
        ),
        Ok(d) => {
            println!("No watermark found ({:.0}% confidence)", d.confidence * 100.0);
            println!("Note: textured frames can misread blocks in every copy.");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
