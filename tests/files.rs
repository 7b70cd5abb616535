use std::path::Path;

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use tempfile::TempDir;

use screen_watermark::{save_image, ProcessOptions, WatermarkEngine};

fn write_gray(path: &Path, width: u32, height: u32) {
    save_image(&GrayImage::from_pixel(width, height, Luma([128])), path).unwrap();
}

#[test]
fn embed_file_then_detect_file() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("frame.png");
    let output = dir.path().join("frame_watermarked.png");
    write_gray(&input, 640, 480);

    let engine = WatermarkEngine::new();
    let embedded = engine.embed_file(&input, &output, "DEV-1", "SESS-1");
    assert!(embedded.success, "{}", embedded.message);
    assert!(!embedded.skipped);
    assert!(output.exists());

    let detected = engine.detect_file(&output);
    assert!(detected.success, "{}", detected.message);
    let detection = detected.detection.unwrap();
    assert!(detection.found);
    assert_eq!(detection.device_id.as_deref(), Some("DEV-1"));
    assert_eq!(detection.session_id.as_deref(), Some("SESS-1"));
    assert!(detected.message.contains("device=DEV-1"));
}

#[test]
fn color_input_is_converted_to_grayscale() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("color.png");
    let output = dir.path().join("out").join("color.png");
    // (90 + 150 + 144) / 3 == 128
    RgbImage::from_pixel(640, 480, Rgb([90, 150, 144]))
        .save(&input)
        .unwrap();

    let engine = WatermarkEngine::new();
    let embedded = engine.embed_file(&input, &output, "DEVICE-001", "SESSION-001");
    assert!(embedded.success, "{}", embedded.message);

    let saved = image::open(&output).unwrap();
    assert!(matches!(saved, DynamicImage::ImageLuma8(_)));

    let detection = engine.detect_file(&output).detection.unwrap();
    assert!(detection.found);
    assert_eq!(detection.device_id.as_deref(), Some("DEVICE-001"));
}

#[test]
fn small_images_are_skipped_unless_forced() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("thumb.png");
    let output = dir.path().join("thumb_watermarked.png");
    write_gray(&input, 64, 64);

    let engine = WatermarkEngine::new();
    let result = engine.embed_file(&input, &output, "DEV-1", "SESS-1");
    assert!(result.skipped);
    assert!(result.success);
    assert!(!output.exists());

    let forced = WatermarkEngine::with_options(&ProcessOptions {
        force: true,
        ..ProcessOptions::default()
    })
    .unwrap();
    let result = forced.embed_file(&input, &output, "DEV-1", "SESS-1");
    assert!(!result.skipped);
    assert!(result.success, "{}", result.message);
    assert!(output.exists());

    let detection = forced.detect_file(&output).detection.unwrap();
    assert!(!detection.found);
    assert_eq!(detection.blocks, 64);
}

#[test]
fn missing_input_fails() {
    let dir = TempDir::new().unwrap();
    let engine = WatermarkEngine::new();
    let result = engine.detect_file(&dir.path().join("nope.png"));
    assert!(!result.success);
    assert!(result.message.starts_with("Failed to load"));
}

#[test]
fn unsupported_output_format_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("frame.png");
    write_gray(&input, 128, 128);

    let engine = WatermarkEngine::new();
    let result = engine.embed_file(&input, &dir.path().join("frame.xyz"), "DEV-1", "SESS-1");
    assert!(!result.success);
    assert!(result.message.starts_with("Failed to save"));
}

#[test]
fn directory_batch_embeds_and_detects_every_image() {
    let dir = TempDir::new().unwrap();
    let input_dir = dir.path().join("in");
    let output_dir = dir.path().join("out");
    std::fs::create_dir(&input_dir).unwrap();
    for name in ["a.png", "b.bmp", "c.png"] {
        write_gray(&input_dir.join(name), 640, 480);
    }
    std::fs::write(input_dir.join("notes.txt"), "not an image").unwrap();

    let engine = WatermarkEngine::new();
    let embedded = engine.embed_directory(&input_dir, &output_dir, "DEV-1", "SESS-1");
    assert_eq!(embedded.len(), 3);
    assert!(embedded.iter().all(|r| r.success));

    let detected = engine.detect_directory(&output_dir);
    assert_eq!(detected.len(), 3);
    for result in &detected {
        let detection = result.detection.as_ref().unwrap();
        assert!(detection.found, "{}", result.path.display());
        assert_eq!(detection.device_id.as_deref(), Some("DEV-1"));
    }

    let names: Vec<_> = detected
        .iter()
        .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, ["a.png", "b.bmp", "c.png"]);
}

#[test]
fn unreadable_directory_reports_one_failure() {
    let dir = TempDir::new().unwrap();
    let results = WatermarkEngine::new().detect_directory(&dir.path().join("missing"));
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
}
