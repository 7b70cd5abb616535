use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use screen_watermark::{
    default_output_path, ProcessOptions, ProcessResult, Registry, WatermarkEngine,
};

#[derive(Parser)]
#[command(
    name = "screen-watermark",
    about = "Embed and detect invisible device/session watermarks in screen captures",
    version,
    after_help = "Simple usage: screen-watermark embed frame.png -d DEVICE-001 -s SESSION-001\n\
                  \x20             screen-watermark detect leak.png\n\n\
                  NOTE: Save watermarked frames in a lossless format (PNG/BMP/WebP).\n\
                  Frames need at least 256 8x8 blocks (e.g. 128x128) to carry the full payload."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a device and session identifier into an image or directory
    Embed {
        /// Input image file or directory
        input: PathBuf,

        /// Device identifier (at most 16 bytes)
        #[arg(short, long)]
        device: String,

        /// Session identifier (at most 16 bytes)
        #[arg(short, long)]
        session: String,

        /// Output file or directory (default: {name}_watermarked.{ext})
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Per-block brightness offset, at least 1.0 (above ~8 becomes visible)
        #[arg(long, default_value = "2.0")]
        strength: f32,

        /// Embed even when the image cannot hold the full payload
        #[arg(short, long)]
        force: bool,
    },
    /// Detect a watermark in an image or every image in a directory
    Detect {
        /// Input image file or directory
        input: PathBuf,

        /// Minimum confidence to report a watermark as found (0.0-1.0)
        #[arg(short = 't', long, default_value = "0.5")]
        min_confidence: f32,

        /// Ambiguity margin in intensity levels for single-copy images
        #[arg(long, default_value = "0.2")]
        margin: f64,

        /// Print detection results as JSON
        #[arg(long)]
        json: bool,

        /// Record found watermarks in this registry file
        #[arg(long)]
        registry: Option<PathBuf>,
    },
    /// Enroll a device in the registry
    Enroll {
        /// Device identifier (1-16 bytes)
        device: String,

        /// Human-readable device name
        #[arg(long, default_value = "")]
        name: String,

        /// Device location
        #[arg(long, default_value = "")]
        location: String,

        /// Registry file
        #[arg(long, default_value = "watermark-registry.json")]
        registry: PathBuf,
    },
    /// Open a new session for an enrolled device
    Session {
        /// Device identifier
        device: String,

        /// Human-readable session name
        #[arg(long, default_value = "")]
        name: String,

        /// Registry file
        #[arg(long, default_value = "watermark-registry.json")]
        registry: PathBuf,
    },
    /// Generate a traceability report for a recorded detection
    Report {
        /// Detection identifier (DET-000001)
        detection: String,

        /// Registry file
        #[arg(long, default_value = "watermark-registry.json")]
        registry: PathBuf,
    },
    /// Show registry record counts, devices and detections
    Status {
        /// Registry file
        #[arg(long, default_value = "watermark-registry.json")]
        registry: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let opts = ProcessOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        ..ProcessOptions::default()
    };

    let code = match cli.command {
        Command::Embed {
            input,
            device,
            session,
            output,
            strength,
            force,
        } => {
            let opts = ProcessOptions {
                strength,
                force,
                ..opts
            };
            run_embed(&input, output.as_deref(), &device, &session, &opts)
        }
        Command::Detect {
            input,
            min_confidence,
            margin,
            json,
            registry,
        } => {
            if !(0.0..=1.0).contains(&min_confidence) {
                fail("Minimum confidence must be between 0.0 and 1.0");
            }
            if !margin.is_finite() || margin < 0.0 {
                fail("Margin must be a non-negative number");
            }
            let opts = ProcessOptions {
                min_confidence,
                margin,
                ..opts
            };
            run_detect(&input, json, registry.as_deref(), &opts)
        }
        Command::Enroll {
            device,
            name,
            location,
            registry,
        } => with_registry(&registry, true, |reg| {
            let device = reg.enroll_device(&device, &name, &location)?;
            print_json(device);
            Ok(())
        }),
        Command::Session {
            device,
            name,
            registry,
        } => with_registry(&registry, true, |reg| {
            let session = reg.create_session(&device, &name)?;
            print_json(session);
            Ok(())
        }),
        Command::Report {
            detection,
            registry,
        } => with_registry(&registry, false, |reg| {
            print_json(&reg.generate_report(&detection)?);
            Ok(())
        }),
        Command::Status { registry } => with_registry(&registry, false, |reg| {
            print_json(&serde_json::json!({
                "stats": reg.stats(),
                "devices": reg.devices().collect::<Vec<_>>(),
                "detections": reg.detections().collect::<Vec<_>>(),
            }));
            Ok(())
        }),
    };

    process::exit(code);
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_embed(
    input: &Path,
    output: Option<&Path>,
    device: &str,
    session: &str,
    opts: &ProcessOptions,
) -> i32 {
    let engine = engine_or_exit(opts);
    if !input.exists() {
        fail(&format!("Input path does not exist: {}", input.display()));
    }
    for (label, id) in [("device", device), ("session", session)] {
        if id.len() > screen_watermark::payload::FIELD_LEN {
            tracing::warn!("{label} identifier {id:?} exceeds 16 bytes and will be truncated");
        }
    }

    if !opts.quiet {
        eprintln!(
            "Embedding device={device} session={session} (strength {:.1})",
            engine.strength()
        );
        if opts.force {
            eprintln!("WARNING: Force mode - small images will carry a truncated payload!");
        }
        eprintln!();
    }

    let results = if input.is_dir() {
        let Some(output_dir) = output else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: screen-watermark embed <input_dir> -d <device> -s <session> -o <output_dir>");
            process::exit(1);
        };
        engine.embed_directory(input, output_dir, device, session)
    } else {
        let output_path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
        vec![engine.embed_file(input, &output_path, device, session)]
    };

    summarize(&results, opts)
}

fn run_detect(input: &Path, json: bool, registry: Option<&Path>, opts: &ProcessOptions) -> i32 {
    let engine = engine_or_exit(opts);
    if !input.exists() {
        fail(&format!("Input path does not exist: {}", input.display()));
    }

    if !opts.quiet && !json {
        eprintln!(
            "Detecting (min confidence: {:.0}%, margin: {})",
            opts.min_confidence * 100.0,
            opts.margin
        );
        eprintln!();
    }

    let results = if input.is_dir() {
        engine.detect_directory(input)
    } else {
        vec![engine.detect_file(input)]
    };

    if json {
        let detections: Vec<_> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "path": r.path,
                    "success": r.success,
                    "message": r.message,
                    "detection": r.detection,
                })
            })
            .collect();
        print_json(&detections);
    }

    if let Some(path) = registry {
        let code = with_registry(path, true, |reg| {
            for detection in results.iter().filter_map(|r| r.detection.as_ref()) {
                if let Some(record) = reg.record_found(detection)? {
                    if !opts.quiet {
                        eprintln!(
                            "[RECORDED] {} device={} ({:?})",
                            record.detection_id, record.device_id, record.status
                        );
                    }
                }
            }
            Ok(())
        });
        if code != 0 {
            return code;
        }
    }

    if json {
        i32::from(results.iter().any(|r| !r.success))
    } else {
        summarize(&results, opts)
    }
}

/// Load the registry, run `f`, and save it back when `write` is set.
fn with_registry<F>(path: &Path, write: bool, f: F) -> i32
where
    F: FnOnce(&mut Registry) -> screen_watermark::Result<()>,
{
    let result = Registry::load(path).and_then(|mut reg| {
        f(&mut reg)?;
        if write {
            reg.save(path)?;
        }
        Ok(())
    });
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    }
}

fn engine_or_exit(opts: &ProcessOptions) -> WatermarkEngine {
    match WatermarkEngine::with_options(opts) {
        Ok(e) => e,
        Err(e) => fail(&format!("Failed to initialize engine: {e}")),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: failed to serialize output: {e}"),
    }
}

fn summarize(results: &[ProcessResult], opts: &ProcessOptions) -> i32 {
    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in results {
        print_result(r, opts);
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !opts.quiet {
        eprintln!();
        eprint!("[Summary] Processed: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    i32::from(fail_count > 0)
}

fn print_result(result: &ProcessResult, opts: &ProcessOptions) {
    if opts.quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.skipped {
        eprintln!("[SKIP] {filename}: {}", result.message);
    } else if !result.success {
        eprintln!("[FAIL] {filename}: {}", result.message);
    } else if let Some(detection) = &result.detection {
        let tag = if detection.found { "FOUND" } else { "NONE" };
        eprintln!("[{tag}] {filename}: {}", result.message);
        if opts.verbose {
            if let Some(payload) = &detection.payload {
                eprintln!("  -> payload {}", payload.to_hex());
            }
            eprintln!(
                "  -> {} blocks, {} full copies",
                detection.blocks, detection.copies
            );
        }
    } else {
        eprintln!("[OK] {filename}: {}", result.message);
    }
}
