// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanner operations
//!
//! This module provides command-line functionality for:
//! - Scanning frames replayed by a virtual camera through the full pipeline
//! - Decoding a single image
//! - Showing the preview size negotiation for a list of sizes

use barcode_scanner::app::format_picker::{DisplayConstraints, SizeNegotiator};
use barcode_scanner::app::frame_processor::{Candidate, DetectionProcessor, QrDetector};
use barcode_scanner::app::workflow::{WorkflowEvent, WorkflowModel, WorkflowStateMachine};
use barcode_scanner::backends::camera::CaptureSource;
use barcode_scanner::backends::camera::types::{
    LensFacing, Resolution, SensorRotation, SizeCandidate,
};
use barcode_scanner::backends::virtual_camera::{VirtualCamera, load_image};
use barcode_scanner::config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// How often the scan loop checks for workflow events
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Options for [`scan`]
pub struct ScanOptions {
    /// Images to replay; a test pattern when empty
    pub images: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub display: Resolution,
    pub display_rotation: SensorRotation,
    pub sensor_orientation: SensorRotation,
    pub facing: LensFacing,
    /// Show results immediately instead of after the searching animation
    pub no_delay: bool,
    /// Keep scanning after a result instead of exiting
    pub continuous: bool,
    pub frame_limit: Option<u64>,
    pub timeout: Duration,
}

/// Run the capture pipeline on a virtual camera and print workflow events
pub fn scan(options: ScanOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(options.config.as_deref())?;

    let camera = if options.images.is_empty() {
        VirtualCamera::synthetic()
    } else {
        VirtualCamera::from_files(&options.images)?
    };
    let camera = camera
        .with_facing(options.facing)
        .with_sensor_orientation(options.sensor_orientation)
        .with_frame_limit(options.frame_limit);

    let mut machine = WorkflowStateMachine::new(&config.scan);
    if options.no_delay {
        machine = machine.with_delay_result(false);
    }
    let workflow = WorkflowModel::new(machine);
    let mut subscription = workflow.subscribe();

    let display = DisplayConstraints {
        size: options.display,
        rotation: options.display_rotation,
    };
    let negotiator =
        SizeNegotiator::default().with_user_size(config.user_size_pair(options.facing));
    let mut source = CaptureSource::new(Box::new(camera), display)
        .with_negotiator(negotiator)
        .with_buffer_count(config.buffer_count);

    let detector = QrDetector::with_max_dimension(config.detector_max_dimension);
    source.set_frame_processor(Box::new(DetectionProcessor::new(
        Box::new(detector),
        workflow.clone(),
        options.facing,
    )))?;

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    source.start()?;
    if let Some(config) = source.stream_config() {
        println!("Streaming {}", config);
    }
    println!("Scanning... Press Ctrl+C to stop.");

    let start = Instant::now();
    let mut results = 0usize;
    'scan: while start.elapsed() < options.timeout {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }

        for event in subscription.drain() {
            match event {
                WorkflowEvent::StateChanged { from, to } => {
                    println!("state: {} -> {}", from, to);
                    if to.freezes_preview() && !from.freezes_preview() {
                        println!("preview frozen");
                    }
                }
                WorkflowEvent::BarcodeDetected(candidate) => {
                    results += 1;
                    print_candidate(&candidate)?;
                    if !options.continuous {
                        break 'scan;
                    }
                    workflow.reset();
                }
            }
        }

        std::thread::sleep(EVENT_POLL_INTERVAL);
    }

    let stats = source.channel_stats();
    info!(
        published = stats.published,
        replaced = stats.dropped,
        analysed = stats.taken,
        pool_exhausted = source.dropped_frames(),
        "Scan finished"
    );
    source.release()?;

    if results == 0 {
        println!("No barcode found.");
    }
    Ok(())
}

/// Detect barcodes in a single image
pub fn decode(path: &Path, max_dimension: u32) -> Result<(), Box<dyn std::error::Error>> {
    let img = load_image(path)?;
    let candidates = QrDetector::with_max_dimension(max_dimension).detect_image(&img);

    if candidates.is_empty() {
        println!("No barcode found.");
        return Ok(());
    }
    for candidate in &candidates {
        print_candidate(candidate)?;
    }
    Ok(())
}

/// Show which preview size would be chosen for the given sizes
pub fn sizes(
    supported: &[Resolution],
    display: DisplayConstraints,
    sensor: SensorRotation,
    user: Option<Resolution>,
) -> Result<(), Box<dyn std::error::Error>> {
    let candidates: Vec<SizeCandidate> = supported.iter().copied().map(SizeCandidate::from).collect();
    let negotiator = SizeNegotiator::default().with_user_size(user.map(SizeCandidate::from));

    println!(
        "Display: {} rotated {} (target aspect ratio {:.3})",
        display.size,
        display.rotation,
        display.aspect_ratio(sensor)
    );
    match negotiator.negotiate(&candidates, &display, sensor) {
        Some(chosen) => {
            println!("Preview size: {}", chosen.preview);
            if let Some(picture) = chosen.picture {
                println!("Picture size: {}", picture);
            }
            Ok(())
        }
        None => Err("No sizes given".into()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Config::load_from(path)?),
        None => Ok(Config::load()),
    }
}

fn print_candidate(candidate: &Candidate) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string(candidate)?);
    Ok(())
}
