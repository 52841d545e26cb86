// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Smallest preview width considered during size negotiation
pub const MIN_CAMERA_PREVIEW_WIDTH: u32 = 400;

/// Largest preview width considered during size negotiation
pub const MAX_CAMERA_PREVIEW_WIDTH: u32 = 1920;

/// Frame rate requested from capture devices
pub const REQUESTED_CAMERA_FPS: u32 = 30;

/// Two aspect ratios closer than this are considered the same class
pub const ASPECT_RATIO_TOLERANCE: f32 = 0.01;

/// Maximum wait for exclusive device access before reporting the device busy
pub const DEVICE_LOCK_TIMEOUT: Duration = Duration::from_millis(2500);

/// Maximum wait for the processing worker to exit during release
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the processing loop waits for a frame before running idle work
pub const PROCESSOR_IDLE_TICK: Duration = Duration::from_millis(50);

/// Duration of the "searching" animation before the result is shown
pub const SEARCH_ANIMATION_DURATION: Duration = Duration::from_millis(2000);

/// Number of frame buffers owned by a capture source.
///
/// One in the channel slot, one being processed, one being filled by the
/// device and one spare.
pub const FRAME_BUFFER_COUNT: usize = 4;

/// Fewest buffers that keep the channel latest-wins.
///
/// The device needs a free buffer while the processor holds one frame and
/// another waits in the slot.
pub const MIN_FRAME_BUFFER_COUNT: usize = 3;

/// Frames are downscaled to this size (largest side) before QR detection
pub const DETECTOR_MAX_DIMENSION: u32 = 640;

/// Preference defaults
pub mod defaults {
    /// Minimum barcode width as percentage of the reticle width
    pub const MINIMUM_BARCODE_WIDTH_PERCENT: u32 = 50;
    /// Reticle width as percentage of the view width
    pub const RETICLE_WIDTH_PERCENT: u32 = 80;
    /// Reticle height as percentage of the view height
    pub const RETICLE_HEIGHT_PERCENT: u32 = 35;
    /// Show the searching animation before the result
    pub const DELAY_LOADING_BARCODE_RESULT: bool = true;
    /// Require a minimum barcode size before accepting it
    pub const ENABLE_BARCODE_SIZE_CHECK: bool = false;
}
