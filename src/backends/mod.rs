// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for frame capture
//!
//! - [`camera`]: capture pipeline from device callback to frame processor
//! - [`virtual_camera`]: capture device that replays image files or
//!   synthetic frames

pub mod camera;
pub mod virtual_camera;
