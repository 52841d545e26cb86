// SPDX-License-Identifier: GPL-3.0-only

//! Detector implementations
//!
//! Each task implements [`Detector`](super::Detector) for one symbology.

pub mod qr_detector;

pub use qr_detector::QrDetector;
