// SPDX-License-Identifier: GPL-3.0-only

//! Format picker module
//!
//! Preview and picture size negotiation between the camera's supported
//! sizes and the display.

pub mod preferences;

pub use preferences::{
    DisplayConstraints, SizeNegotiator, generate_size_candidates, select_preview_size,
    select_size_pair,
};
