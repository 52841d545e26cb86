// SPDX-License-Identifier: GPL-3.0-only

//! Preview size selection
//!
//! Picks the camera preview size whose aspect ratio is closest to the
//! display's, within the configured width bounds. The still-picture size
//! travels with the preview size as a [`SizeCandidate`] so both outputs share
//! one field of view.

use crate::backends::camera::types::{Resolution, SensorRotation, SizeCandidate};
use crate::constants::{ASPECT_RATIO_TOLERANCE, MAX_CAMERA_PREVIEW_WIDTH, MIN_CAMERA_PREVIEW_WIDTH};
use tracing::{debug, info};

/// Display geometry used to derive the target aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConstraints {
    /// Display size in its natural orientation
    pub size: Resolution,
    /// Current rotation of the display
    pub rotation: SensorRotation,
}

impl DisplayConstraints {
    pub fn new(width: u32, height: u32, rotation: SensorRotation) -> Self {
        Self {
            size: Resolution::new(width, height),
            rotation,
        }
    }

    /// Display aspect ratio expressed in the sensor's coordinate space
    ///
    /// Width and height are swapped when the display and the sensor are
    /// rotated a quarter turn apart.
    pub fn aspect_ratio(&self, sensor: SensorRotation) -> f32 {
        if self.swaps_dimensions(sensor) {
            self.size.swapped().aspect_ratio()
        } else {
            self.size.aspect_ratio()
        }
    }

    pub fn swaps_dimensions(&self, sensor: SensorRotation) -> bool {
        self.rotation.swaps_dimensions() != sensor.swaps_dimensions()
    }
}

impl Default for DisplayConstraints {
    fn default() -> Self {
        Self::new(1920, 1080, SensorRotation::None)
    }
}

/// Select the preview size for the given display aspect ratio
///
/// Returns `None` only when `supported` is empty.
pub fn select_preview_size(
    supported: &[SizeCandidate],
    display_aspect_ratio: f32,
    min_width: u32,
    max_width: u32,
) -> Option<Resolution> {
    select_size_pair(supported, display_aspect_ratio, min_width, max_width).map(|c| c.preview)
}

/// Select the preview/picture pair for the given display aspect ratio
///
/// Candidates whose preview width is outside `[min_width, max_width]` are
/// ignored. Among the rest, every candidate whose ratio difference is within
/// [`ASPECT_RATIO_TOLERANCE`] of the best is treated as equally good and the
/// widest one wins (taller on equal width, earlier on equal size). Falls back
/// to the first supported candidate when nothing is in range.
pub fn select_size_pair(
    supported: &[SizeCandidate],
    display_aspect_ratio: f32,
    min_width: u32,
    max_width: u32,
) -> Option<SizeCandidate> {
    let first = supported.first()?;

    let in_range: Vec<(&SizeCandidate, f32)> = supported
        .iter()
        .filter(|c| (min_width..=max_width).contains(&c.preview.width))
        .map(|c| (c, (display_aspect_ratio - c.preview.aspect_ratio()).abs()))
        .collect();

    let Some(min_diff) = in_range.iter().map(|(_, diff)| *diff).reduce(f32::min) else {
        debug!(
            fallback = %first.preview,
            "No preview size within width bounds, using first supported"
        );
        return Some(*first);
    };

    let selected = in_range
        .iter()
        .filter(|(_, diff)| *diff - min_diff <= ASPECT_RATIO_TOLERANCE)
        .map(|(c, _)| **c)
        .reduce(|best, c| {
            let key = |s: &SizeCandidate| (s.preview.width, s.preview.height);
            if key(&c) > key(&best) { c } else { best }
        })
        .unwrap_or(*first);

    debug!(
        preview = %selected.preview,
        picture = ?selected.picture.map(|p| p.to_string()),
        display_aspect_ratio,
        "Selected size pair"
    );
    Some(selected)
}

/// Pair each preview size with a picture size of the same aspect ratio
///
/// The first picture size with a matching ratio is used. Preview sizes with
/// no match are skipped, unless none match at all, in which case every
/// preview size is returned on its own.
pub fn generate_size_candidates(
    preview_sizes: &[Resolution],
    picture_sizes: &[Resolution],
) -> Vec<SizeCandidate> {
    let paired: Vec<SizeCandidate> = preview_sizes
        .iter()
        .filter_map(|preview| {
            picture_sizes
                .iter()
                .find(|picture| preview.same_aspect_ratio(picture))
                .map(|picture| SizeCandidate::new(*preview, Some(*picture)))
        })
        .collect();

    if paired.is_empty() {
        debug!("No preview size matches a picture ratio, using preview sizes only");
        return preview_sizes
            .iter()
            .copied()
            .map(SizeCandidate::preview_only)
            .collect();
    }
    paired
}

/// Size selection policy for a capture source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeNegotiator {
    pub min_width: u32,
    pub max_width: u32,
    /// Size chosen by the user, honoured when the camera supports it
    pub user_size: Option<SizeCandidate>,
}

impl Default for SizeNegotiator {
    fn default() -> Self {
        Self {
            min_width: MIN_CAMERA_PREVIEW_WIDTH,
            max_width: MAX_CAMERA_PREVIEW_WIDTH,
            user_size: None,
        }
    }
}

impl SizeNegotiator {
    pub fn with_user_size(mut self, user_size: Option<SizeCandidate>) -> Self {
        self.user_size = user_size;
        self
    }

    /// Pick the size for a sensor mounted at `sensor` on the given display
    pub fn negotiate(
        &self,
        supported: &[SizeCandidate],
        display: &DisplayConstraints,
        sensor: SensorRotation,
    ) -> Option<SizeCandidate> {
        if let Some(user) = self.user_override(supported) {
            info!(preview = %user.preview, "Using user selected preview size");
            return Some(user);
        }
        select_size_pair(
            supported,
            display.aspect_ratio(sensor),
            self.min_width,
            self.max_width,
        )
    }

    /// The user's size if its preview size is actually supported
    fn user_override(&self, supported: &[SizeCandidate]) -> Option<SizeCandidate> {
        let user = self.user_size?;
        let matching = supported.iter().find(|c| c.preview == user.preview)?;
        Some(SizeCandidate::new(
            user.preview,
            user.picture.or(matching.picture),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(list: &[(u32, u32)]) -> Vec<SizeCandidate> {
        list.iter()
            .map(|&(w, h)| SizeCandidate::preview_only(Resolution::new(w, h)))
            .collect()
    }

    const SIXTEEN_NINE: f32 = 16.0 / 9.0;

    #[test]
    fn test_picks_widest_equivalent_ratio() {
        let supported = sizes(&[(640, 480), (1280, 720), (1920, 1080), (2560, 1440)]);
        assert_eq!(
            select_preview_size(&supported, SIXTEEN_NINE, 400, 1920),
            Some(Resolution::new(1920, 1080))
        );
    }

    #[test]
    fn test_selection_is_order_independent() {
        let a = sizes(&[(640, 480), (1280, 720), (1920, 1080), (800, 600)]);
        let mut b = a.clone();
        b.reverse();
        assert_eq!(
            select_preview_size(&a, SIXTEEN_NINE, 400, 1920),
            select_preview_size(&b, SIXTEEN_NINE, 400, 1920)
        );
    }

    #[test]
    fn test_near_ratio_counts_as_equal() {
        // 854x480 is within tolerance of 16:9 but narrower than 1280x720
        let supported = sizes(&[(854, 480), (1280, 720)]);
        assert_eq!(
            select_preview_size(&supported, SIXTEEN_NINE, 400, 1920),
            Some(Resolution::new(1280, 720))
        );
    }

    #[test]
    fn test_equal_width_prefers_taller_then_earlier() {
        let supported = sizes(&[(1280, 720), (1280, 722)]);
        assert_eq!(
            select_preview_size(&supported, SIXTEEN_NINE, 400, 1920),
            Some(Resolution::new(1280, 722))
        );

        let pair = vec![
            SizeCandidate::new(Resolution::new(1280, 720), Some(Resolution::new(4000, 2250))),
            SizeCandidate::new(Resolution::new(1280, 720), Some(Resolution::new(1920, 1080))),
        ];
        let chosen = select_size_pair(&pair, SIXTEEN_NINE, 400, 1920).unwrap();
        assert_eq!(chosen.picture, Some(Resolution::new(4000, 2250)));
    }

    #[test]
    fn test_falls_back_to_first_when_nothing_in_range() {
        let supported = sizes(&[(320, 240), (3840, 2160)]);
        assert_eq!(
            select_preview_size(&supported, SIXTEEN_NINE, 400, 1920),
            Some(Resolution::new(320, 240))
        );
    }

    #[test]
    fn test_empty_list_has_no_selection() {
        assert_eq!(select_preview_size(&[], SIXTEEN_NINE, 400, 1920), None);
    }

    #[test]
    fn test_single_candidate_is_returned() {
        let supported = sizes(&[(1024, 768)]);
        assert_eq!(
            select_preview_size(&supported, SIXTEEN_NINE, 400, 1920),
            Some(Resolution::new(1024, 768))
        );
    }

    #[test]
    fn test_display_swaps_for_quarter_turn() {
        let portrait = DisplayConstraints::new(1080, 1920, SensorRotation::None);
        assert!(portrait.swaps_dimensions(SensorRotation::Rotate90));
        assert!((portrait.aspect_ratio(SensorRotation::Rotate90) - SIXTEEN_NINE).abs() < 1e-4);
        assert!(!portrait.swaps_dimensions(SensorRotation::None));

        let landscape = DisplayConstraints::new(1920, 1080, SensorRotation::Rotate90);
        assert!(landscape.swaps_dimensions(SensorRotation::None));
        assert!(!landscape.swaps_dimensions(SensorRotation::Rotate270));
    }

    #[test]
    fn test_generate_candidates_pairs_by_ratio() {
        let preview = [Resolution::new(1280, 720), Resolution::new(640, 480)];
        let picture = [Resolution::new(4000, 3000), Resolution::new(3840, 2160)];
        let candidates = generate_size_candidates(&preview, &picture);
        assert_eq!(
            candidates,
            vec![
                SizeCandidate::new(preview[0], Some(picture[1])),
                SizeCandidate::new(preview[1], Some(picture[0])),
            ]
        );
    }

    #[test]
    fn test_generate_candidates_without_pairs() {
        let preview = [Resolution::new(1280, 720)];
        let picture = [Resolution::new(1000, 1000)];
        assert_eq!(
            generate_size_candidates(&preview, &picture),
            vec![SizeCandidate::preview_only(preview[0])]
        );
    }

    #[test]
    fn test_user_size_overrides_when_supported() {
        let supported = sizes(&[(640, 480), (1920, 1080)]);
        let display = DisplayConstraints::default();

        let negotiator = SizeNegotiator::default()
            .with_user_size(Some(SizeCandidate::preview_only(Resolution::new(640, 480))));
        let chosen = negotiator
            .negotiate(&supported, &display, SensorRotation::None)
            .unwrap();
        assert_eq!(chosen.preview, Resolution::new(640, 480));

        // Unsupported user size is ignored
        let negotiator = SizeNegotiator::default()
            .with_user_size(Some(SizeCandidate::preview_only(Resolution::new(800, 600))));
        let chosen = negotiator
            .negotiate(&supported, &display, SensorRotation::None)
            .unwrap();
        assert_eq!(chosen.preview, Resolution::new(1920, 1080));
    }
}
