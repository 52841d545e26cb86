// SPDX-License-Identifier: GPL-3.0-only

//! Detection workflow state machine
//!
//! Turns per-frame detection results into the states the scanning UI shows:
//!
//! ```text
//!  NotStarted ──► Detecting ◄──────────────────────────────┐
//!                   │   ▲                                   │
//!        candidate  │   │ no candidate at centre            │ reset()
//!        at centre  ▼   │                                   │
//!                 Confirming (too small)                    │
//!                   │                                       │
//!                   ├── big enough, delayed ──► Searching ──┤── timer ──► Searched
//!                   └── big enough ───────────► Detected ───┘
//! ```
//!
//! Once a result has been reached, further detections are ignored until the
//! collaborator calls [`WorkflowModel::reset`].

mod observers;

pub use observers::WorkflowSubscription;

use crate::app::frame_processor::{BoundingBox, Candidate, DetectionResult};
use crate::backends::camera::types::{Resolution, SensorRotation};
use crate::config::ScanPreferences;
use crate::constants::SEARCH_ANIMATION_DURATION;
use observers::Observers;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Scanning workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    NotStarted,
    Detecting,
    /// A barcode is centred but too small
    Confirming,
    /// Result found, searching animation running
    Searching,
    Detected,
    /// Searching animation finished
    Searched,
}

impl WorkflowState {
    /// Whether a result has been reached and new detections are ignored
    pub fn holds_result(&self) -> bool {
        matches!(self, Self::Searching | Self::Detected | Self::Searched)
    }

    /// Whether the camera preview should be frozen in this state
    pub fn freezes_preview(&self) -> bool {
        self.holds_result()
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Detecting => "detecting",
            Self::Confirming => "confirming",
            Self::Searching => "searching",
            Self::Detected => "detected",
            Self::Searched => "searched",
        };
        write!(f, "{}", name)
    }
}

/// Notification delivered to workflow subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StateChanged {
        from: WorkflowState,
        to: WorkflowState,
    },
    /// Emitted once per entry into `Detected` or `Searched`
    BarcodeDetected(Candidate),
}

/// Mapping from frame pixel space to view space
///
/// The frame is first rotated upright, then scaled independently on each
/// axis to the view size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub view: Resolution,
    /// Frame size as captured
    pub frame: Resolution,
    pub rotation: SensorRotation,
}

impl Viewport {
    pub fn new(view: Resolution, frame: Resolution, rotation: SensorRotation) -> Self {
        Self {
            view,
            frame,
            rotation,
        }
    }

    /// Viewport that shows the upright frame at its own size
    pub fn identity(frame: Resolution, rotation: SensorRotation) -> Self {
        let view = if rotation.swaps_dimensions() {
            frame.swapped()
        } else {
            frame
        };
        Self::new(view, frame, rotation)
    }

    pub fn upright_frame(&self) -> Resolution {
        if self.rotation.swaps_dimensions() {
            self.frame.swapped()
        } else {
            self.frame
        }
    }

    /// Exact centre of the view
    pub fn center(&self) -> (f32, f32) {
        (self.view.width as f32 / 2.0, self.view.height as f32 / 2.0)
    }

    /// Map a box from frame pixel space into view space
    pub fn translate(&self, bounds: &BoundingBox) -> BoundingBox {
        let w = self.frame.width as f32;
        let h = self.frame.height as f32;
        let rotate = |x: f32, y: f32| match self.rotation {
            SensorRotation::None => (x, y),
            SensorRotation::Rotate90 => (h - y, x),
            SensorRotation::Rotate180 => (w - x, h - y),
            SensorRotation::Rotate270 => (y, w - x),
        };
        let upright = BoundingBox::enclosing([
            rotate(bounds.left, bounds.top),
            rotate(bounds.right, bounds.bottom),
        ])
        .unwrap_or(*bounds);

        let frame = self.upright_frame();
        if frame.width == 0 || frame.height == 0 {
            return upright;
        }
        upright.scaled(
            self.view.width as f32 / frame.width as f32,
            self.view.height as f32 / frame.height as f32,
        )
    }
}

/// How close a candidate is to the required on-screen size, in `[0, 1]`
pub trait SizeProgress: Send {
    /// `bounds` is the candidate box in view space
    fn progress(&self, bounds: &BoundingBox, view: Resolution) -> f32;
}

impl<F> SizeProgress for F
where
    F: Fn(&BoundingBox, Resolution) -> f32 + Send,
{
    fn progress(&self, bounds: &BoundingBox, view: Resolution) -> f32 {
        self(bounds, view)
    }
}

/// Size requirement relative to the centred reticle box
#[derive(Debug, Clone)]
pub struct ReticleSizeCheck {
    prefs: ScanPreferences,
}

impl ReticleSizeCheck {
    pub fn new(prefs: ScanPreferences) -> Self {
        Self { prefs }
    }

    /// The reticle box, centred in the view
    pub fn reticle_box(&self, view: Resolution) -> BoundingBox {
        let width = view.width as f32 * self.prefs.reticle_width_percent as f32 / 100.0;
        let height = view.height as f32 * self.prefs.reticle_height_percent as f32 / 100.0;
        let cx = view.width as f32 / 2.0;
        let cy = view.height as f32 / 2.0;
        BoundingBox::new(
            cx - width / 2.0,
            cy - height / 2.0,
            cx + width / 2.0,
            cy + height / 2.0,
        )
    }
}

impl SizeProgress for ReticleSizeCheck {
    fn progress(&self, bounds: &BoundingBox, view: Resolution) -> f32 {
        if !self.prefs.enable_barcode_size_check {
            return 1.0;
        }
        let required = self.reticle_box(view).width()
            * self.prefs.minimum_barcode_width_percent as f32
            / 100.0;
        if required <= 0.0 {
            return 1.0;
        }
        (bounds.width() / required).min(1.0)
    }
}

/// The workflow state machine
pub struct WorkflowStateMachine {
    state: WorkflowState,
    delay_result: bool,
    size_progress: Box<dyn SizeProgress>,
    search_duration: Duration,
    /// Candidate and start time of the running searching animation
    searching: Option<(Candidate, Instant)>,
    detected: Option<Candidate>,
    /// View size, `None` to use the upright frame size
    view_size: Option<Resolution>,
    observers: Observers,
}

impl WorkflowStateMachine {
    pub fn new(prefs: &ScanPreferences) -> Self {
        Self {
            state: WorkflowState::NotStarted,
            delay_result: prefs.delay_loading_barcode_result,
            size_progress: Box::new(ReticleSizeCheck::new(prefs.clone())),
            search_duration: SEARCH_ANIMATION_DURATION,
            searching: None,
            detected: None,
            view_size: None,
            observers: Observers::default(),
        }
    }

    pub fn with_size_progress(mut self, size_progress: impl SizeProgress + 'static) -> Self {
        self.size_progress = Box::new(size_progress);
        self
    }

    pub fn with_delay_result(mut self, delay: bool) -> Self {
        self.delay_result = delay;
        self
    }

    pub fn with_search_duration(mut self, duration: Duration) -> Self {
        self.search_duration = duration;
        self
    }

    pub fn set_view_size(&mut self, view: Option<Resolution>) {
        self.view_size = view;
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Payload of the current result, cleared on reset
    pub fn detected_barcode(&self) -> Option<&Candidate> {
        self.detected.as_ref()
    }

    /// Register an event subscriber
    ///
    /// Events queue without bound until the subscription is drained or
    /// dropped. Subscribers that stop reading must drop their handle.
    pub fn subscribe(&mut self) -> WorkflowSubscription {
        self.observers.subscribe()
    }

    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn viewport_for(&self, result: &DetectionResult) -> Viewport {
        match self.view_size {
            Some(view) => Viewport::new(view, result.frame_size, result.rotation),
            None => Viewport::identity(result.frame_size, result.rotation),
        }
    }

    /// Feed one detection result
    pub fn on_detection(&mut self, result: &DetectionResult, now: Instant) -> WorkflowState {
        self.tick(now);
        if self.state.holds_result() {
            trace!(state = %self.state, "Ignoring detection while holding a result");
            return self.state;
        }
        // The first result opens the detection cycle
        if self.state == WorkflowState::NotStarted {
            self.transition(WorkflowState::Detecting);
        }

        let viewport = self.viewport_for(result);
        let (cx, cy) = viewport.center();
        let active = result
            .candidates
            .iter()
            .map(|c| (c, viewport.translate(&c.bounds)))
            .find(|(_, bounds)| bounds.contains(cx, cy));

        let Some((candidate, bounds)) = active else {
            self.transition(WorkflowState::Detecting);
            return self.state;
        };

        let progress = self.size_progress.progress(&bounds, viewport.view);
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        trace!(raw = %candidate.raw, progress, "Active candidate");

        if progress < 1.0 {
            self.transition(WorkflowState::Confirming);
        } else if self.delay_result {
            self.searching = Some((candidate.clone(), now));
            self.transition(WorkflowState::Searching);
        } else {
            self.enter_result(WorkflowState::Detected, candidate.clone());
        }
        self.state
    }

    /// Advance time based transitions
    pub fn tick(&mut self, now: Instant) -> WorkflowState {
        if self.state != WorkflowState::Searching {
            return self.state;
        }
        let finished = self
            .searching
            .as_ref()
            .is_some_and(|(_, since)| now.saturating_duration_since(*since) >= self.search_duration);
        if finished {
            if let Some((candidate, _)) = self.searching.take() {
                self.enter_result(WorkflowState::Searched, candidate);
            }
        }
        self.state
    }

    /// Return to `Detecting`, dropping any held result
    pub fn reset(&mut self) {
        self.searching = None;
        self.detected = None;
        self.transition(WorkflowState::Detecting);
    }

    fn enter_result(&mut self, state: WorkflowState, candidate: Candidate) {
        info!(raw = %candidate.raw, kind = candidate.value.kind(), "Barcode detected");
        self.detected = Some(candidate.clone());
        self.transition(state);
        self.observers
            .publish(&WorkflowEvent::BarcodeDetected(candidate));
    }

    fn transition(&mut self, to: WorkflowState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!(%from, %to, "Workflow state changed");
        self.observers
            .publish(&WorkflowEvent::StateChanged { from, to });
    }
}

/// Shared handle to a [`WorkflowStateMachine`]
///
/// Cloned into the detection processor and held by the UI collaborator.
#[derive(Clone)]
pub struct WorkflowModel {
    inner: Arc<Mutex<WorkflowStateMachine>>,
}

impl WorkflowModel {
    pub fn new(machine: WorkflowStateMachine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(machine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowStateMachine> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an event subscriber
    ///
    /// The queue is unbounded: a subscription that is never drained grows
    /// with every transition until it is dropped.
    pub fn subscribe(&self) -> WorkflowSubscription {
        self.lock().subscribe()
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.lock().unsubscribe(id)
    }

    pub fn on_detection(&self, result: &DetectionResult) -> WorkflowState {
        self.lock().on_detection(result, Instant::now())
    }

    pub fn tick(&self, now: Instant) -> WorkflowState {
        self.lock().tick(now)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn state(&self) -> WorkflowState {
        self.lock().state()
    }

    pub fn detected_barcode(&self) -> Option<Candidate> {
        self.lock().detected_barcode().cloned()
    }

    pub fn set_view_size(&self, view: Option<Resolution>) {
        self.lock().set_view_size(view);
    }
}
