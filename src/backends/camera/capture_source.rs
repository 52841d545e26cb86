// SPDX-License-Identifier: GPL-3.0-only

//! Capture source lifecycle
//!
//! A [`CaptureSource`] owns a [`CaptureDevice`] and everything needed to get
//! its frames to a [`FrameProcessor`]: the buffer pool, the latest-wins
//! frame channel and the processing thread.
//!
//! ```text
//!          start()            stop()
//!   Idle ──────────► Streaming ──────► Stopped
//!    │   (Opening)      ▲                 │
//!    │                  └─────────────────┘ start()
//!    │ release()                           │ release()
//!    └──────────────► Released ◄───────────┘
//! ```

use super::buffer_pool::{BufferPool, PoolStats};
use super::device_lock::DeviceLockGuard;
use super::frame_channel::{ChannelStats, FrameChannel, PublishOutcome};
use super::frame_loop::{FrameLoopController, FrameProcessor, ProcessorSlot};
use super::types::{CameraFrame, Resolution, StreamConfig};
use super::CaptureDevice;
use crate::app::format_picker::{DisplayConstraints, SizeNegotiator};
use crate::constants::{
    DEVICE_LOCK_TIMEOUT, FRAME_BUFFER_COUNT, MIN_FRAME_BUFFER_COUNT, PROCESSOR_IDLE_TICK,
    REQUESTED_CAMERA_FPS, SHUTDOWN_TIMEOUT,
};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a [`CaptureSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    /// Device is being opened
    Opening,
    Streaming,
    Stopped,
    /// Terminal
    Released,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
            Self::Released => "released",
        };
        write!(f, "{}", name)
    }
}

/// Entry point for frames coming from a device callback
///
/// Cheap to clone; each clone feeds the same channel and shares the
/// sequence counter.
#[derive(Clone)]
pub struct FrameSink {
    config: StreamConfig,
    pool: Arc<BufferPool>,
    channel: Arc<FrameChannel>,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub fn new(
        config: StreamConfig,
        pool: Arc<BufferPool>,
        channel: Arc<FrameChannel>,
    ) -> Self {
        Self {
            config,
            pool,
            channel,
            sequence: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stream configuration the device was opened with
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Copy a captured image into a pooled buffer and publish it
    ///
    /// `stride` is the row stride of the first plane; `None` means tightly
    /// packed. Returns `None` when the pool had no free buffer and the frame
    /// was dropped.
    pub fn submit(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        stride: Option<u32>,
    ) -> Option<PublishOutcome> {
        let Some(mut buffer) = self.pool.acquire(data.len()) else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "Buffer pool exhausted, dropping frame");
            return None;
        };
        buffer.fill_from(data);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut frame = CameraFrame::new(
            buffer,
            width,
            height,
            self.config.format,
            self.config.rotation,
            sequence,
        );
        if let Some(stride) = stride {
            frame = frame.with_stride(stride);
        }
        Some(self.channel.publish(frame))
    }

    /// Frames dropped because the pool was exhausted
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Frame source bound to one capture device
pub struct CaptureSource {
    device: Box<dyn CaptureDevice>,
    state: CaptureState,
    display: DisplayConstraints,
    negotiator: SizeNegotiator,
    pool: Arc<BufferPool>,
    channel: Arc<FrameChannel>,
    processor: ProcessorSlot,
    worker: Option<FrameLoopController>,
    lock_guard: Option<DeviceLockGuard>,
    stream: Option<StreamConfig>,
    sink: Option<FrameSink>,
    lock_timeout: Duration,
    shutdown_timeout: Duration,
}

impl CaptureSource {
    pub fn new(device: Box<dyn CaptureDevice>, display: DisplayConstraints) -> Self {
        Self {
            device,
            state: CaptureState::Idle,
            display,
            negotiator: SizeNegotiator::default(),
            pool: BufferPool::new(FRAME_BUFFER_COUNT),
            channel: Arc::new(FrameChannel::new()),
            processor: Arc::new(Mutex::new(None)),
            worker: None,
            lock_guard: None,
            stream: None,
            sink: None,
            lock_timeout: DEVICE_LOCK_TIMEOUT,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_negotiator(mut self, negotiator: SizeNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Size of the frame buffer pool, raised to [`MIN_FRAME_BUFFER_COUNT`]
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        if count < MIN_FRAME_BUFFER_COUNT {
            warn!(count, min = MIN_FRAME_BUFFER_COUNT, "Too few frame buffers, using minimum");
        }
        self.pool = BufferPool::new(count.max(MIN_FRAME_BUFFER_COUNT));
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Preview size of the current (or last) stream
    pub fn preview_size(&self) -> Option<Resolution> {
        self.stream.map(|s| s.size.preview)
    }

    pub fn stream_config(&self) -> Option<StreamConfig> {
        self.stream
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.channel.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Frames dropped at the sink because no buffer was free
    pub fn dropped_frames(&self) -> u64 {
        self.sink.as_ref().map(|s| s.dropped_frames()).unwrap_or(0)
    }

    /// Open the device and start streaming frames to the processor
    pub fn start(&mut self) -> CaptureResult<()> {
        let previous = self.state;
        match previous {
            CaptureState::Released => return Err(CaptureError::Released),
            CaptureState::Streaming | CaptureState::Opening => {
                debug!(state = %previous, "Capture source already started");
                return Ok(());
            }
            CaptureState::Idle | CaptureState::Stopped => {}
        }

        self.state = CaptureState::Opening;
        match self.open_and_stream() {
            Ok(config) => {
                info!(device = %self.device.describe().name, stream = %config, "Capture started");
                self.stream = Some(config);
                self.state = CaptureState::Streaming;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to start capture");
                self.lock_guard = None;
                self.state = previous;
                Err(e)
            }
        }
    }

    fn open_and_stream(&mut self) -> CaptureResult<StreamConfig> {
        let info = self.device.describe();
        let supported = self.device.supported_sizes();
        let size = self
            .negotiator
            .negotiate(&supported, &self.display, info.sensor_orientation)
            .ok_or_else(|| {
                CaptureError::Setup(format!("camera '{}' reports no preview sizes", info.name))
            })?;

        let config = StreamConfig {
            size,
            format: self.device.preferred_format(),
            fps: REQUESTED_CAMERA_FPS,
            rotation: info
                .sensor_orientation
                .relative_to_display(self.display.rotation, info.facing),
        };

        let guard = self
            .device
            .lock()
            .try_acquire_for(self.lock_timeout)
            .ok_or(CaptureError::DeviceBusy(self.lock_timeout))?;

        self.device.open(&config)?;

        if let Err(e) = self.ensure_worker() {
            self.device.close();
            return Err(e);
        }

        let sink = FrameSink::new(config, Arc::clone(&self.pool), Arc::clone(&self.channel));
        if let Err(e) = self.device.start_stream(sink.clone()) {
            self.device.close();
            return Err(e);
        }

        self.sink = Some(sink);
        self.lock_guard = Some(guard);
        Ok(config)
    }

    fn ensure_worker(&mut self) -> CaptureResult<()> {
        if self.worker.as_ref().is_some_and(|w| w.is_running()) {
            return Ok(());
        }
        let worker = FrameLoopController::start(
            "frame-processor",
            Arc::clone(&self.channel),
            Arc::clone(&self.processor),
            PROCESSOR_IDLE_TICK,
        )?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop streaming and close the device
    ///
    /// The processing thread keeps running so a later `start` is cheap.
    pub fn stop(&mut self) -> CaptureResult<()> {
        if self.state != CaptureState::Streaming {
            debug!(state = %self.state, "Capture source not streaming, nothing to stop");
            return Ok(());
        }

        self.device.stop_stream();
        self.device.close();
        self.lock_guard = None;
        if self.channel.drain() {
            trace!("Discarded pending frame on stop");
        }
        self.state = CaptureState::Stopped;
        info!("Capture stopped");
        Ok(())
    }

    /// Release every resource held by the source
    ///
    /// Terminal and idempotent. Returns [`CaptureError::ShutdownTimeout`] if
    /// the processing thread did not exit in time.
    pub fn release(&mut self) -> CaptureResult<()> {
        if self.state == CaptureState::Released {
            return Ok(());
        }

        self.stop()?;
        self.channel.close();

        let mut result = Ok(());
        if let Some(mut worker) = self.worker.take() {
            result = worker.shutdown(self.shutdown_timeout);
        }

        match &result {
            Ok(()) => {
                let old = self
                    .processor
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                if let Some(mut processor) = old {
                    processor.stop();
                }
            }
            Err(e) => {
                // The leaked thread may still hold the processor
                error!(error = %e, "Processing thread leaked, processor not stopped");
            }
        }

        let stats = self.pool.stats();
        if stats.in_use > 0 && result.is_ok() {
            warn!(in_use = stats.in_use, "Frame buffers not returned to pool on release");
        }

        self.sink = None;
        self.state = CaptureState::Released;
        info!("Capture source released");
        result
    }

    /// Install the processor that receives every processed frame
    ///
    /// Waits for a `process` call in flight on the old processor to return,
    /// then stops the old processor.
    pub fn set_frame_processor(&self, processor: Box<dyn FrameProcessor>) -> CaptureResult<()> {
        if self.state == CaptureState::Released {
            return Err(CaptureError::Released);
        }

        let old = self
            .processor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(processor);
        if let Some(mut old) = old {
            debug!("Stopping replaced frame processor");
            old.stop();
        }
        Ok(())
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if self.state != CaptureState::Released {
            debug!("CaptureSource dropped, releasing");
            if let Err(e) = self.release() {
                error!(error = %e, "Failed to release capture source on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::device_lock::DeviceLock;
    use crate::backends::camera::types::{
        CameraDevice, LensFacing, PixelFormat, SensorRotation, SizeCandidate,
    };
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::thread;
    use std::time::Instant;

    #[derive(Default)]
    struct DeviceLog {
        opened: AtomicU32,
        closed: AtomicU32,
        sink: Mutex<Option<FrameSink>>,
    }

    struct FakeDevice {
        sizes: Vec<SizeCandidate>,
        lock: Arc<DeviceLock>,
        log: Arc<DeviceLog>,
        fail_open: bool,
    }

    impl FakeDevice {
        fn new(lock: Arc<DeviceLock>, log: Arc<DeviceLog>) -> Self {
            Self {
                sizes: vec![
                    SizeCandidate::preview_only(Resolution::new(640, 480)),
                    SizeCandidate::preview_only(Resolution::new(1280, 720)),
                ],
                lock,
                log,
                fail_open: false,
            }
        }
    }

    impl CaptureDevice for FakeDevice {
        fn describe(&self) -> CameraDevice {
            CameraDevice {
                id: "fake0".into(),
                name: "Fake camera".into(),
                facing: LensFacing::Back,
                sensor_orientation: SensorRotation::Rotate90,
            }
        }

        fn supported_sizes(&self) -> Vec<SizeCandidate> {
            self.sizes.clone()
        }

        fn preferred_format(&self) -> PixelFormat {
            PixelFormat::Gray8
        }

        fn lock(&self) -> Arc<DeviceLock> {
            Arc::clone(&self.lock)
        }

        fn open(&mut self, _config: &StreamConfig) -> CaptureResult<()> {
            if self.fail_open {
                return Err(CaptureError::Setup("open failed".into()));
            }
            self.log.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn start_stream(&mut self, sink: FrameSink) -> CaptureResult<()> {
            *self.log.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop_stream(&mut self) {
            self.log.sink.lock().unwrap().take();
        }

        fn close(&mut self) {
            self.log.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Recorder {
        frames: Arc<Mutex<Vec<(u64, SensorRotation)>>>,
        stopped: Arc<AtomicBool>,
    }

    impl FrameProcessor for Recorder {
        fn process(&mut self, frame: &CameraFrame) {
            self.frames.lock().unwrap().push((frame.sequence, frame.rotation));
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn recorder() -> (Recorder, Arc<Mutex<Vec<(u64, SensorRotation)>>>, Arc<AtomicBool>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));
        (
            Recorder {
                frames: Arc::clone(&frames),
                stopped: Arc::clone(&stopped),
            },
            frames,
            stopped,
        )
    }

    fn source() -> (CaptureSource, Arc<DeviceLog>, Arc<DeviceLock>) {
        let lock = DeviceLock::new();
        let log = Arc::new(DeviceLog::default());
        let device = FakeDevice::new(Arc::clone(&lock), Arc::clone(&log));
        // Portrait display on a sensor mounted a quarter turn off
        let display = DisplayConstraints::new(1080, 1920, SensorRotation::None);
        let source = CaptureSource::new(Box::new(device), display)
            .with_lock_timeout(Duration::from_millis(50));
        (source, log, lock)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_start_streams_frames_to_processor() {
        let (mut source, log, lock) = source();
        let (processor, frames, _) = recorder();
        source.set_frame_processor(Box::new(processor)).unwrap();

        source.start().unwrap();
        assert_eq!(source.state(), CaptureState::Streaming);
        assert_eq!(source.preview_size(), Some(Resolution::new(1280, 720)));
        assert!(lock.is_held());

        let sink = log.sink.lock().unwrap().clone().unwrap();
        assert_eq!(sink.submit(&[0u8; 16], 4, 4, None), Some(PublishOutcome::Delivered));
        wait_until(|| frames.lock().unwrap().len() == 1);
        assert_eq!(frames.lock().unwrap()[0], (0, SensorRotation::Rotate90));

        source.release().unwrap();
    }

    #[test]
    fn test_start_is_noop_while_streaming() {
        let (mut source, log, _) = source();
        source.start().unwrap();
        source.start().unwrap();
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_then_restart() {
        let (mut source, log, lock) = source();
        source.start().unwrap();
        source.stop().unwrap();
        assert_eq!(source.state(), CaptureState::Stopped);
        assert!(!lock.is_held());
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);

        // Stop outside Streaming is a no-op
        source.stop().unwrap();
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);

        source.start().unwrap();
        assert_eq!(source.state(), CaptureState::Streaming);
        assert_eq!(log.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_busy_device_reports_device_busy() {
        let (mut source, _, lock) = source();
        let _other = lock.try_acquire_for(Duration::ZERO).unwrap();

        assert_eq!(
            source.start(),
            Err(CaptureError::DeviceBusy(Duration::from_millis(50)))
        );
        assert_eq!(source.state(), CaptureState::Idle);
    }

    #[test]
    fn test_no_sizes_is_setup_error() {
        let lock = DeviceLock::new();
        let mut device = FakeDevice::new(Arc::clone(&lock), Arc::new(DeviceLog::default()));
        device.sizes.clear();
        let mut source = CaptureSource::new(Box::new(device), DisplayConstraints::default());

        assert!(matches!(source.start(), Err(CaptureError::Setup(_))));
        assert_eq!(source.state(), CaptureState::Idle);
        assert!(!lock.is_held());
    }

    #[test]
    fn test_failed_open_releases_lock() {
        let lock = DeviceLock::new();
        let mut device = FakeDevice::new(Arc::clone(&lock), Arc::new(DeviceLog::default()));
        device.fail_open = true;
        let mut source = CaptureSource::new(Box::new(device), DisplayConstraints::default());

        assert!(matches!(source.start(), Err(CaptureError::Setup(_))));
        assert!(!lock.is_held());
    }

    #[test]
    fn test_release_is_terminal_and_idempotent() {
        let (mut source, _, lock) = source();
        let (processor, _, stopped) = recorder();
        source.set_frame_processor(Box::new(processor)).unwrap();
        source.start().unwrap();

        source.release().unwrap();
        assert_eq!(source.state(), CaptureState::Released);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!lock.is_held());
        assert_eq!(source.pool_stats().in_use, 0);

        source.release().unwrap();
        assert_eq!(source.start(), Err(CaptureError::Released));
        let (again, _, _) = recorder();
        assert_eq!(
            source.set_frame_processor(Box::new(again)),
            Err(CaptureError::Released)
        );
    }

    #[test]
    fn test_swapping_processor_stops_old_one() {
        let (source, _, _) = source();
        let (first, _, first_stopped) = recorder();
        let (second, _, second_stopped) = recorder();

        source.set_frame_processor(Box::new(first)).unwrap();
        source.set_frame_processor(Box::new(second)).unwrap();
        assert!(first_stopped.load(Ordering::SeqCst));
        assert!(!second_stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sink_drops_frame_when_pool_exhausted() {
        let config = StreamConfig {
            size: SizeCandidate::preview_only(Resolution::new(2, 2)),
            format: PixelFormat::Gray8,
            fps: 30,
            rotation: SensorRotation::None,
        };
        let pool = BufferPool::new(1);
        let channel = Arc::new(FrameChannel::new());
        let sink = FrameSink::new(config, Arc::clone(&pool), Arc::clone(&channel));

        assert_eq!(sink.submit(&[1, 2, 3, 4], 2, 2, None), Some(PublishOutcome::Delivered));
        // The only buffer is still waiting in the channel
        assert_eq!(sink.submit(&[1, 2, 3, 4], 2, 2, None), None);
        assert_eq!(sink.dropped_frames(), 1);
        assert_eq!(pool.stats().exhausted, 1);

        let frame = channel.take_next().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert_eq!(frame.sequence, 0);
    }

    #[test]
    fn test_buffer_count_is_raised_to_minimum() {
        let (source, _, _) = source();
        let source = source.with_buffer_count(2);
        assert_eq!(source.pool_stats().capacity, MIN_FRAME_BUFFER_COUNT);

        let source = source.with_buffer_count(6);
        assert_eq!(source.pool_stats().capacity, 6);
    }

    #[test]
    fn test_newest_frame_wins_while_consumer_holds_one() {
        let config = StreamConfig {
            size: SizeCandidate::preview_only(Resolution::new(2, 2)),
            format: PixelFormat::Gray8,
            fps: 30,
            rotation: SensorRotation::None,
        };
        let pool = BufferPool::new(MIN_FRAME_BUFFER_COUNT);
        let channel = Arc::new(FrameChannel::new());
        let sink = FrameSink::new(config, Arc::clone(&pool), Arc::clone(&channel));

        assert_eq!(sink.submit(&[0; 4], 2, 2, None), Some(PublishOutcome::Delivered));
        let held = channel.take_next().unwrap();

        assert_eq!(sink.submit(&[1; 4], 2, 2, None), Some(PublishOutcome::Delivered));
        assert_eq!(sink.submit(&[2; 4], 2, 2, None), Some(PublishOutcome::Replaced));
        assert_eq!(sink.dropped_frames(), 0);

        let next = channel.take_next().unwrap();
        assert_eq!(next.sequence, 2);
        assert_eq!(next.data(), &[2; 4]);
        assert_eq!(held.sequence, 0);
    }

    struct Slow {
        entered: std::sync::mpsc::Sender<u64>,
        finished: Arc<AtomicBool>,
        delay: Duration,
    }

    impl FrameProcessor for Slow {
        fn process(&mut self, frame: &CameraFrame) {
            let _ = self.entered.send(frame.sequence);
            thread::sleep(self.delay);
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_swap_waits_for_in_flight_frame() {
        let (mut source, log, _) = source();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        source
            .set_frame_processor(Box::new(Slow {
                entered: entered_tx,
                finished: Arc::clone(&finished),
                delay: Duration::from_millis(200),
            }))
            .unwrap();
        source.start().unwrap();

        let sink = log.sink.lock().unwrap().clone().unwrap();
        sink.submit(&[0u8; 16], 4, 4, None);
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(5)), Ok(0));

        // Swap from another thread while frame 0 is being processed
        let (replacement, frames, _) = recorder();
        let swapper = thread::spawn(move || {
            let started = Instant::now();
            source.set_frame_processor(Box::new(replacement)).unwrap();
            (source, started.elapsed())
        });
        let (mut source, waited) = swapper.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert!(waited >= Duration::from_millis(100), "swap returned after {:?}", waited);

        sink.submit(&[0u8; 16], 4, 4, None);
        wait_until(|| !frames.lock().unwrap().is_empty());
        assert_eq!(frames.lock().unwrap()[0].0, 1);
        assert!(entered_rx.try_recv().is_err());

        source.release().unwrap();
    }
}
