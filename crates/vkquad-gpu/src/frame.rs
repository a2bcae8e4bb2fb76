//! Per-frame presentation state machine.
//!
//! One call to [`FramePresenter::render_frame`] runs
//! `WAIT_SLOT -> ACQUIRE -> RECORD -> SUBMIT -> PRESENT -> ADVANCE`, rebuilding the
//! swapchain when it goes stale. The device work behind each step lives in a
//! [`FrameBackend`], so the sequencing can be exercised without a GPU.

use crate::error::{GpuError, Result};
use std::time::{Duration, Instant};

/// Upper bound on a single fence wait. Longer waits loop.
const FENCE_POLL_SLICE: Duration = Duration::from_millis(100);

/// Round-robin index over the frame slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    count: usize,
}

impl FrameCursor {
    /// Cursor over `count` slots, starting at slot 0. A count of zero is treated as one.
    pub const fn new(count: usize) -> Self {
        Self {
            current: 0,
            count: if count == 0 { 1 } else { count },
        }
    }

    /// The slot the next frame uses.
    pub const fn current(&self) -> usize {
        self.current
    }

    /// Number of slots.
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Move to the next slot, wrapping.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

/// Result of one bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    NotReady,
}

/// Result of asking the swapchain for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired and the swapchain matches the surface.
    Acquired(u32),
    /// An image was acquired but the swapchain no longer matches the surface exactly.
    Suboptimal(u32),
    /// No image was acquired; the swapchain must be rebuilt.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The image was queued but the swapchain is out of date or suboptimal.
    Stale,
}

/// Why a frame was abandoned before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleCause {
    OutOfDate,
    Suboptimal,
    Resized,
}

/// What happened during one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented.
    Presented,
    /// The frame was presented, then the swapchain was rebuilt.
    PresentedThenRebuilt,
    /// The swapchain was rebuilt and nothing was submitted.
    Skipped(StaleCause),
}

/// Device operations the presenter sequences.
///
/// `slot` is always in `0..frames_in_flight`.
pub trait FrameBackend {
    /// Wait up to `timeout` for the slot's fence.
    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<FenceStatus>;

    /// Return the slot's fence to the unsignaled state.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Reset and re-record the slot's command buffer against `image_index`.
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Submit the slot's command buffer, signaling its fence on completion.
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Present `image_index` once the slot's rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Idle the device and replace the swapchain with a new generation.
    fn rebuild_swapchain(&mut self) -> Result<()>;

    /// Replace the slot's image-available semaphore. Called only while the device is idle.
    fn recycle_image_semaphore(&mut self, slot: usize) -> Result<()>;
}

/// Presenter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterConfig {
    /// Number of frame slots.
    pub frames_in_flight: usize,
    /// Total time a fence wait may take before the device is considered lost.
    /// `None` waits forever.
    pub fence_timeout: Option<Duration>,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: vkquad_core::constants::MAX_FRAMES_IN_FLIGHT,
            fence_timeout: None,
        }
    }
}

/// Drives frames through a [`FrameBackend`].
#[derive(Debug)]
pub struct FramePresenter {
    cursor: FrameCursor,
    resized: bool,
    fence_timeout: Option<Duration>,
}

impl FramePresenter {
    pub const fn new(config: PresenterConfig) -> Self {
        Self {
            cursor: FrameCursor::new(config.frames_in_flight),
            resized: false,
            fence_timeout: config.fence_timeout,
        }
    }

    /// Record that the window changed size. The next frame rebuilds the swapchain.
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    /// Whether a resize is waiting to be handled.
    pub const fn resize_pending(&self) -> bool {
        self.resized
    }

    pub const fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    /// Render one frame. The cursor advances whatever the outcome.
    pub fn render_frame<B: FrameBackend>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let slot = self.cursor.current();
        let outcome = self.run_frame(backend, slot);
        self.cursor.advance();
        outcome
    }

    fn run_frame<B: FrameBackend>(&mut self, backend: &mut B, slot: usize) -> Result<FrameOutcome> {
        {
            let _span = tracing::trace_span!("wait_slot", slot).entered();
            self.wait_for_slot(backend, slot)?;
        }

        // Checked before acquiring so no image-available semaphore is left signaled
        if self.resized {
            tracing::debug!("Window resized, rebuilding swapchain");
            self.rebuild(backend)?;
            return Ok(FrameOutcome::Skipped(StaleCause::Resized));
        }

        let image_index = {
            let _span = tracing::trace_span!("acquire", slot).entered();
            match backend.acquire_image(slot)? {
                AcquireOutcome::Acquired(index) => index,
                AcquireOutcome::Suboptimal(index) => {
                    tracing::debug!("Acquired image {} is suboptimal, rebuilding swapchain", index);
                    self.rebuild(backend)?;
                    // The abandoned acquire left the semaphore signaled
                    backend.recycle_image_semaphore(slot)?;
                    return Ok(FrameOutcome::Skipped(StaleCause::Suboptimal));
                }
                AcquireOutcome::OutOfDate => {
                    tracing::debug!("Swapchain out of date at acquire, rebuilding");
                    self.rebuild(backend)?;
                    return Ok(FrameOutcome::Skipped(StaleCause::OutOfDate));
                }
            }
        };

        // Only reset once submission is certain, otherwise the fence never signals again
        backend.reset_slot(slot)?;

        {
            let _span = tracing::trace_span!("record", slot, image_index).entered();
            backend.record(slot, image_index)?;
        }

        {
            let _span = tracing::trace_span!("submit", slot).entered();
            backend.submit(slot)?;
        }

        let presented = {
            let _span = tracing::trace_span!("present", slot, image_index).entered();
            backend.present(slot, image_index)?
        };

        match presented {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented),
            PresentOutcome::Stale => {
                tracing::debug!("Swapchain stale at present, rebuilding");
                self.rebuild(backend)?;
                Ok(FrameOutcome::PresentedThenRebuilt)
            }
        }
    }

    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B) -> Result<()> {
        self.resized = false;
        backend.rebuild_swapchain()
    }

    fn wait_for_slot<B: FrameBackend>(&self, backend: &mut B, slot: usize) -> Result<()> {
        let start = Instant::now();
        loop {
            let slice = match self.fence_timeout {
                None => FENCE_POLL_SLICE,
                Some(limit) => {
                    let remaining = limit.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(GpuError::DeviceLost(format!(
                            "frame slot {slot} fence not signaled after {limit:?}"
                        )));
                    }
                    remaining.min(FENCE_POLL_SLICE)
                }
            };

            match backend.wait_for_slot(slot, slice)? {
                FenceStatus::Signaled => return Ok(()),
                FenceStatus::NotReady => {
                    tracing::trace!("Frame slot {} still in flight", slot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Rebuild,
        Recycle(usize),
    }

    /// Scripted backend. Unscripted calls succeed.
    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        fences: VecDeque<FenceStatus>,
        acquires: VecDeque<Result<AcquireOutcome>>,
        presents: VecDeque<PresentOutcome>,
        always_not_ready: bool,
        generation: u64,
        next_image: u32,
    }

    impl MockBackend {
        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn submits(&self) -> usize {
            self.count(|c| matches!(c, Call::Submit(_)))
        }

        fn presents(&self) -> usize {
            self.count(|c| matches!(c, Call::Present(..)))
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_slot(&mut self, slot: usize, _timeout: Duration) -> Result<FenceStatus> {
            self.calls.push(Call::Wait(slot));
            if self.always_not_ready {
                return Ok(FenceStatus::NotReady);
            }
            Ok(self.fences.pop_front().unwrap_or(FenceStatus::Signaled))
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            self.acquires.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                Ok(AcquireOutcome::Acquired(index))
            })
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn rebuild_swapchain(&mut self) -> Result<()> {
            self.calls.push(Call::Rebuild);
            self.generation += 1;
            Ok(())
        }

        fn recycle_image_semaphore(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Recycle(slot));
            Ok(())
        }
    }

    fn presenter(frames_in_flight: usize) -> FramePresenter {
        FramePresenter::new(PresenterConfig {
            frames_in_flight,
            fence_timeout: None,
        })
    }

    #[test]
    fn cursor_visits_every_slot_once_per_cycle() {
        for n in 2..=5 {
            let mut cursor = FrameCursor::new(n);
            let visited: Vec<usize> = (0..n)
                .map(|_| {
                    let slot = cursor.current();
                    cursor.advance();
                    slot
                })
                .collect();
            assert_eq!(visited, (0..n).collect::<Vec<_>>());
            assert_eq!(cursor.current(), 0);
        }
    }

    #[test]
    fn zero_slots_behaves_as_one() {
        let mut cursor = FrameCursor::new(0);
        assert_eq!(cursor.count(), 1);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn normal_frame_sequence() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend::default();

        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(presenter.cursor().current(), 1);
    }

    #[test]
    fn frames_rotate_through_slots() {
        let mut presenter = presenter(3);
        let mut backend = MockBackend::default();

        for _ in 0..6 {
            presenter.render_frame(&mut backend).unwrap();
        }

        let waited: Vec<usize> = backend
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait(slot) => Some(*slot),
                _ => None,
            })
            .collect();
        assert_eq!(waited, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn unsignaled_fence_is_waited_on_again() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            fences: VecDeque::from([FenceStatus::NotReady, FenceStatus::Signaled]),
            ..Default::default()
        };

        presenter.render_frame(&mut backend).unwrap();

        assert_eq!(&backend.calls[..3], &[Call::Wait(0), Call::Wait(0), Call::Acquire(0)]);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_and_skips() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(AcquireOutcome::OutOfDate)]),
            ..Default::default()
        };

        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped(StaleCause::OutOfDate));
        assert_eq!(backend.generation, 1);
        assert_eq!(backend.submits(), 0);
        assert_eq!(backend.presents(), 0);
        // Fence stays signaled for the slot's next use
        assert_eq!(backend.count(|c| matches!(c, Call::Reset(_))), 0);
        assert_eq!(presenter.cursor().current(), 1);
    }

    #[test]
    fn suboptimal_acquire_recycles_semaphore_after_rebuild() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            acquires: VecDeque::from([Ok(AcquireOutcome::Suboptimal(1))]),
            ..Default::default()
        };

        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped(StaleCause::Suboptimal));
        assert_eq!(
            backend.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild, Call::Recycle(0)]
        );
        assert_eq!(backend.generation, 1);
    }

    #[test]
    fn resize_rebuilds_before_acquiring() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend::default();

        presenter.notify_resized();
        assert!(presenter.resize_pending());
        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped(StaleCause::Resized));
        assert_eq!(backend.calls, vec![Call::Wait(0), Call::Rebuild]);
        assert!(!presenter.resize_pending());

        // Next frame renders normally from the following slot
        let outcome = presenter.render_frame(&mut backend).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(backend.generation, 1);
    }

    #[test]
    fn stale_present_rebuilds_after_presenting() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            presents: VecDeque::from([PresentOutcome::Stale]),
            ..Default::default()
        };

        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(outcome, FrameOutcome::PresentedThenRebuilt);
        assert_eq!(backend.calls.last(), Some(&Call::Rebuild));
        assert_eq!(backend.submits(), 1);
        assert_eq!(backend.generation, 1);
    }

    #[test]
    fn repeated_staleness_bumps_generation_each_time() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            acquires: VecDeque::from([
                Ok(AcquireOutcome::OutOfDate),
                Ok(AcquireOutcome::OutOfDate),
            ]),
            ..Default::default()
        };

        presenter.render_frame(&mut backend).unwrap();
        presenter.render_frame(&mut backend).unwrap();
        let outcome = presenter.render_frame(&mut backend).unwrap();

        assert_eq!(backend.generation, 2);
        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(presenter.cursor().current(), 1);
    }

    #[test]
    fn acquire_failure_is_fatal_but_advances() {
        let mut presenter = presenter(2);
        let mut backend = MockBackend {
            acquires: VecDeque::from([Err(GpuError::Presentation("surface lost".into()))]),
            ..Default::default()
        };

        let err = presenter.render_frame(&mut backend).unwrap_err();

        assert!(matches!(err, GpuError::Presentation(_)));
        assert_eq!(backend.submits(), 0);
        assert_eq!(presenter.cursor().current(), 1);
    }

    #[test]
    fn fence_timeout_reports_device_lost() {
        let mut presenter = FramePresenter::new(PresenterConfig {
            frames_in_flight: 2,
            fence_timeout: Some(Duration::from_millis(1)),
        });
        let mut backend = MockBackend {
            always_not_ready: true,
            ..Default::default()
        };

        let err = presenter.render_frame(&mut backend).unwrap_err();

        assert!(matches!(err, GpuError::DeviceLost(_)));
        assert_eq!(backend.count(|c| matches!(c, Call::Acquire(_))), 0);
    }

    #[test]
    fn default_config_uses_constant_slot_count() {
        let presenter = FramePresenter::new(PresenterConfig::default());
        assert_eq!(
            presenter.cursor().count(),
            vkquad_core::constants::MAX_FRAMES_IN_FLIGHT
        );
    }
}
