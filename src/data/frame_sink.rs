//! Bounded frame hand-off between the camera delivery thread and the controller.
//!
//! The camera driver owns a background delivery thread that invokes a callback
//! for every frame at its own cadence. That callback must never block, so the
//! hand-off is a lock-free single-producer/single-consumer ring:
//!
//! - [`FrameHandler`] is the producer half. It is moved into the driver callback
//!   and is the only writer.
//! - [`FrameSink`] is the consumer half. It stays with the acquisition controller,
//!   which arms it, polls [`FrameSink::is_ready`] and drains it.
//!
//! # Drop-on-full
//!
//! The ring has a fixed capacity equal to the batch size N. Frames that arrive
//! while the sink is disarmed or already holds N frames are dropped without
//! error. Overruns are counted and exposed through [`FrameSink::dropped_frames`].
//!
//! # Frame leases
//!
//! Every frame arrives as a driver [`FrameLease`]. The handler wraps it in a
//! guard that releases the lease when `handle` returns, on every path.
//!
//! # Live preview
//!
//! Independently of the capture buffer, the most recent frame is published on a
//! `tokio::sync::watch` slot (non-blocking `send_replace` on the producer side)
//! and read back with [`FrameSink::latest_frame`].

use crate::data::frame::{CropWindow, Frame};
use crate::hardware::capabilities::FrameLease;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// State shared between the producer and consumer halves.
#[derive(Debug, Default)]
struct SinkShared {
    started: AtomicBool,
    overruns: AtomicU64,
    delivered: AtomicU64,
}

/// Releases the wrapped lease when dropped.
struct ReleaseOnDrop<L: FrameLease>(L);

impl<L: FrameLease> Deref for ReleaseOnDrop<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.0
    }
}

impl<L: FrameLease> Drop for ReleaseOnDrop<L> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Producer half of the sink, owned by the camera delivery thread.
pub struct FrameHandler {
    producer: HeapProducer<Arc<Frame>>,
    shared: Arc<SinkShared>,
    latest: watch::Sender<Option<Arc<Frame>>>,
    crop: Option<CropWindow>,
}

impl std::fmt::Debug for FrameHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandler")
            .field("buffered", &self.producer.len())
            .field("crop", &self.crop)
            .finish()
    }
}

impl FrameHandler {
    /// Accept one frame from the driver.
    ///
    /// Never blocks and never panics. The lease is released before returning.
    pub fn handle<L: FrameLease>(&mut self, lease: L) {
        let lease = ReleaseOnDrop(lease);
        self.shared.delivered.fetch_add(1, Ordering::Relaxed);

        let Some(frame) =
            Frame::from_raw_cropped(lease.width(), lease.height(), lease.pixels(), self.crop)
        else {
            tracing::debug!(
                width = lease.width(),
                height = lease.height(),
                len = lease.pixels().len(),
                "Discarding frame with short pixel buffer"
            );
            return;
        };
        let frame = Arc::new(frame);

        if self.shared.started.load(Ordering::Acquire) {
            if self.producer.push(Arc::clone(&frame)).is_err() {
                let overruns = self.shared.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(overruns, "Frame sink full, frame dropped");
            }
        }

        self.latest.send_replace(Some(frame));
    }

    /// Number of frames currently buffered, as seen by the producer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.producer.len()
    }
}

/// Cloneable arming switch for a [`FrameSink`].
///
/// Lets a worker that does not own the sink open the capture window at the
/// exact moment the trigger fires.
#[derive(Debug, Clone)]
pub struct ArmHandle {
    shared: Arc<SinkShared>,
}

impl ArmHandle {
    /// Start accepting frames.
    pub fn arm(&self) {
        self.shared.started.store(true, Ordering::Release);
    }

    /// Stop accepting frames.
    pub fn disarm(&self) {
        self.shared.started.store(false, Ordering::Release);
    }

    /// Whether frames are currently accepted.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }
}

/// Consumer half of the sink, owned by the acquisition controller.
pub struct FrameSink {
    consumer: HeapConsumer<Arc<Frame>>,
    shared: Arc<SinkShared>,
    latest: watch::Receiver<Option<Arc<Frame>>>,
    capacity: usize,
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("capacity", &self.capacity)
            .field("len", &self.consumer.len())
            .field("started", &self.is_started())
            .field("overruns", &self.dropped_frames())
            .finish()
    }
}

impl FrameSink {
    /// Create a sink holding up to `capacity` frames (at least one).
    ///
    /// Returns the consumer half and the producer half that must be handed to
    /// the camera driver.
    #[must_use]
    pub fn new(capacity: usize, crop: Option<CropWindow>) -> (Self, FrameHandler) {
        let capacity = capacity.max(1);
        let (producer, consumer) = HeapRb::<Arc<Frame>>::new(capacity).split();
        let shared = Arc::new(SinkShared::default());
        let (latest_tx, latest_rx) = watch::channel(None);

        let sink = Self {
            consumer,
            shared: Arc::clone(&shared),
            latest: latest_rx,
            capacity,
        };
        let handler = FrameHandler {
            producer,
            shared,
            latest: latest_tx,
            crop,
        };
        (sink, handler)
    }

    /// Arm the sink.
    ///
    /// Frames left over from a previous window (a straggler pushed while
    /// `reset` was running) are discarded first.
    pub fn start(&mut self) {
        self.discard();
        self.shared.started.store(true, Ordering::Release);
    }

    /// Disarm the sink and clear the buffer.
    pub fn reset(&mut self) {
        self.shared.started.store(false, Ordering::Release);
        self.discard();
    }

    /// Whether the sink is armed.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// True once the buffer holds `capacity` frames.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.consumer.len() >= self.capacity
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// True if no frame is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Batch size N.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and return every buffered frame in arrival order.
    pub fn drain(&mut self) -> Vec<Arc<Frame>> {
        let mut frames = Vec::with_capacity(self.consumer.len());
        while let Some(frame) = self.consumer.pop() {
            frames.push(frame);
        }
        frames
    }

    /// Frames dropped because the sink was full while armed.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Frames delivered by the driver since construction, armed or not.
    #[must_use]
    pub fn delivered_frames(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    /// Arming switch usable from another thread.
    #[must_use]
    pub fn arm_handle(&self) -> ArmHandle {
        ArmHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Most recent frame, without waiting.
    #[must_use]
    pub fn try_latest_frame(&self) -> Option<Arc<Frame>> {
        self.latest.borrow().clone()
    }

    /// Most recent frame, waiting up to `timeout` if none has arrived yet.
    pub async fn latest_frame(&self, timeout: Duration) -> Option<Arc<Frame>> {
        let mut latest = self.latest.clone();
        let wait = latest.wait_for(Option::is_some);
        let frame = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(frame)) => (*frame).clone(),
            _ => None,
        };
        frame
    }

    fn discard(&mut self) -> usize {
        let mut discarded = 0;
        while self.consumer.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::trace!(discarded, "Discarded buffered frames");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TestLease {
        pixels: Vec<u8>,
        released: Arc<AtomicUsize>,
    }

    impl TestLease {
        fn new(value: u8, released: &Arc<AtomicUsize>) -> Self {
            Self {
                pixels: vec![value; 4],
                released: Arc::clone(released),
            }
        }
    }

    impl FrameLease for TestLease {
        fn width(&self) -> u32 {
            2
        }

        fn height(&self) -> u32 {
            2
        }

        fn pixels(&self) -> &[u8] {
            &self.pixels
        }

        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_disarmed_sink_drops_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mut handler) = FrameSink::new(4, None);

        handler.handle(TestLease::new(1, &released));

        assert!(sink.is_empty());
        assert_eq!(sink.dropped_frames(), 0);
        assert_eq!(sink.delivered_frames(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fills_to_capacity_in_arrival_order() {
        let released = Arc::new(AtomicUsize::new(0));
        let (mut sink, mut handler) = FrameSink::new(3, None);
        sink.start();

        for value in 1..=5 {
            handler.handle(TestLease::new(value, &released));
        }

        assert!(sink.is_ready());
        assert_eq!(sink.dropped_frames(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 5);

        let values: Vec<u8> = sink.drain().iter().map(|f| f.pixels[0]).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_reset_disarms_and_clears() {
        let released = Arc::new(AtomicUsize::new(0));
        let (mut sink, mut handler) = FrameSink::new(2, None);
        sink.start();
        handler.handle(TestLease::new(1, &released));
        handler.handle(TestLease::new(2, &released));
        assert!(sink.is_ready());

        sink.reset();

        assert!(!sink.is_ready());
        assert!(sink.is_empty());
        assert!(!sink.is_started());

        handler.handle(TestLease::new(3, &released));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_start_discards_stragglers() {
        let released = Arc::new(AtomicUsize::new(0));
        let (mut sink, mut handler) = FrameSink::new(2, None);
        let arm = sink.arm_handle();

        arm.arm();
        handler.handle(TestLease::new(9, &released));
        assert_eq!(sink.len(), 1);

        sink.start();
        assert!(sink.is_empty());
        assert!(sink.is_started());
    }

    #[test]
    fn test_latest_frame_tracks_disarmed_frames() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mut handler) = FrameSink::new(2, None);
        assert!(sink.try_latest_frame().is_none());

        handler.handle(TestLease::new(5, &released));
        handler.handle(TestLease::new(6, &released));

        let latest = sink.try_latest_frame().unwrap();
        assert_eq!(latest.pixels, vec![6; 4]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_crop_applied_on_handoff() {
        let released = Arc::new(AtomicUsize::new(0));
        let crop = CropWindow {
            x_offset: 1,
            width: 1,
        };
        let (mut sink, mut handler) = FrameSink::new(1, Some(crop));
        sink.start();

        handler.handle(TestLease {
            pixels: vec![1, 2, 3, 4],
            released: Arc::clone(&released),
        });

        let frames = sink.drain();
        assert_eq!(frames[0].width, 1);
        assert_eq!(frames[0].pixels, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_latest_frame_times_out_without_frames() {
        let (sink, _handler) = FrameSink::new(1, None);
        let latest = sink.latest_frame(Duration::from_millis(20)).await;
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_latest_frame_waits_for_delivery() {
        let released = Arc::new(AtomicUsize::new(0));
        let (sink, mut handler) = FrameSink::new(1, None);

        let producer_released = Arc::clone(&released);
        let delivery = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handler.handle(TestLease::new(42, &producer_released));
            handler
        });

        let latest = sink.latest_frame(Duration::from_secs(2)).await;
        assert_eq!(latest.map(|f| f.pixels[0]), Some(42));
        let _handler = delivery.join().unwrap();
    }
}
