use crate::error::MotionCamError;
use crate::segment::Segment;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Bounded FIFO of the most recent encoded segments, used as pre-roll.
///
/// The stream header of the current encoder run is kept apart from the
/// segments, so it survives the eviction of the segment that carried it.
pub struct SegmentRingBuffer {
    segments: Mutex<VecDeque<Segment>>,
    /// Always locked after `segments`
    header: Mutex<Option<Bytes>>,
    /// Maximum number of one-second segments retained
    capacity: AtomicUsize,
    stats: RingBufferStats,
}

/// Statistics for ring buffer monitoring
#[derive(Debug)]
pub struct RingBufferStats {
    /// Total segments pushed
    pub segments_pushed: AtomicU64,
    /// Segments dropped off the front to respect capacity
    pub segments_evicted: AtomicU64,
    /// Snapshots taken for event assembly
    pub snapshots_taken: AtomicU64,
    /// Current fill level (0-100)
    pub utilization_percent: AtomicU64,
}

impl RingBufferStats {
    fn new() -> Self {
        Self {
            segments_pushed: AtomicU64::new(0),
            segments_evicted: AtomicU64::new(0),
            snapshots_taken: AtomicU64::new(0),
            utilization_percent: AtomicU64::new(0),
        }
    }

    /// Get current statistics as a snapshot
    pub fn snapshot(&self) -> RingBufferStatsSnapshot {
        RingBufferStatsSnapshot {
            segments_pushed: self.segments_pushed.load(Ordering::Relaxed),
            segments_evicted: self.segments_evicted.load(Ordering::Relaxed),
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
            utilization_percent: self.utilization_percent.load(Ordering::Relaxed),
        }
    }
}

/// Buffered segments taken at one instant, with the header of their run
#[derive(Debug, Clone, Default)]
pub struct PreRoll {
    pub header: Option<Bytes>,
    pub segments: Vec<Segment>,
}

impl PreRoll {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Header bytes to write ahead of the segments when the oldest one no
    /// longer opens the stream itself
    pub fn missing_header(&self) -> Option<&Bytes> {
        match self.segments.first() {
            Some(first) if first.header_len == 0 => self.header.as_ref(),
            _ => None,
        }
    }
}

/// Snapshot of ring buffer statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RingBufferStatsSnapshot {
    pub segments_pushed: u64,
    pub segments_evicted: u64,
    pub snapshots_taken: u64,
    pub utilization_percent: u64,
}

impl SegmentRingBuffer {
    /// Create a buffer holding at most `capacity` segments.
    ///
    /// A capacity of zero keeps nothing; use the builder to reject it up front.
    pub fn new(capacity: usize) -> Self {
        debug!("Created segment ring buffer with capacity {}", capacity);

        Self {
            segments: Mutex::new(VecDeque::with_capacity(capacity)),
            header: Mutex::new(None),
            capacity: AtomicUsize::new(capacity),
            stats: RingBufferStats::new(),
        }
    }

    /// Append a segment, evicting the oldest ones beyond capacity
    pub fn push(&self, segment: Segment) {
        let capacity = self.capacity();
        let mut segments = self.segments.lock();

        trace!(
            "Pushing segment {} ({} bytes)",
            segment.sequence,
            segment.len()
        );
        if let Some(header) = segment.stream_header() {
            debug!("Retaining {} byte stream header", header.len());
            *self.header.lock() = Some(header);
        }
        segments.push_back(segment);
        let evicted = Self::trim(&mut segments, capacity);
        let len = segments.len();
        drop(segments);

        if evicted > 0 {
            self.stats
                .segments_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        self.stats.segments_pushed.fetch_add(1, Ordering::Relaxed);
        self.update_utilization(len, capacity);
    }

    /// Copy of the buffered segments, oldest first. The buffer keeps filling afterwards.
    pub fn snapshot(&self) -> PreRoll {
        let segments = self.segments.lock();
        let pre_roll = PreRoll {
            header: self.header.lock().clone(),
            segments: segments.iter().cloned().collect(),
        };
        drop(segments);

        self.stats.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        debug!("Snapshot of {} pre-roll segments", pre_roll.len());
        pre_roll
    }

    /// Header of the encoder run currently feeding the buffer
    pub fn stream_header(&self) -> Option<Bytes> {
        self.header.lock().clone()
    }

    /// Change the capacity, dropping the oldest segments if it shrank
    pub fn set_capacity(&self, capacity: usize) {
        let previous = self.capacity.swap(capacity, Ordering::Relaxed);
        if previous == capacity {
            return;
        }

        let mut segments = self.segments.lock();
        let evicted = Self::trim(&mut segments, capacity);
        let len = segments.len();
        drop(segments);

        if evicted > 0 {
            self.stats
                .segments_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        debug!(
            "Ring buffer capacity {} -> {} ({} segments evicted)",
            previous, capacity, evicted
        );
        self.update_utilization(len, capacity);
    }

    /// Drop every buffered segment and the retained header
    pub fn clear(&self) {
        debug!("Clearing segment ring buffer");
        let mut segments = self.segments.lock();
        segments.clear();
        *self.header.lock() = None;
        drop(segments);
        self.stats.utilization_percent.store(0, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn stats(&self) -> RingBufferStatsSnapshot {
        self.stats.snapshot()
    }

    fn trim(segments: &mut VecDeque<Segment>, capacity: usize) -> usize {
        let mut evicted = 0;
        while segments.len() > capacity {
            segments.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn update_utilization(&self, len: usize, capacity: usize) {
        let utilization = if capacity == 0 {
            0
        } else {
            (len * 100) / capacity
        };
        self.stats
            .utilization_percent
            .store(utilization as u64, Ordering::Relaxed);
    }
}

/// Builder for creating segment ring buffers
#[derive(Default)]
pub struct RingBufferBuilder {
    capacity: Option<usize>,
}

impl RingBufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer capacity in segments
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<SegmentRingBuffer, MotionCamError> {
        let capacity = self
            .capacity
            .ok_or_else(|| MotionCamError::system("Ring buffer capacity must be specified"))?;

        if capacity == 0 {
            return Err(MotionCamError::system(
                "Ring buffer capacity must be greater than 0",
            ));
        }

        Ok(SegmentRingBuffer::new(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;

    fn segment(sequence: u64) -> Segment {
        Segment::new(sequence, Bytes::from(vec![sequence as u8; 16]))
    }

    fn header_segment(header: &'static [u8]) -> Segment {
        let mut payload = header.to_vec();
        payload.extend_from_slice(&[0u8; 12]);
        Segment::new(0, Bytes::from(payload)).with_header(header.len())
    }

    fn sequences(pre_roll: &PreRoll) -> Vec<u64> {
        pre_roll.segments.iter().map(|s| s.sequence).collect()
    }

    #[test]
    fn test_keeps_most_recent_in_order() {
        let buffer = SegmentRingBuffer::new(5);
        for i in 1..=7 {
            buffer.push(segment(i));
        }

        assert_eq!(buffer.len(), 5);
        assert_eq!(sequences(&buffer.snapshot()), vec![3, 4, 5, 6, 7]);

        let stats = buffer.stats();
        assert_eq!(stats.segments_pushed, 7);
        assert_eq!(stats.segments_evicted, 2);
        assert_eq!(stats.utilization_percent, 100);
    }

    #[test]
    fn test_partial_fill() {
        let buffer = SegmentRingBuffer::new(30);
        for i in 1..=4 {
            buffer.push(segment(i));
        }
        assert!(!buffer.is_full());
        assert_eq!(sequences(&buffer.snapshot()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_pushes() {
        let buffer = SegmentRingBuffer::new(3);
        buffer.push(segment(1));
        buffer.push(segment(2));

        let snapshot = buffer.snapshot();
        buffer.push(segment(3));
        buffer.push(segment(4));

        assert_eq!(sequences(&snapshot), vec![1, 2]);
        assert_eq!(sequences(&buffer.snapshot()), vec![2, 3, 4]);
    }

    #[test]
    fn test_shrinking_capacity_drops_oldest() {
        let buffer = SegmentRingBuffer::new(5);
        for i in 1..=5 {
            buffer.push(segment(i));
        }

        buffer.set_capacity(2);
        assert_eq!(buffer.capacity(), 2);
        assert_eq!(sequences(&buffer.snapshot()), vec![4, 5]);

        buffer.set_capacity(4);
        buffer.push(segment(6));
        assert_eq!(sequences(&buffer.snapshot()), vec![4, 5, 6]);
    }

    #[test]
    fn test_header_outlives_evicted_first_segment() {
        let buffer = SegmentRingBuffer::new(3);
        buffer.push(header_segment(b"HEAD"));

        let pre_roll = buffer.snapshot();
        assert_eq!(pre_roll.header.as_deref(), Some(&b"HEAD"[..]));
        // First segment still opens the stream
        assert!(pre_roll.missing_header().is_none());

        for i in 1..=3 {
            buffer.push(segment(i));
        }
        let pre_roll = buffer.snapshot();
        assert_eq!(sequences(&pre_roll), vec![1, 2, 3]);
        assert_eq!(pre_roll.missing_header().map(|h| &h[..]), Some(&b"HEAD"[..]));
    }

    #[test]
    fn test_new_run_replaces_header() {
        let buffer = SegmentRingBuffer::new(3);
        buffer.push(header_segment(b"OLD!"));
        buffer.push(segment(1));
        buffer.push(header_segment(b"NEW!"));

        assert_eq!(buffer.stream_header().as_deref(), Some(&b"NEW!"[..]));
    }

    #[test]
    fn test_clear() {
        let buffer = SegmentRingBuffer::new(3);
        buffer.push(header_segment(b"HEAD"));
        buffer.push(segment(1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.stream_header().is_none());
        assert!(buffer.snapshot().header.is_none());
        assert_eq!(buffer.stats().utilization_percent, 0);
    }

    #[test]
    fn test_concurrent_pushes_respect_capacity() {
        let buffer = Arc::new(SegmentRingBuffer::new(10));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        buffer.push(segment(t * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.stats().segments_pushed, 200);
    }

    #[test]
    fn test_builder_validation() {
        assert!(RingBufferBuilder::new().build().is_err());
        assert!(RingBufferBuilder::new().capacity(0).build().is_err());

        let buffer = RingBufferBuilder::new().capacity(30).build().unwrap();
        assert_eq!(buffer.capacity(), 30);
    }
}
