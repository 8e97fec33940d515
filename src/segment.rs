use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Nominal length of one encoded chunk
pub const SEGMENT_DURATION: Duration = Duration::from_secs(1);

/// Matroska Cluster element ID; media data starts at the first one
const CLUSTER_ID: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];

/// One encoded chunk of continuous video.
///
/// Segments from one encoder run concatenate byte-for-byte into a playable
/// stream. The first segment of a run opens with the container header and
/// records its length in `header_len`, so the header can outlive the segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position within the encoder run that produced it
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub duration: Duration,
    pub payload: Bytes,
    /// Leading payload bytes that form the stream header, zero for media-only segments
    pub header_len: usize,
}

impl Segment {
    pub fn new(sequence: u64, payload: Bytes) -> Self {
        Self {
            sequence,
            captured_at: Utc::now(),
            duration: SEGMENT_DURATION,
            payload,
            header_len: 0,
        }
    }

    /// A trailing segment flushed on stop, shorter than [`SEGMENT_DURATION`]
    pub fn partial(sequence: u64, payload: Bytes, duration: Duration) -> Self {
        Self {
            duration,
            ..Self::new(sequence, payload)
        }
    }

    /// Mark the first `len` payload bytes as the stream header
    pub fn with_header(mut self, len: usize) -> Self {
        self.header_len = len.min(self.payload.len());
        self
    }

    /// The stream header this segment opens with, if any
    pub fn stream_header(&self) -> Option<Bytes> {
        if self.header_len == 0 {
            None
        } else {
            Some(self.payload.slice(..self.header_len))
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Length of the WebM header at the start of a muxer's first output: everything
/// before the first Cluster, or the whole chunk if no Cluster was written yet.
pub fn webm_header_len(payload: &[u8]) -> usize {
    payload
        .windows(CLUSTER_ID.len())
        .position(|window| window == CLUSTER_ID)
        .unwrap_or(payload.len())
}
