use super::{EncoderFactory, EncoderRole, SegmentEncoder};
use crate::error::{EncoderError, Result};
use crate::segment::{Segment, SEGMENT_DURATION};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// EBML magic that opens a WebM stream
const STREAM_HEADER: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

const DEFAULT_SEGMENT_BYTES: usize = 1024;

/// Encoder stand-in producing deterministic payloads on the tokio clock
pub struct SyntheticEncoder {
    role: EncoderRole,
    segment_bytes: usize,
    task: Option<JoinHandle<()>>,
    cancellation_token: Option<CancellationToken>,
}

impl SyntheticEncoder {
    pub fn new(role: EncoderRole, segment_bytes: usize) -> Self {
        Self {
            role,
            segment_bytes,
            task: None,
            cancellation_token: None,
        }
    }
}

#[async_trait]
impl SegmentEncoder for SyntheticEncoder {
    fn role(&self) -> EncoderRole {
        self.role
    }

    async fn start(&mut self, segments: mpsc::UnboundedSender<Segment>) -> Result<()> {
        if self.task.is_some() {
            return Err(EncoderError::AlreadyRunning.into());
        }

        debug!("Starting synthetic {} encoder", self.role);
        let token = CancellationToken::new();
        self.task = Some(tokio::spawn(run_encoder(
            self.role,
            self.segment_bytes,
            segments,
            token.clone(),
        )));
        self.cancellation_token = Some(token);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let token = self
            .cancellation_token
            .take()
            .ok_or(EncoderError::NotRunning)?;
        token.cancel();

        if let Some(task) = self.task.take() {
            task.await.map_err(|e| EncoderError::Pipeline {
                details: format!("encoder task failed: {}", e),
            })?;
        }

        debug!("Synthetic {} encoder stopped", self.role);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

async fn run_encoder(
    role: EncoderRole,
    segment_bytes: usize,
    segments: mpsc::UnboundedSender<Segment>,
    token: CancellationToken,
) {
    let started = Instant::now();
    let mut interval = tokio::time::interval_at(started + SEGMENT_DURATION, SEGMENT_DURATION);
    let mut last_emit = started;
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                // Flush whatever accumulated since the last full segment
                let pending = last_emit.elapsed();
                if !pending.is_zero() {
                    let payload = render_payload(role, sequence, segment_bytes);
                    let segment = if pending >= SEGMENT_DURATION {
                        Segment::new(sequence, payload)
                    } else {
                        Segment::partial(sequence, payload, pending)
                    };
                    let segment = mark_header(segment);
                    trace!("Flushing {} segment {} ({:?})", role, sequence, pending);
                    if segments.send(segment).is_err() {
                        warn!("Pending {} segment dropped, receiver closed", role);
                    }
                }
                break;
            }
            _ = interval.tick() => {
                last_emit = Instant::now();
                let segment = mark_header(Segment::new(
                    sequence,
                    render_payload(role, sequence, segment_bytes),
                ));
                if segments.send(segment).is_err() {
                    debug!("Segment receiver closed, {} encoder exiting", role);
                    break;
                }
                trace!("Emitted {} segment {}", role, sequence);
                sequence += 1;
            }
        }
    }
}

fn mark_header(segment: Segment) -> Segment {
    if segment.sequence == 0 {
        segment.with_header(STREAM_HEADER.len())
    } else {
        segment
    }
}

/// First segment of a run carries the stream header; every payload is
/// tagged with role and sequence so concatenation order can be checked.
fn render_payload(role: EncoderRole, sequence: u64, segment_bytes: usize) -> Bytes {
    let mut payload = BytesMut::with_capacity(segment_bytes.max(16));
    if sequence == 0 {
        payload.put_slice(&STREAM_HEADER);
    }
    payload.put_u8(match role {
        EncoderRole::Continuous => b'C',
        EncoderRole::PostRoll => b'P',
    });
    payload.put_u64(sequence);
    if payload.len() < segment_bytes {
        payload.put_bytes(sequence as u8, segment_bytes - payload.len());
    }
    payload.freeze()
}

/// Hands out synthetic encoders, optionally failing for chosen roles
pub struct SyntheticEncoderFactory {
    segment_bytes: usize,
    failing_roles: Vec<EncoderRole>,
    created: AtomicUsize,
}

impl SyntheticEncoderFactory {
    pub fn new() -> Self {
        Self::with_segment_bytes(DEFAULT_SEGMENT_BYTES)
    }

    pub fn with_segment_bytes(segment_bytes: usize) -> Self {
        Self {
            segment_bytes,
            failing_roles: Vec::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// Make `create` fail for `role`, as a missing codec would
    pub fn fail_on(mut self, role: EncoderRole) -> Self {
        self.failing_roles.push(role);
        self
    }

    pub fn encoders_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl Default for SyntheticEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for SyntheticEncoderFactory {
    fn create(&self, role: EncoderRole) -> Result<Box<dyn SegmentEncoder>> {
        if self.failing_roles.contains(&role) {
            return Err(EncoderError::Initialization {
                details: format!("no encoder available for {} output", role),
            }
            .into());
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        info!("Created synthetic {} encoder", role);
        Ok(Box::new(SyntheticEncoder::new(role, self.segment_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_emits_one_segment_per_second() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut encoder = SyntheticEncoder::new(EncoderRole::Continuous, 64);
        encoder.start(tx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        encoder.stop().await.unwrap();

        let mut received = Vec::new();
        while let Some(segment) = rx.recv().await {
            received.push(segment);
        }

        // Three full segments plus the flushed half second
        assert_eq!(received.len(), 4);
        assert_eq!(
            received.iter().map(|s| s.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(received[3].duration, Duration::from_millis(500));
        assert!(received[0].payload.starts_with(&STREAM_HEADER));
        assert!(!received[1].payload.starts_with(&STREAM_HEADER));
        assert_eq!(received[1].len(), 64);
        assert_eq!(
            received[0].stream_header().as_deref(),
            Some(&STREAM_HEADER[..])
        );
        assert_eq!(received[1].header_len, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_segment_boundary_adds_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut encoder = SyntheticEncoder::new(EncoderRole::PostRoll, 32);
        encoder.start(tx).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        encoder.stop().await.unwrap();

        let mut count = 0;
        while let Some(segment) = rx.recv().await {
            assert_eq!(segment.duration, SEGMENT_DURATION);
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_double_start_and_idle_stop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut encoder = SyntheticEncoder::new(EncoderRole::Continuous, 16);
        assert!(encoder.stop().await.is_err());

        encoder.start(tx.clone()).await.unwrap();
        assert!(encoder.is_running());
        assert!(encoder.start(tx).await.is_err());
        encoder.stop().await.unwrap();
        assert!(!encoder.is_running());
    }

    #[test]
    fn test_factory_failure_per_role() {
        let factory = SyntheticEncoderFactory::new().fail_on(EncoderRole::PostRoll);
        assert!(factory.create(EncoderRole::Continuous).is_ok());
        assert!(factory.create(EncoderRole::PostRoll).is_err());
        assert_eq!(factory.encoders_created(), 1);
    }
}
