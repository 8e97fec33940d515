use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed motion clip: buffered pre-roll spliced with post-roll video
#[derive(Debug, Clone)]
pub struct MotionEvent {
    pub id: Uuid,
    /// When assembly completed
    pub timestamp: DateTime<Utc>,
    /// When the rising edge was received
    pub triggered_at: DateTime<Utc>,
    pub filename: String,
    /// Declared length, pre-roll plus post-roll seconds at trigger time
    pub duration_seconds: u32,
    /// Score of the frame pair that completed the trigger
    pub motion_score: f64,
    pub camera_name: String,
    pub pre_roll_segments: usize,
    pub post_roll_segments: usize,
    pub payload: Bytes,
}

impl MotionEvent {
    pub fn segment_count(&self) -> usize {
        self.pre_roll_segments + self.post_roll_segments
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }

    pub fn metadata(&self) -> EventMetadata {
        EventMetadata {
            id: self.id,
            timestamp: self.timestamp,
            triggered_at: self.triggered_at,
            filename: self.filename.clone(),
            duration_seconds: self.duration_seconds,
            motion_score: self.motion_score,
            camera_name: self.camera_name.clone(),
            pre_roll_segments: self.pre_roll_segments,
            post_roll_segments: self.post_roll_segments,
            size_bytes: self.payload.len(),
        }
    }
}

/// Serializable description of an event, without the video payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub triggered_at: DateTime<Utc>,
    pub filename: String,
    pub duration_seconds: u32,
    pub motion_score: f64,
    pub camera_name: String,
    pub pre_roll_segments: usize,
    pub post_roll_segments: usize,
    pub size_bytes: usize,
}

/// `motion-<ISO-8601 UTC, millisecond precision>.webm` with `:` and `.` turned into `-`
pub fn event_filename(timestamp: DateTime<Utc>) -> String {
    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(|c: char| c == ':' || c == '.', "-");
    format!("motion-{}.webm", stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filename_format() {
        let ts = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(42))
            .unwrap();
        assert_eq!(event_filename(ts), "motion-2024-03-09T14-05-07-042Z.webm");
    }

    #[test]
    fn test_filename_has_single_dot_and_no_colon() {
        let name = event_filename(Utc::now());
        assert!(!name.contains(':'));
        assert_eq!(name.matches('.').count(), 1);
        assert!(name.ends_with(".webm"));
    }

    #[test]
    fn test_metadata_serializes_without_payload() {
        let event = MotionEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            triggered_at: Utc::now(),
            filename: event_filename(Utc::now()),
            duration_seconds: 60,
            motion_score: 0.3,
            camera_name: "GoPro".to_string(),
            pre_roll_segments: 30,
            post_roll_segments: 30,
            payload: Bytes::from_static(b"abc"),
        };

        let json = serde_json::to_value(event.metadata()).unwrap();
        assert_eq!(json["duration_seconds"], 60);
        assert_eq!(json["size_bytes"], 3);
        assert!(json.get("payload").is_none());
        assert_eq!(event.segment_count(), 60);
    }
}
