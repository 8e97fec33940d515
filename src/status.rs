use crate::analyzer::TriggerState;
use serde::Serialize;

/// Point-in-time view of the pipeline for presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub camera_name: String,
    pub recording: bool,
    pub detecting: bool,
    pub motion_detected: bool,
    pub motion_score: f64,
    pub trigger_state: TriggerState,
    pub capture_in_progress: bool,
    pub events_captured: u64,
    pub buffered_segments: usize,
    pub pre_roll_capacity: usize,
}

impl PipelineStatus {
    /// One-line summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "{}: recording={} detecting={} motion={} score={:.3} buffer={}/{} capturing={} events={}",
            self.camera_name,
            self.recording,
            self.detecting,
            self.motion_detected,
            self.motion_score,
            self.buffered_segments,
            self.pre_roll_capacity,
            self.capture_in_progress,
            self.events_captured
        )
    }

    /// Fraction of the pre-roll window currently buffered
    pub fn buffer_fill(&self) -> f64 {
        if self.pre_roll_capacity == 0 {
            return 0.0;
        }
        self.buffered_segments as f64 / self.pre_roll_capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_fill() {
        let status = PipelineStatus {
            camera_name: "GoPro".to_string(),
            recording: true,
            detecting: true,
            motion_detected: false,
            motion_score: 0.0125,
            trigger_state: TriggerState::Rising(1),
            capture_in_progress: false,
            events_captured: 2,
            buffered_segments: 15,
            pre_roll_capacity: 30,
        };

        assert_eq!(status.buffer_fill(), 0.5);
        let summary = status.summary();
        assert!(summary.starts_with("GoPro: recording=true"));
        assert!(summary.contains("buffer=15/30"));
    }
}
