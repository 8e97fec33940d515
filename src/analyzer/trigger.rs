use crate::settings::MotionSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Debounce state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TriggerState {
    /// Score at or below sensitivity on the last tick
    #[default]
    Idle,
    /// Score above sensitivity for this many consecutive ticks, not yet reported
    Rising(u32),
    /// Counter reached `min_duration_frames`; motion is reported
    Detected,
}

/// What one scored tick produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerOutput {
    pub motion: bool,
    pub score: f64,
    /// Not-detected -> detected on this tick
    pub rising_edge: bool,
    /// Detected -> not-detected on this tick
    pub falling_edge: bool,
}

/// Converts the per-tick score stream into a debounced detection signal.
///
/// Any tick at or below sensitivity drops straight back to `Idle`; there is
/// no hysteresis. Cooldown is applied downstream by the event assembler.
#[derive(Debug, Default)]
pub struct TriggerStateMachine {
    state: TriggerState,
    counter: u32,
}

impl TriggerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one scored tick against the current settings snapshot
    pub fn update(&mut self, score: f64, settings: &MotionSettings) -> TriggerOutput {
        let was_detected = self.is_detected();

        if score > settings.sensitivity {
            let required = settings.min_duration_frames.max(1);
            // Counter saturates so it never exceeds the requirement
            self.counter = (self.counter + 1).min(required);
            self.state = if self.counter >= required {
                TriggerState::Detected
            } else {
                TriggerState::Rising(self.counter)
            };
        } else {
            self.counter = 0;
            self.state = TriggerState::Idle;
        }

        let motion = self.is_detected();
        let output = TriggerOutput {
            motion,
            score,
            rising_edge: motion && !was_detected,
            falling_edge: was_detected && !motion,
        };

        if output.rising_edge {
            debug!(
                "Motion detected after {} consecutive frames (score {:.4})",
                self.counter, score
            );
        } else if output.falling_edge {
            debug!("Motion cleared (score {:.4})", score);
        } else {
            trace!("Trigger state {:?} (score {:.4})", self.state, score);
        }

        output
    }

    /// Back to `Idle` with a zero counter
    pub fn reset(&mut self) {
        self.state = TriggerState::Idle;
        self.counter = 0;
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_detected(&self) -> bool {
        self.state == TriggerState::Detected
    }
}
