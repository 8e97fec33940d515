use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const SENSITIVITY_RANGE: RangeInclusive<f64> = 0.01..=0.20;
pub const MIN_DURATION_FRAMES_RANGE: RangeInclusive<u32> = 1..=30;
pub const COOLDOWN_SECONDS_RANGE: RangeInclusive<u32> = 5..=120;
pub const PRE_ROLL_SECONDS_RANGE: RangeInclusive<u32> = 10..=60;
pub const POST_ROLL_SECONDS_RANGE: RangeInclusive<u32> = 10..=60;

/// Tunable motion parameters. Components read a snapshot at point of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Score threshold; a frame pair counts toward triggering when its score is strictly greater
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Consecutive above-threshold ticks required before motion is reported
    #[serde(default = "default_min_duration_frames")]
    pub min_duration_frames: u32,

    /// Quiet period after a completed event during which new triggers are suppressed
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u32,

    /// Seconds of buffered video kept ahead of a trigger
    #[serde(default = "default_pre_roll_seconds")]
    pub pre_roll_seconds: u32,

    /// Seconds of video captured after a trigger
    #[serde(default = "default_post_roll_seconds")]
    pub post_roll_seconds: u32,
}

impl MotionSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_f64("sensitivity", self.sensitivity, SENSITIVITY_RANGE)?;
        check_u32(
            "min_duration_frames",
            self.min_duration_frames,
            MIN_DURATION_FRAMES_RANGE,
        )?;
        check_u32("cooldown_seconds", self.cooldown_seconds, COOLDOWN_SECONDS_RANGE)?;
        check_u32("pre_roll_seconds", self.pre_roll_seconds, PRE_ROLL_SECONDS_RANGE)?;
        check_u32(
            "post_roll_seconds",
            self.post_roll_seconds,
            POST_ROLL_SECONDS_RANGE,
        )?;
        Ok(())
    }

    /// Declared clip length of an event triggered under these settings
    pub fn event_duration_seconds(&self) -> u32 {
        self.pre_roll_seconds + self.post_roll_seconds
    }

    pub fn post_roll(&self) -> Duration {
        Duration::from_secs(self.post_roll_seconds as u64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds as u64)
    }

    /// Ring buffer capacity in one-second segments
    pub fn pre_roll_capacity(&self) -> usize {
        self.pre_roll_seconds as usize
    }
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            min_duration_frames: default_min_duration_frames(),
            cooldown_seconds: default_cooldown_seconds(),
            pre_roll_seconds: default_pre_roll_seconds(),
            post_roll_seconds: default_post_roll_seconds(),
        }
    }
}

fn check_f64(
    field: &'static str,
    value: f64,
    range: RangeInclusive<f64>,
) -> Result<(), SettingsError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

fn check_u32(
    field: &'static str,
    value: u32,
    range: RangeInclusive<u32>,
) -> Result<(), SettingsError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value: value as f64,
            min: *range.start() as f64,
            max: *range.end() as f64,
        })
    }
}

pub(crate) fn default_sensitivity() -> f64 {
    0.05
}
pub(crate) fn default_min_duration_frames() -> u32 {
    3
}
pub(crate) fn default_cooldown_seconds() -> u32 {
    30
}
pub(crate) fn default_pre_roll_seconds() -> u32 {
    30
}
pub(crate) fn default_post_roll_seconds() -> u32 {
    30
}

/// Partial update; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub sensitivity: Option<f64>,
    pub min_duration_frames: Option<u32>,
    pub cooldown_seconds: Option<u32>,
    pub pre_roll_seconds: Option<u32>,
    pub post_roll_seconds: Option<u32>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge this update over `base`
    pub fn apply_to(&self, base: &MotionSettings) -> MotionSettings {
        MotionSettings {
            sensitivity: self.sensitivity.unwrap_or(base.sensitivity),
            min_duration_frames: self.min_duration_frames.unwrap_or(base.min_duration_frames),
            cooldown_seconds: self.cooldown_seconds.unwrap_or(base.cooldown_seconds),
            pre_roll_seconds: self.pre_roll_seconds.unwrap_or(base.pre_roll_seconds),
            post_roll_seconds: self.post_roll_seconds.unwrap_or(base.post_roll_seconds),
        }
    }
}

/// Publishes immutable settings snapshots to every component.
///
/// An update never mutates a snapshot that a reader already holds; it replaces
/// the current value and wakes subscribers.
pub struct SettingsStore {
    sender: watch::Sender<MotionSettings>,
}

impl SettingsStore {
    pub fn new(initial: MotionSettings) -> Result<Self, SettingsError> {
        initial.validate()?;
        let (sender, _) = watch::channel(initial);
        Ok(Self { sender })
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> MotionSettings {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MotionSettings> {
        self.sender.subscribe()
    }

    /// Merge, validate and publish an update. Invalid updates leave the current snapshot in place.
    pub fn update(&self, update: SettingsUpdate) -> Result<MotionSettings, SettingsError> {
        if update.is_empty() {
            debug!("Ignoring empty settings update");
            return Ok(self.snapshot());
        }

        let next = update.apply_to(&self.sender.borrow());
        if let Err(e) = next.validate() {
            warn!("Rejected settings update: {}", e);
            return Err(e);
        }

        info!("Motion settings updated: {:?}", next);
        self.sender.send_replace(next.clone());
        Ok(next)
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        let (sender, _) = watch::channel(MotionSettings::default());
        Self { sender }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = MotionSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sensitivity, 0.05);
        assert_eq!(settings.min_duration_frames, 3);
        assert_eq!(settings.cooldown_seconds, 30);
        assert_eq!(settings.pre_roll_seconds, 30);
        assert_eq!(settings.post_roll_seconds, 30);
        assert_eq!(settings.event_duration_seconds(), 60);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut settings = MotionSettings::default();
        settings.sensitivity = 0.5;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::OutOfRange { field: "sensitivity", .. })
        ));

        let mut settings = MotionSettings::default();
        settings.pre_roll_seconds = 5;
        assert!(settings.validate().is_err());

        let mut settings = MotionSettings::default();
        settings.min_duration_frames = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_update_publishes_new_snapshot() {
        let store = SettingsStore::default();
        let mut receiver = store.subscribe();
        let held = store.snapshot();

        let updated = store
            .update(SettingsUpdate {
                sensitivity: Some(0.1),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(updated.sensitivity, 0.1);
        assert_eq!(updated.pre_roll_seconds, 30);
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().sensitivity, 0.1);

        // Snapshots taken before the update are untouched
        assert_eq!(held.sensitivity, 0.05);
    }

    #[test]
    fn test_invalid_update_keeps_previous_snapshot() {
        let store = SettingsStore::default();
        let result = store.update(SettingsUpdate {
            post_roll_seconds: Some(500),
            ..Default::default()
        });

        assert!(result.is_err());
        assert_eq!(store.snapshot(), MotionSettings::default());
    }
}
