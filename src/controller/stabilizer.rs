//! Debounce filter turning raw direction codes into one action per gesture.
//!
//! A new direction is accepted after `stable_threshold` matching ticks, while
//! a return to centre needs `release_threshold` consecutive `Center` ticks
//! before the gesture counts as finished. The asymmetry keeps the indicator
//! from flickering when the stick passes through centre on its way to another
//! direction.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::controller::direction::{classify_raw, DirectionCode, RawSample};

// Largest deflection a centred 12-bit ADC can report
const MAX_OFFSET: u16 = 2048;

// Stabilizer settings, counters saturate at their thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerSettings {
    pub deadzone: u16,
    pub direction_ratio: f32,
    pub stable_threshold: u8,
    pub release_threshold: u8,
    pub report_interval_ms: u64,
}

impl Default for StabilizerSettings {
    fn default() -> Self {
        Self {
            deadzone: 1500,
            direction_ratio: 1.5,
            stable_threshold: 3,
            release_threshold: 5,
            report_interval_ms: 100,
        }
    }
}

impl StabilizerSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.deadzone == 0 || self.deadzone >= MAX_OFFSET {
            return Err(SettingsError::Deadzone(self.deadzone));
        }
        if !self.direction_ratio.is_finite() || self.direction_ratio <= 1.0 {
            return Err(SettingsError::DirectionRatio(self.direction_ratio));
        }
        if self.stable_threshold == 0 {
            return Err(SettingsError::Threshold("stable"));
        }
        if self.release_threshold == 0 {
            return Err(SettingsError::Threshold("release"));
        }
        if self.report_interval_ms == 0 {
            return Err(SettingsError::ReportInterval);
        }
        Ok(())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

// Settings errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("Deadzone must be within 1..2048, got {0}")]
    Deadzone(u16),

    #[error("Direction ratio must be a finite value above 1.0, got {0}")]
    DirectionRatio(f32),

    #[error("The {0} threshold must be greater than zero")]
    Threshold(&'static str),

    #[error("Report interval must be greater than zero")]
    ReportInterval,
}

// Result of feeding one raw code through the filter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickResult {
    pub raw: DirectionCode,
    pub is_stable: bool,
    pub is_released: bool,
    // Actionable direction for this tick, never Center
    pub emitted: Option<DirectionCode>,
}

// Edges of the "operation in progress" flag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivityEdge {
    Started,
    Ended,
}

// Everything one poll tick produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub tick: TickResult,
    pub edge: Option<ActivityEdge>,
    pub report: Option<DirectionCode>,
}

#[derive(Debug, Clone)]
pub struct DirectionStabilizer {
    settings: StabilizerSettings,

    // Last raw code seen, before debouncing
    previous_raw: DirectionCode,

    // Consecutive identical raw codes, 0..=stable_threshold
    stable_count: u8,

    // Consecutive Center codes, 0..=release_threshold
    release_count: u8,

    // Last direction handed to the reporter
    last_emitted: DirectionCode,
    last_report: Option<Instant>,

    is_active: bool,
}

impl DirectionStabilizer {
    pub fn new(settings: StabilizerSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        debug!("Creating DirectionStabilizer with settings: {:?}", settings);

        Ok(Self {
            settings,
            previous_raw: DirectionCode::Center,
            stable_count: 0,
            release_count: 0,
            last_emitted: DirectionCode::Center,
            last_report: None,
            is_active: false,
        })
    }

    pub fn settings(&self) -> &StabilizerSettings {
        &self.settings
    }

    pub fn stable_count(&self) -> u8 {
        self.stable_count
    }

    pub fn release_count(&self) -> u8 {
        self.release_count
    }

    pub fn last_emitted(&self) -> DirectionCode {
        self.last_emitted
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    // Classify a sample with the configured deadzone and ratio
    pub fn classify_raw(&self, offset_x: i16, offset_y: i16, button_pressed: bool) -> DirectionCode {
        classify_raw(
            offset_x,
            offset_y,
            button_pressed,
            self.settings.deadzone,
            self.settings.direction_ratio,
        )
    }

    /// Feeds one freshly classified code through the debounce counters.
    ///
    /// A repeated code builds `stable_count` up to its threshold. A changed
    /// code only takes one step off it, so a single stray tick does not throw
    /// away everything accumulated so far.
    pub fn update(&mut self, raw: DirectionCode) -> TickResult {
        if raw == self.previous_raw {
            if self.stable_count < self.settings.stable_threshold {
                self.stable_count += 1;
            }

            if raw.is_center() {
                if self.release_count < self.settings.release_threshold {
                    self.release_count += 1;
                }
            } else {
                self.release_count = 0;
            }
        } else {
            self.stable_count = self.stable_count.saturating_sub(1);
            self.previous_raw = raw;
            self.release_count = if raw.is_center() { 1 } else { 0 };
        }

        let is_stable = self.stable_count >= self.settings.stable_threshold;
        let is_released = self.release_count >= self.settings.release_threshold;

        let emitted = if is_stable && !raw.is_center() {
            Some(raw)
        } else {
            None
        };

        if raw.is_center() && is_released && !self.last_emitted.is_center() {
            debug!("Joystick settled at center after {:?}", self.last_emitted);
            self.last_emitted = DirectionCode::Center;
        }

        trace!(
            "raw={} stable={} release={} emitted={:?}",
            raw,
            self.stable_count,
            self.release_count,
            emitted
        );

        TickResult {
            raw,
            is_stable,
            is_released,
            emitted,
        }
    }

    // Start edge as soon as an operation shows up, end edge only once released
    pub fn activity_changed(
        &mut self,
        is_stable_nonzero: bool,
        is_released: bool,
    ) -> Option<ActivityEdge> {
        if is_stable_nonzero && !self.is_active {
            self.is_active = true;
            Some(ActivityEdge::Started)
        } else if !is_stable_nonzero && self.is_active && is_released {
            self.is_active = false;
            Some(ActivityEdge::Ended)
        } else {
            None
        }
    }

    /// Decides whether `direction` is worth reporting at `now`.
    ///
    /// A change of direction is always reported. A held direction is repeated
    /// once more than `report_interval_ms` has passed since the last report.
    pub fn should_log(&mut self, direction: DirectionCode, now: Instant) -> bool {
        let interval_elapsed = match self.last_report {
            Some(last) => now.saturating_duration_since(last) > self.settings.report_interval(),
            None => true,
        };

        if direction != self.last_emitted || (!direction.is_center() && interval_elapsed) {
            self.last_emitted = direction;
            self.last_report = Some(now);
            true
        } else {
            false
        }
    }

    // Run one full tick the way the poll loop does
    pub fn step(&mut self, sample: RawSample, now: Instant) -> StepOutcome {
        let raw = self.classify_raw(sample.offset_x, sample.offset_y, sample.button_pressed);
        let tick = self.update(raw);

        let report = match tick.emitted {
            Some(direction) if self.should_log(direction, now) => Some(direction),
            _ => None,
        };

        let edge = self.activity_changed(tick.emitted.is_some(), tick.is_released);

        StepOutcome { tick, edge, report }
    }
}
