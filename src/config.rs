//! Session configuration.
//!
//! This module provides the [`SessionConfig`] struct which centralizes
//! the tunable parameters of an analysis session, along with per-exercise
//! presets.
//!
//! # Example
//!
//! ```
//! use exercise_analysis::{Exercise, SessionConfig};
//!
//! // Preset for a push-up video extracted at 10 FPS
//! let config = SessionConfig::push_up(10.0);
//!
//! // Preset for a wide-grip pull-up
//! let config = SessionConfig::pull_up(10.0).with_grip(exercise_analysis::GripStyle::Wide);
//! assert!(config.validate().is_ok());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// The exercises the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exercise {
    /// Push-up: prone, top = arms extended.
    PushUp,
    /// Pull-up: hanging, bottom = dead hang.
    PullUp,
}

impl Exercise {
    /// Lowercase tag used in stored documents.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Exercise::PushUp => "pushup",
            Exercise::PullUp => "pullup",
        }
    }

    /// The phase at which a completed repetition is credited.
    #[must_use]
    pub fn count_phase(self) -> crate::phase::Phase {
        match self {
            Exercise::PushUp => crate::phase::Phase::Top,
            Exercise::PullUp => crate::phase::Phase::Bottom,
        }
    }

    /// Parse a tag, accepting a few informal spellings.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized: String = tag
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "pushup" | "pushups" => Some(Exercise::PushUp),
            "pullup" | "pullups" => Some(Exercise::PullUp),
            _ => None,
        }
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Pull-up grip style; widens the accepted elbow-flare ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GripStyle {
    /// Chin-up: elbows tucked in front of the body.
    Underhand,
    /// Standard pull-up grip.
    #[default]
    Overhand,
    /// Wide grip: large flare allowed.
    Wide,
}

impl GripStyle {
    /// Maximum accepted elbow-to-shoulder distance ratio for this grip.
    #[must_use]
    pub fn elbow_flare_limit(self) -> f64 {
        match self {
            GripStyle::Underhand => 1.2,
            GripStyle::Overhand => 1.7,
            GripStyle::Wide => 2.0,
        }
    }
}

/// Configuration for one analysis session.
///
/// All time-like thresholds are expressed in frames at construction time
/// by the consuming components, scaled from the 10 FPS reference rate, so
/// `fps` must reflect the rate frames were actually extracted at.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Exercise being performed.
    pub exercise: Exercise,

    /// Frame rate the keypoint sequence was extracted at.
    pub fps: f64,

    /// Pull-up grip style; ignored for push-ups.
    pub grip: GripStyle,

    /// Keypoint smoothing window, in frames.
    pub smoothing_window: usize,

    /// Normalized-coordinate jump beyond which a sample is outlier-blended.
    pub smoothing_jump_threshold: f64,

    /// Rolling-history length for the evaluator's variance checks.
    pub evaluator_history: usize,

    /// DTW Gaussian-kernel leniency; larger scores more generously.
    pub dtw_sigma: f64,

    /// Explicit Sakoe-Chiba band half-width; 0 derives it from the
    /// segment lengths.
    pub dtw_window: usize,

    /// Minimum fraction of frames the ML/rule selection must keep before
    /// it is trusted.
    pub min_keep_ratio: f64,

    /// Minimum fraction of frames the exercise-specific refinement must
    /// keep before it overrides the upstream selection.
    pub refine_min_keep_ratio: f64,
}

impl SessionConfig {
    /// Preset for push-up analysis.
    #[must_use]
    pub fn push_up(fps: f64) -> Self {
        Self {
            exercise: Exercise::PushUp,
            fps,
            ..Self::default()
        }
    }

    /// Preset for pull-up analysis with the default overhand grip.
    #[must_use]
    pub fn pull_up(fps: f64) -> Self {
        Self {
            exercise: Exercise::PullUp,
            fps,
            ..Self::default()
        }
    }

    /// Replace the grip style.
    #[must_use]
    pub fn with_grip(mut self, grip: GripStyle) -> Self {
        self.grip = grip;
        self
    }

    /// Validate parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidConfig`] when a parameter is out
    /// of range.
    pub fn validate(&self) -> Result<()> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        if self.smoothing_window == 0 {
            return Err(AnalysisError::InvalidConfig(
                "smoothing_window must be at least 1".into(),
            ));
        }
        if self.dtw_sigma <= 0.0 {
            return Err(AnalysisError::InvalidConfig(format!(
                "dtw_sigma must be positive, got {}",
                self.dtw_sigma
            )));
        }
        if !(0.0..=1.0).contains(&self.min_keep_ratio)
            || !(0.0..=1.0).contains(&self.refine_min_keep_ratio)
        {
            return Err(AnalysisError::InvalidConfig(
                "keep ratios must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exercise: Exercise::PushUp,
            fps: 10.0,
            grip: GripStyle::Overhand,
            smoothing_window: crate::smoothing::DEFAULT_WINDOW,
            smoothing_jump_threshold: crate::smoothing::DEFAULT_JUMP_THRESHOLD,
            evaluator_history: 30,
            dtw_sigma: 0.25,
            dtw_window: 0,
            min_keep_ratio: 0.35,
            refine_min_keep_ratio: 0.08,
        }
    }
}
