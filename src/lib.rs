//! Exercise Analysis Library
//!
//! Turns a per-frame sequence of 2D body-joint coordinates (produced by
//! an external pose estimator) into a repetition count, a continuous
//! posture-quality score, and a similarity score against an exemplar
//! performance, for push-ups and pull-ups.
//!
//! # Pipeline
//!
//! 1. **Keypoint conditioning** — derive the neck/waist/ankle-center
//!    virtual joints, normalize to unit range, smooth with an
//!    outlier-damped moving average ([`keypoint`], [`smoothing`]).
//! 2. **Activity segmentation** — select the frames that contain real
//!    exercise motion via a classifier → motion-rule → refinement →
//!    keep-all fallback chain ([`activity`], [`classifier`], [`segment`]).
//! 3. **Phase detection** — hysteresis state machine over the mean elbow
//!    angle ([`phase`]).
//! 4. **Repetition counting** — activation state machine crediting one
//!    rep per top/bottom pair ([`counter`]).
//! 5. **Posture evaluation** — phase-specific weighted rule checks with
//!    effect-size weights ([`evaluator`], [`weights`]).
//! 6. **Similarity scoring** — banded DTW per phase segment against a
//!    stored exemplar ([`features`], [`dtw`], [`reference`]).
//!
//! [`session::AnalysisSession`] wires the stages together for a whole
//! video; every stage is also usable on its own.
//!
//! # Quick Start
//!
//! ```
//! use exercise_analysis::{AnalysisInput, AnalysisSession, SessionConfig};
//!
//! let config = SessionConfig::push_up(10.0);
//! let session = AnalysisSession::with_defaults(config)?;
//!
//! // One Option<RawKeypoints> per extracted frame, in frame order.
//! let keypoints = vec![None; 4];
//! let report = session.analyze(&AnalysisInput::new(&keypoints, 1920.0, 1080.0));
//! assert_eq!(report.rep_count, 0);
//! # Ok::<(), exercise_analysis::AnalysisError>(())
//! ```
//!
//! # Degraded inputs
//!
//! Missing data is never fatal: absent keypoints propagate as `None`
//! through conditioning, an absent or malformed exemplar leaves the
//! similarity scorer inactive, and a missing classifier routes the
//! segmenter onto its rule-based path. Diagnostics in the report say
//! which path ran and why.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod activity;
pub mod classifier;
pub mod config;
pub mod counter;
pub mod dtw;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod geometry;
pub mod keypoint;
pub mod phase;
pub mod reference;
pub mod segment;
pub mod session;
pub mod smoothing;
pub mod weights;

// Re-exports for convenient access
pub use activity::{build_feature_matrix, extract_base_features, GrayFrame};
pub use classifier::ActivityClassifier;
pub use config::{Exercise, GripStyle, SessionConfig};
pub use counter::RepCounter;
pub use dtw::{dtw_distance, DtwScorer, DtwSummary};
pub use error::{AnalysisError, Result};
pub use evaluator::{
    CheckDetail, CheckStatus, CheckUsage, EvaluationResult, PostureEvaluator,
};
pub use features::{extract_feature_vector, ANGLE_DIMS, FEATURE_DIMS};
pub use keypoint::{JointId, KeypointSet, RawKeypoint, RawKeypoints};
pub use phase::{elbow_phase_metric, Phase, PhaseDetector};
pub use reference::{ReferenceDocument, ReferenceLibrary};
pub use segment::{
    refine_pull_up, refine_push_up, ActivitySegmenter, RefinementStats, Selection,
    SelectionMethod,
};
pub use session::{
    AnalysisInput, AnalysisReport, AnalysisSession, FrameScore, SelectionDiagnostics,
};
pub use smoothing::KeypointSmoother;
pub use weights::{cohens_d, CheckWeights, WeightEntry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
