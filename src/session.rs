//! Whole-video analysis: the pieces wired together.
//!
//! An [`AnalysisSession`] holds the configuration and the injected
//! read-only resources (weight table, exemplar reference, activity
//! classifier); every [`AnalysisSession::analyze`] call builds fresh
//! per-run state, so sessions never leak state into one another and one
//! session can safely serve several videos in turn.
//!
//! The run itself is three passes over the frame sequence:
//!
//! 1. condition every frame (virtual joints → normalize → smooth) and
//!    drive the phase detector, unguarded;
//! 2. segment activity (classifier/motion layers, then the
//!    exercise-specific refinement over the conditioned sequence);
//! 3. walk the frames in order, updating the repetition counter on every
//!    frame and scoring posture/similarity on the selected active ones.
//!
//! A finalize step credits a repetition left open at the end of the
//! video and flushes the last similarity segment.

use ndarray::Array2;
use tracing::info;

use crate::activity::GrayFrame;
use crate::classifier::ActivityClassifier;
use crate::config::SessionConfig;
use crate::counter::RepCounter;
use crate::dtw::{DtwScorer, DtwSummary};
use crate::error::Result;
use crate::evaluator::{EvaluationResult, PostureEvaluator};
use crate::features::extract_feature_vector;
use crate::keypoint::{KeypointSet, RawKeypoints};
use crate::phase::{elbow_phase_metric, Phase, PhaseDetector};
use crate::reference::{ReferenceDocument, ReferenceLibrary};
use crate::segment::{refine_pull_up, refine_push_up, ActivitySegmenter, RefinementStats, Selection, SelectionMethod};
use crate::smoothing::KeypointSmoother;
use crate::weights::CheckWeights;

/// Everything one video brings to the analyzer.
///
/// Keypoints are mandatory; the grayscale frames (or precomputed motion
/// features) are optional — without them the segmenter has no motion
/// evidence and every frame is considered for analysis.
#[derive(Debug)]
pub struct AnalysisInput<'a> {
    /// Per-frame raw keypoints, in frame order; `None` where detection
    /// failed.
    pub keypoints: &'a [Option<RawKeypoints>],
    /// Source frame width in pixels.
    pub width: f64,
    /// Source frame height in pixels.
    pub height: f64,
    /// Downscaled grayscale frames for the activity segmenter.
    pub frames: Option<&'a [Option<GrayFrame>]>,
    /// Precomputed base motion features (n × 6), an alternative to
    /// `frames`.
    pub motion_features: Option<&'a Array2<f32>>,
}

impl<'a> AnalysisInput<'a> {
    /// Input with keypoints only.
    #[must_use]
    pub fn new(keypoints: &'a [Option<RawKeypoints>], width: f64, height: f64) -> Self {
        Self {
            keypoints,
            width,
            height,
            frames: None,
            motion_features: None,
        }
    }

    /// Attach grayscale frames for segmentation.
    #[must_use]
    pub fn with_frames(mut self, frames: &'a [Option<GrayFrame>]) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Attach precomputed base motion features instead of frames.
    #[must_use]
    pub fn with_motion_features(mut self, features: &'a Array2<f32>) -> Self {
        self.motion_features = Some(features);
        self
    }
}

/// Per-frame output for one analyzed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameScore {
    /// Index into the input frame sequence.
    pub frame_index: usize,
    /// Detected phase at this frame.
    pub phase: Phase,
    /// Repetitions counted up to and including this frame.
    pub rep_count: u32,
    /// Posture evaluation for this frame.
    pub evaluation: EvaluationResult,
}

/// How the analyzed frame subset was chosen.
#[derive(Debug, Clone)]
pub struct SelectionDiagnostics {
    /// Layer that produced the final selection.
    pub method: SelectionMethod,
    /// Why upper layers were rejected, when they were.
    pub reason: String,
    /// Refinement tallies, when a rule-first refinement ran.
    pub refinement: Option<RefinementStats>,
    /// Frames kept for analysis.
    pub kept: usize,
    /// Frames filtered out.
    pub discarded: usize,
}

/// Session-end output.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Final repetition count, including a finalize credit.
    pub rep_count: u32,
    /// Outputs for every scored frame, in frame order.
    pub frames: Vec<FrameScore>,
    /// Similarity against the exemplar; `overall: None` when no
    /// reference was available.
    pub similarity: DtwSummary,
    /// Segmentation diagnostics.
    pub selection: SelectionDiagnostics,
    /// Total frames in the input.
    pub total_frames: usize,
}

/// Analyzer for one exercise configuration.
pub struct AnalysisSession {
    config: SessionConfig,
    weights: CheckWeights,
    reference: Option<ReferenceLibrary>,
    classifier: Option<ActivityClassifier>,
}

impl AnalysisSession {
    /// Create a session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AnalysisError::InvalidConfig`] when the
    /// configuration fails validation.
    pub fn new(
        config: SessionConfig,
        weights: CheckWeights,
        reference: Option<ReferenceLibrary>,
        classifier: Option<ActivityClassifier>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            weights,
            reference,
            classifier,
        })
    }

    /// Create a session with the built-in weight table and no optional
    /// resources.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AnalysisError::InvalidConfig`] when the
    /// configuration fails validation.
    pub fn with_defaults(config: SessionConfig) -> Result<Self> {
        let weights = CheckWeights::for_exercise(config.exercise);
        Self::new(config, weights, None, None)
    }

    /// Analyze one video's extracted sequence.
    #[must_use]
    pub fn analyze(&self, input: &AnalysisInput<'_>) -> AnalysisReport {
        let exercise = self.config.exercise;
        let fps = self.config.fps;
        let n = input.keypoints.len();

        // Pass 1: condition keypoints and detect phases, unguarded.
        let (npts_sequence, phase_sequence) = self.condition(input);

        // Pass 2: motion selection, then exercise refinement.
        let selection = self.segment(input, &npts_sequence, &phase_sequence);

        // Pass 3: count every frame; score the selected active ones.
        let mut counter = RepCounter::new(exercise, fps);
        let mut evaluator = PostureEvaluator::new(
            exercise,
            self.config.grip,
            self.weights.clone(),
            self.config.evaluator_history,
        );
        let mut scorer = DtwScorer::new(
            self.reference.clone(),
            self.config.dtw_sigma,
            self.config.dtw_window,
        );

        let mut frames = Vec::new();
        for (i, npts) in npts_sequence.iter().enumerate() {
            let phase = phase_sequence[i];
            let was_active = counter.is_active();
            counter.update(npts.as_ref(), phase);

            if !(was_active || counter.is_active()) || !selection.contains(i) {
                continue;
            }

            let evaluation = evaluator.evaluate(npts.as_ref(), phase);
            if scorer.is_active() {
                scorer.accumulate(extract_feature_vector(npts.as_ref(), exercise), phase);
            }

            frames.push(FrameScore {
                frame_index: i,
                phase,
                rep_count: counter.count(),
                evaluation,
            });
        }

        let rep_count = counter.finalize();
        let similarity = scorer.finalize();

        info!(
            exercise = %exercise,
            rep_count,
            scored = frames.len(),
            kept = selection.kept(),
            total = n,
            method = %selection.method,
            "analysis complete"
        );

        AnalysisReport {
            rep_count,
            frames,
            similarity,
            selection: SelectionDiagnostics {
                method: selection.method,
                reason: selection.reason.clone(),
                refinement: selection.refinement,
                kept: selection.kept(),
                discarded: n.saturating_sub(selection.kept()),
            },
            total_frames: n,
        }
    }

    /// Build an exemplar reference document from a model performance.
    ///
    /// Runs the conditioning/phase/counter pipeline and collects the
    /// feature vector of every frame where the counter judges the
    /// subject active, bucketed by phase — the writer side of the
    /// [`ReferenceDocument`] round trip.
    #[must_use]
    pub fn extract_reference(&self, input: &AnalysisInput<'_>) -> ReferenceDocument {
        let exercise = self.config.exercise;
        let (npts_sequence, phase_sequence) = self.condition(input);

        let mut counter = RepCounter::new(exercise, self.config.fps);
        let mut doc = ReferenceDocument::new(exercise, self.config.fps);
        doc.resolution = Some([input.width as u32, input.height as u32]);

        for (i, npts) in npts_sequence.iter().enumerate() {
            let phase = phase_sequence[i];
            counter.update(npts.as_ref(), phase);
            if counter.is_active() {
                if let Some(vec) = extract_feature_vector(npts.as_ref(), exercise) {
                    doc.push_vector(phase, vec);
                }
            }
        }
        doc.rep_count = counter.finalize();
        doc
    }

    fn condition(
        &self,
        input: &AnalysisInput<'_>,
    ) -> (Vec<Option<KeypointSet>>, Vec<Phase>) {
        let mut smoother = KeypointSmoother::new(
            self.config.smoothing_window,
            self.config.smoothing_jump_threshold,
        );
        let mut detector = PhaseDetector::new(self.config.exercise, self.config.fps);

        let mut npts_sequence = Vec::with_capacity(input.keypoints.len());
        let mut phase_sequence = Vec::with_capacity(input.keypoints.len());

        for raw in input.keypoints {
            let derived = KeypointSet::from_raw(raw.as_ref());
            let normalized = derived.map(|set| set.normalize(input.width, input.height));
            let npts = smoother.smooth(normalized);

            let phase = match elbow_phase_metric(npts.as_ref()) {
                Some(angle) => detector.update(angle),
                None => detector.phase(),
            };

            npts_sequence.push(npts);
            phase_sequence.push(phase);
        }

        (npts_sequence, phase_sequence)
    }

    fn segment(
        &self,
        input: &AnalysisInput<'_>,
        npts_sequence: &[Option<KeypointSet>],
        phase_sequence: &[Phase],
    ) -> Selection {
        let n = input.keypoints.len();
        let segmenter = ActivitySegmenter::new(
            self.config.fps,
            self.classifier.clone(),
            self.config.min_keep_ratio,
        );

        let mut selection = if let Some(frames) = input.frames {
            segmenter.select(frames)
        } else if let Some(features) = input.motion_features {
            segmenter.select_from_features(features)
        } else {
            Selection {
                indices: (0..n).collect(),
                method: SelectionMethod::AllFrames,
                reason: "no motion data provided".to_string(),
                refinement: None,
            }
        };

        if selection.indices.is_empty() && n > 0 {
            selection = Selection {
                indices: (0..n).collect(),
                method: SelectionMethod::AllFrames,
                reason: join_nonempty(&selection.reason, "no active frames selected"),
                refinement: None,
            };
        }

        let refined = match self.config.exercise {
            crate::config::Exercise::PushUp => refine_push_up(
                npts_sequence,
                phase_sequence,
                &selection.indices,
                self.config.refine_min_keep_ratio,
            ),
            crate::config::Exercise::PullUp => refine_pull_up(
                npts_sequence,
                &selection.indices,
                self.config.refine_min_keep_ratio,
            ),
        };

        // An empty refinement means the state machine and the upstream
        // selection agree there is nothing; keep the upstream diagnostics
        // in that case.
        if !refined.indices.is_empty() {
            selection = refined;
        }

        if selection.indices.is_empty() && n > 0 {
            selection = Selection {
                indices: (0..n).collect(),
                method: SelectionMethod::AllFrames,
                reason: join_nonempty(&selection.reason, "no frames survived refinement"),
                refinement: selection.refinement,
            };
        }

        selection
    }
}

fn join_nonempty(first: &str, second: &str) -> String {
    if first.is_empty() {
        second.to_string()
    } else {
        format!("{first}; {second}")
    }
}
