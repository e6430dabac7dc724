//! Exemplar reference data: the one on-disk format the core owns.
//!
//! A reference document holds, per phase, the ordered feature-vector
//! sequence extracted from a model performance, plus the metadata of the
//! extraction run. The writer and loader must agree bit-for-bit on
//! vector ordering and dimensionality — a reloaded document reproduces
//! the original exactly.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Exercise;
use crate::error::{AnalysisError, Result};
use crate::features::ANGLE_DIMS;
use crate::phase::Phase;

/// Stored form of an exemplar performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    /// Name of the source video, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Exercise the exemplar performs.
    pub exercise: Exercise,
    /// Frame rate the exemplar was extracted at.
    pub fps: f64,
    /// Source resolution `[width, height]`, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[u32; 2]>,
    /// Repetitions counted in the exemplar.
    #[serde(default)]
    pub rep_count: u32,
    /// Ordered feature vectors per phase.
    pub phases: BTreeMap<Phase, Vec<Vec<f32>>>,
    /// Number of frames contributing to each phase.
    #[serde(default)]
    pub phase_frame_counts: BTreeMap<Phase, usize>,
    /// When the document was generated.
    pub generated_at: DateTime<Utc>,
}

impl ReferenceDocument {
    /// Start an empty document for `exercise`.
    #[must_use]
    pub fn new(exercise: Exercise, fps: f64) -> Self {
        Self {
            source: None,
            exercise,
            fps,
            resolution: None,
            rep_count: 0,
            phases: BTreeMap::new(),
            phase_frame_counts: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// Insert one phase's vector sequence, replacing any previous one
    /// and keeping the frame count in step.
    pub fn insert_phase(&mut self, phase: Phase, vectors: Vec<Vec<f32>>) {
        self.phase_frame_counts.insert(phase, vectors.len());
        self.phases.insert(phase, vectors);
    }

    /// Append one vector to a phase's sequence, in frame order.
    pub fn push_vector(&mut self, phase: Phase, vector: Vec<f32>) {
        self.phases.entry(phase).or_default().push(vector);
        *self.phase_frame_counts.entry(phase).or_insert(0) += 1;
    }

    /// Total vectors across all phases.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.phases.values().map(Vec::len).sum()
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] on serialization failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to any sink.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] on serialization failure.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Write to a file path.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Io`] when the file cannot be created, or
    /// [`AnalysisError::Json`] on serialization failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_writer(std::io::BufWriter::new(file))
    }

    /// Parse from any source.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Json`] when the document does not parse.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read from a file path.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Io`] when the file cannot be opened, or
    /// [`AnalysisError::Json`] when it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Convert into the in-memory library form used for scoring.
    #[must_use]
    pub fn into_library(self) -> ReferenceLibrary {
        ReferenceLibrary::from_document(self)
    }
}

/// In-memory exemplar, read-only for the lifetime of a scoring session.
///
/// The angle-only slices are precomputed at load so per-segment scoring
/// does not re-slice the reference every time.
#[derive(Debug, Clone)]
pub struct ReferenceLibrary {
    exercise: Exercise,
    angle_vectors: BTreeMap<Phase, Vec<Vec<f32>>>,
}

impl ReferenceLibrary {
    /// Build a library from a parsed document.
    #[must_use]
    pub fn from_document(doc: ReferenceDocument) -> Self {
        let angle_vectors = doc
            .phases
            .into_iter()
            .map(|(phase, vectors)| {
                let sliced = vectors
                    .into_iter()
                    .map(|v| {
                        let cut = ANGLE_DIMS.min(v.len());
                        let mut v = v;
                        v.truncate(cut);
                        v
                    })
                    .collect();
                (phase, sliced)
            })
            .collect();
        Self {
            exercise: doc.exercise,
            angle_vectors,
        }
    }

    /// Load from a file path.
    ///
    /// # Errors
    ///
    /// Propagates [`ReferenceDocument::load`] failures, and rejects a
    /// document whose exercise does not match `exercise`.
    pub fn from_path(path: &Path, exercise: Exercise) -> Result<Self> {
        let doc = ReferenceDocument::load(path)?;
        if doc.exercise != exercise {
            return Err(AnalysisError::ExerciseMismatch {
                found: doc.exercise.tag().to_string(),
                expected: exercise.tag().to_string(),
            });
        }
        Ok(Self::from_document(doc))
    }

    /// Load from a file path, degrading to `None` (logged, not raised)
    /// when the file is missing or malformed — an absent exemplar simply
    /// leaves similarity scoring inactive.
    #[must_use]
    pub fn load_or_inactive(path: &Path, exercise: Exercise) -> Option<Self> {
        match Self::from_path(path, exercise) {
            Ok(library) => {
                if library.is_empty() {
                    warn!(path = %path.display(), "reference has no phase data, similarity scoring disabled");
                    None
                } else {
                    info!(
                        path = %path.display(),
                        phases = library.angle_vectors.len(),
                        "reference loaded"
                    );
                    Some(library)
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reference unavailable, similarity scoring disabled");
                None
            }
        }
    }

    /// Exercise this exemplar performs.
    #[must_use]
    pub fn exercise(&self) -> Exercise {
        self.exercise
    }

    /// Whether the library holds no phase data at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.angle_vectors.values().all(Vec::is_empty)
    }

    /// Angle-only vectors for one phase.
    #[must_use]
    pub fn angle_vectors(&self, phase: Phase) -> Option<&Vec<Vec<f32>>> {
        self.angle_vectors.get(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> ReferenceDocument {
        let mut doc = ReferenceDocument::new(Exercise::PushUp, 10.0);
        doc.source = Some("model.mp4".to_string());
        doc.resolution = Some([1920, 1080]);
        doc.rep_count = 5;
        doc.insert_phase(
            Phase::Top,
            vec![vec![0.9; crate::features::FEATURE_DIMS], vec![0.8; crate::features::FEATURE_DIMS]],
        );
        doc.insert_phase(Phase::Bottom, vec![vec![0.4; crate::features::FEATURE_DIMS]]);
        doc
    }

    #[test]
    fn test_round_trip_is_exact() {
        let doc = sample_document();
        let json = doc.to_json().unwrap();
        let reloaded = ReferenceDocument::from_reader(json.as_bytes()).unwrap();
        assert_eq!(doc, reloaded);
    }

    #[test]
    fn test_phase_counts_track_inserts() {
        let mut doc = ReferenceDocument::new(Exercise::PullUp, 2.0);
        doc.push_vector(Phase::Bottom, vec![0.1; 7]);
        doc.push_vector(Phase::Bottom, vec![0.2; 7]);
        assert_eq!(doc.phase_frame_counts[&Phase::Bottom], 2);
        assert_eq!(doc.vector_count(), 2);
    }

    #[test]
    fn test_library_slices_angles() {
        let library = sample_document().into_library();
        let top = library.angle_vectors(Phase::Top).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].len(), ANGLE_DIMS);
    }

    #[test]
    fn test_empty_library() {
        let doc = ReferenceDocument::new(Exercise::PushUp, 10.0);
        assert!(doc.into_library().is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(ReferenceDocument::from_reader("{not json".as_bytes()).is_err());
    }

    #[test]
    fn test_phase_keys_serialize_lowercase() {
        let json = sample_document().to_json().unwrap();
        assert!(json.contains("\"top\""));
        assert!(json.contains("\"bottom\""));
        assert!(json.contains("\"pushup\""));
    }
}
