//! Match policy: distance thresholds, box tiers and the similarity score.

use crate::types::{Descriptor, FaceDescription};
use serde::{Deserialize, Serialize};

/// Distance below which a face is drawn as a strong match.
pub const STRONG_MATCH_DISTANCE: f32 = 0.5;
/// Distance below which a face counts as a match.
pub const MATCH_DISTANCE: f32 = 0.6;
/// Lower end of typical same-person distances between unit ArcFace descriptors.
pub const ARCFACE_SAME_PERSON_DISTANCE: f32 = 0.8;

/// Colour class of a face box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchTier {
    Strong,
    Borderline,
    NoMatch,
}

/// Distance thresholds used to classify faces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub strong_distance: f32,
    pub match_distance: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            strong_distance: STRONG_MATCH_DISTANCE,
            match_distance: MATCH_DISTANCE,
        }
    }
}

impl MatchPolicy {
    pub fn tier(&self, distance: f32) -> MatchTier {
        if distance < self.strong_distance {
            MatchTier::Strong
        } else if distance < self.match_distance {
            MatchTier::Borderline
        } else {
            MatchTier::NoMatch
        }
    }

    pub fn is_match(&self, distance: f32) -> bool {
        distance < self.match_distance
    }

    /// Warning text when the match threshold is stricter than ArcFace
    /// same-person distances usually are.
    pub fn calibration_warning(&self) -> Option<String> {
        (self.match_distance < ARCFACE_SAME_PERSON_DISTANCE).then(|| {
            format!(
                "match distance {:.2} is below the usual ArcFace same-person range \
                 (about {ARCFACE_SAME_PERSON_DISTANCE:.1}-1.1); genuine matches may be rejected. \
                 Set FACEMATCH_MATCH_DISTANCE and FACEMATCH_STRONG_DISTANCE to recalibrate.",
                self.match_distance
            )
        })
    }
}

/// Similarity percentage for a distance: `100 − 100·d`, kept within [0, 100].
///
/// An infinite distance (no faces) scores 0.
pub fn similarity_percent(distance: f32) -> f32 {
    (100.0 - distance * 100.0).max(0.0).min(100.0)
}

/// Per-frame verdict derived from the best (minimum) distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchState {
    pub matched: bool,
    /// Percentage in [0, 100].
    pub similarity: f32,
    /// `None` when the frame had no faces.
    pub best_distance: Option<f32>,
}

impl MatchState {
    pub fn from_best_distance(best: Option<f32>, policy: &MatchPolicy) -> Self {
        let distance = best.unwrap_or(f32::INFINITY);
        Self {
            matched: policy.is_match(distance),
            similarity: similarity_percent(distance),
            best_distance: best,
        }
    }

    /// Human-readable result line.
    pub fn summary(&self) -> String {
        if self.matched {
            format!("Match found! Similarity: {:.1}%", self.similarity)
        } else {
            format!("No match found. Similarity: {:.1}%", self.similarity)
        }
    }
}

/// One detected face scored against the reference.
#[derive(Debug, Clone)]
pub struct ScoredFace {
    pub face: FaceDescription,
    pub distance: f32,
    pub tier: MatchTier,
}

/// All faces of one frame plus the frame verdict.
#[derive(Debug, Clone)]
pub struct FrameMatch {
    pub faces: Vec<ScoredFace>,
    pub state: MatchState,
}

/// Strategy for comparing a frame's faces against the reference descriptor.
pub trait Matcher {
    fn compare(&self, reference: &Descriptor, faces: Vec<FaceDescription>) -> FrameMatch;
}

/// Euclidean-distance matcher. Scores every face; the minimum distance wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    pub policy: MatchPolicy,
}

impl EuclideanMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, reference: &Descriptor, faces: Vec<FaceDescription>) -> FrameMatch {
        let mut best: Option<f32> = None;

        let faces: Vec<ScoredFace> = faces
            .into_iter()
            .map(|face| {
                let distance = reference.euclidean_distance(&face.descriptor);
                if best.map_or(true, |b| distance < b) {
                    best = Some(distance);
                }
                ScoredFace {
                    tier: self.policy.tier(distance),
                    distance,
                    face,
                }
            })
            .collect();

        FrameMatch {
            faces,
            state: MatchState::from_best_distance(best, &self.policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn face_at(values: Vec<f32>) -> FaceDescription {
        FaceDescription {
            bbox: BoundingBox {
                x: 0.0, y: 0.0, width: 10.0, height: 10.0,
                confidence: 0.9, landmarks: None,
            },
            descriptor: Descriptor::new(values),
        }
    }

    #[rstest]
    #[case(0.0, MatchTier::Strong)]
    #[case(0.49, MatchTier::Strong)]
    #[case(0.5, MatchTier::Borderline)]
    #[case(0.59, MatchTier::Borderline)]
    #[case(0.6, MatchTier::NoMatch)]
    #[case(1.3, MatchTier::NoMatch)]
    #[case(f32::INFINITY, MatchTier::NoMatch)]
    fn test_tier_thresholds(#[case] distance: f32, #[case] expected: MatchTier) {
        assert_eq!(MatchPolicy::default().tier(distance), expected);
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(0.59, true)]
    #[case(0.6, false)]
    #[case(2.0, false)]
    fn test_match_flag(#[case] distance: f32, #[case] expected: bool) {
        assert_eq!(MatchPolicy::default().is_match(distance), expected);
    }

    #[test]
    fn test_tier_monotonic_in_distance() {
        let policy = MatchPolicy::default();
        let rank = |t: MatchTier| match t {
            MatchTier::Strong => 0,
            MatchTier::Borderline => 1,
            MatchTier::NoMatch => 2,
        };
        let mut prev = 0;
        for i in 0..=200 {
            let r = rank(policy.tier(i as f32 * 0.01));
            assert!(r >= prev, "tier went backwards at d={}", i as f32 * 0.01);
            prev = r;
        }
    }

    #[rstest]
    #[case(0.0, 100.0)]
    #[case(0.4, 60.0)]
    #[case(0.999, 0.1)]
    #[case(1.0, 0.0)]
    #[case(1.7, 0.0)]
    #[case(f32::INFINITY, 0.0)]
    fn test_similarity_percent(#[case] distance: f32, #[case] expected: f32) {
        assert_relative_eq!(similarity_percent(distance), expected, epsilon = 1e-3);
    }

    #[test]
    fn test_similarity_bounds() {
        for i in 0..=300 {
            let s = similarity_percent(i as f32 * 0.01);
            assert!((0.0..=100.0).contains(&s), "similarity {s} out of range");
        }
    }

    #[test]
    fn test_same_descriptor_is_full_match() {
        let reference = Descriptor::new(vec![0.6, 0.8]);
        let result = EuclideanMatcher::default().compare(&reference, vec![face_at(vec![0.6, 0.8])]);
        assert!(result.state.matched);
        assert_eq!(result.state.similarity, 100.0);
        assert_eq!(result.state.best_distance, Some(0.0));
        assert_eq!(result.faces[0].tier, MatchTier::Strong);
    }

    #[test]
    fn test_best_of_two_faces() {
        let reference = Descriptor::new(vec![0.0, 0.0]);
        let faces = vec![face_at(vec![0.4, 0.0]), face_at(vec![0.7, 0.0])];
        let result = EuclideanMatcher::default().compare(&reference, faces);

        assert!(result.state.matched);
        assert_relative_eq!(result.state.similarity, 60.0, epsilon = 1e-3);
        assert_relative_eq!(result.state.best_distance.unwrap(), 0.4, epsilon = 1e-6);
        assert_eq!(result.faces[0].tier, MatchTier::Strong);
        assert_eq!(result.faces[1].tier, MatchTier::NoMatch);
    }

    #[test]
    fn test_best_match_is_last_face() {
        let reference = Descriptor::new(vec![0.0, 0.0]);
        let faces = vec![face_at(vec![0.9, 0.0]), face_at(vec![0.55, 0.0])];
        let result = EuclideanMatcher::default().compare(&reference, faces);
        assert_relative_eq!(result.state.best_distance.unwrap(), 0.55, epsilon = 1e-6);
        assert_eq!(result.faces[1].tier, MatchTier::Borderline);
    }

    #[test]
    fn test_no_faces_is_no_match() {
        let reference = Descriptor::new(vec![1.0]);
        let result = EuclideanMatcher::default().compare(&reference, vec![]);
        assert!(!result.state.matched);
        assert_eq!(result.state.similarity, 0.0);
        assert_eq!(result.state.best_distance, None);
        assert!(result.faces.is_empty());
    }

    #[test]
    fn test_custom_policy() {
        let policy = MatchPolicy {
            strong_distance: 0.9,
            match_distance: 1.1,
        };
        assert_eq!(policy.tier(1.0), MatchTier::Borderline);
        assert!(policy.is_match(1.0));
        assert!(policy.calibration_warning().is_none());
    }

    #[test]
    fn test_default_policy_warns_for_arcface() {
        let warning = MatchPolicy::default().calibration_warning().unwrap();
        assert!(warning.contains("0.60"));
        assert!(warning.contains("FACEMATCH_MATCH_DISTANCE"));
    }

    #[test]
    fn test_summary_text() {
        let state = MatchState {
            matched: true,
            similarity: 60.0,
            best_distance: Some(0.4),
        };
        assert_eq!(state.summary(), "Match found! Similarity: 60.0%");
        let state = MatchState {
            matched: false,
            similarity: 12.34,
            best_distance: Some(0.88),
        };
        assert_eq!(state.summary(), "No match found. Similarity: 12.3%");
    }
}
