//! Nearest-encoding matching with a distance-derived confidence score.
//!
//! Every encoding of every gallery entry is compared; a person matches when
//! any one of their encodings is close enough.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Decision, Encoding, MatchResult, Person};

/// Distance at or below which a pair may be accepted.
pub const DEFAULT_ACCEPT_THRESHOLD: f32 = 0.6;
/// Distance at which confidence reaches zero.
pub const DEFAULT_DISTANCE_SCALE: f32 = 1.0;

/// Calibration for a particular encoding space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    pub accept_threshold: f32,
    pub distance_scale: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            distance_scale: DEFAULT_DISTANCE_SCALE,
        }
    }
}

impl MatchParams {
    pub fn new(accept_threshold: f32, distance_scale: f32) -> Result<Self> {
        let params = Self {
            accept_threshold,
            distance_scale,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.accept_threshold.is_finite() || self.accept_threshold < 0.0 {
            return Err(Error::InvalidInput(format!(
                "accept_threshold must be a non-negative number, got {}",
                self.accept_threshold
            )));
        }
        if !self.distance_scale.is_finite() || self.distance_scale <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "distance_scale must be positive, got {}",
                self.distance_scale
            )));
        }
        Ok(())
    }

    /// Map a distance onto a 0–100 confidence percentage.
    pub fn confidence(&self, distance: f32) -> f32 {
        if !distance.is_finite() {
            return 0.0;
        }
        (100.0 * (1.0 - distance / self.distance_scale)).clamp(0.0, 100.0)
    }

    /// Accept when within the distance threshold and confident enough.
    pub fn decide(&self, distance: f32, confidence: f32, min_confidence: f32) -> Decision {
        if distance <= self.accept_threshold && confidence >= min_confidence {
            Decision::Match
        } else {
            Decision::NoMatch
        }
    }
}

/// Strategy for comparing a query encoding against a gallery of persons.
pub trait Matcher {
    fn compare(&self, query: &Encoding, gallery: &[Person], min_confidence: f32) -> MatchResult;
}

/// Euclidean nearest-encoding matcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher {
    pub params: MatchParams,
}

impl EuclideanMatcher {
    pub fn new(params: MatchParams) -> Self {
        Self { params }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Encoding, gallery: &[Person], min_confidence: f32) -> MatchResult {
        let mut best: Option<(usize, usize, f32)> = None;

        for (p, person) in gallery.iter().enumerate() {
            for (e, stored) in person.encodings.iter().enumerate() {
                if stored.dim() != query.dim() {
                    tracing::warn!(
                        person = person.id,
                        expected = query.dim(),
                        found = stored.dim(),
                        "skipping encoding with mismatched dimension"
                    );
                    continue;
                }
                let distance = query.euclidean_distance(stored);
                let is_better = match best {
                    None => true,
                    Some((_, _, prev)) => distance < prev,
                };
                if is_better {
                    best = Some((p, e, distance));
                }
            }
        }

        let Some((p, e, distance)) = best else {
            return MatchResult::empty();
        };

        let person = &gallery[p];
        let confidence = self.params.confidence(distance);
        MatchResult {
            matched_id: Some(person.id),
            name: Some(person.name.clone()),
            encoding_index: Some(e),
            distance,
            confidence,
            decision: self.params.decide(distance, confidence, min_confidence),
        }
    }
}
