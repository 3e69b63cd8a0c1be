//! Stable recognition over a stream of samples.
//!
//! A single frame can match the wrong person (lighting, angle, occlusion).
//! A [`StabilityAggregator`] pulls up to `max_attempts` samples, matches each
//! one independently against a gallery snapshot, and reports the best
//! accepted match across the whole budget (best-of-N) as one outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matcher::Matcher;
use crate::types::{Decision, Encoding, MatchResult, Person};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 75.0;
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// One pull from a [`SampleSource`].
#[derive(Debug)]
pub enum Sample<I> {
    Frame(I),
    Exhausted,
    Cancelled,
}

/// Pull-based supplier of images (camera frames, photo files, ...).
pub trait SampleSource {
    type Image;

    fn next_sample(&mut self) -> Sample<Self::Image>;
}

/// Turns an image into the encoding of its dominant face.
///
/// `Ok(None)` means no face was found.
pub trait EncodingExtractor<I: ?Sized> {
    fn extract(&self, image: &I) -> Result<Option<Encoding>>;
}

/// Shared cancellation flag, checked between attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub min_confidence: f32,
    pub max_attempts: usize,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SessionParams {
    pub fn new(min_confidence: f32, max_attempts: usize) -> Result<Self> {
        let params = Self {
            min_confidence,
            max_attempts,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(Error::InvalidInput(format!(
                "min_confidence must be within 0..=100, got {}",
                self.min_confidence
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Terminal state of a session. Each variant carries only what it knows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Success {
        person_id: u64,
        name: String,
        confidence: f32,
        distance: f32,
        encoding_index: usize,
        attempts_used: usize,
    },
    /// A candidate within the distance scale existed but never cleared the
    /// acceptance rules.
    LowConfidence {
        person_id: u64,
        name: String,
        confidence: f32,
        attempts_used: usize,
    },
    NotFound {
        attempts_used: usize,
    },
    Aborted {
        attempts_used: usize,
    },
}

impl SessionOutcome {
    pub fn attempts_used(&self) -> usize {
        match self {
            SessionOutcome::Success { attempts_used, .. }
            | SessionOutcome::LowConfidence { attempts_used, .. }
            | SessionOutcome::NotFound { attempts_used }
            | SessionOutcome::Aborted { attempts_used } => *attempts_used,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            SessionOutcome::Success { .. } => "success",
            SessionOutcome::LowConfidence { .. } => "low_confidence",
            SessionOutcome::NotFound { .. } => "not_found",
            SessionOutcome::Aborted { .. } => "aborted",
        }
    }

    /// Flatten into the payload handed to a check-in backend.
    pub fn backend_report(&self) -> BackendReport {
        let attempts = self.attempts_used();
        match self {
            SessionOutcome::Success {
                person_id,
                name,
                confidence,
                encoding_index,
                ..
            } => BackendReport {
                status: self.status(),
                found: true,
                person_id: Some(*person_id),
                match_index: Some(*encoding_index),
                name: Some(name.clone()),
                confidence: Some(round_confidence(*confidence)),
                attempts,
                message: format!("recognized {name}"),
            },
            SessionOutcome::LowConfidence {
                person_id,
                name,
                confidence,
                ..
            } => BackendReport {
                status: self.status(),
                found: false,
                person_id: Some(*person_id),
                match_index: None,
                name: Some(name.clone()),
                confidence: Some(round_confidence(*confidence)),
                attempts,
                message: "best match not accepted; ask for confirmation".into(),
            },
            SessionOutcome::NotFound { .. } => BackendReport {
                status: self.status(),
                found: false,
                person_id: None,
                match_index: None,
                name: None,
                confidence: None,
                attempts,
                message: "face not recognized".into(),
            },
            SessionOutcome::Aborted { .. } => BackendReport {
                status: self.status(),
                found: false,
                person_id: None,
                match_index: None,
                name: None,
                confidence: None,
                attempts,
                message: "recognition cancelled".into(),
            },
        }
    }
}

fn round_confidence(confidence: f32) -> f32 {
    (confidence * 100.0).round() / 100.0
}

/// What a check-in backend receives for a finished session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendReport {
    pub status: &'static str,
    pub found: bool,
    pub person_id: Option<u64>,
    pub match_index: Option<usize>,
    pub name: Option<String>,
    pub confidence: Option<f32>,
    pub attempts: usize,
    pub message: String,
}

/// Per-attempt diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt: usize,
    /// `None` when no face was extracted from the sample.
    pub confidence: Option<f32>,
    pub decision: Option<Decision>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub attempts: Vec<AttemptRecord>,
}

/// Drives repeated matches over a fixed gallery snapshot.
pub struct StabilityAggregator<M> {
    gallery: Vec<Person>,
    dimension: Option<usize>,
    matcher: M,
    params: SessionParams,
    cancel: CancelToken,
}

impl<M: Matcher> StabilityAggregator<M> {
    pub fn new(gallery: Vec<Person>, matcher: M, params: SessionParams) -> Self {
        let dimension = gallery
            .iter()
            .flat_map(|p| p.encodings.first())
            .map(Encoding::dim)
            .next();
        Self {
            gallery,
            dimension,
            matcher,
            params,
            cancel: CancelToken::new(),
        }
    }

    /// Observe `token` between attempts.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    /// Run one session to a terminal outcome.
    pub fn run<S, E>(&self, source: &mut S, extractor: &E) -> SessionReport
    where
        S: SampleSource,
        E: EncodingExtractor<S::Image> + ?Sized,
    {
        let min_confidence = self.params.min_confidence;
        let mut attempts = Vec::with_capacity(self.params.max_attempts);
        // Highest-confidence accepted match, and highest-confidence candidate of any decision.
        let mut accepted: Option<MatchResult> = None;
        let mut nearest: Option<MatchResult> = None;
        let mut usable = 0usize;

        tracing::info!(
            gallery = self.gallery.len(),
            min_confidence,
            max_attempts = self.params.max_attempts,
            "stability session started"
        );

        while attempts.len() < self.params.max_attempts {
            if self.cancel.is_cancelled() {
                return self.finish(
                    SessionOutcome::Aborted {
                        attempts_used: attempts.len(),
                    },
                    attempts,
                );
            }

            let image = match source.next_sample() {
                Sample::Frame(image) => image,
                Sample::Cancelled => {
                    return self.finish(
                        SessionOutcome::Aborted {
                            attempts_used: attempts.len(),
                        },
                        attempts,
                    );
                }
                Sample::Exhausted if usable == 0 => {
                    return self.finish(
                        SessionOutcome::Aborted {
                            attempts_used: attempts.len(),
                        },
                        attempts,
                    );
                }
                Sample::Exhausted => {
                    tracing::debug!(attempts = attempts.len(), "sample source exhausted early");
                    break;
                }
            };

            let attempt = attempts.len() + 1;
            let extracted = extractor.extract(&image).and_then(|found| match found {
                Some(encoding) => self.check_sample(&encoding).map(|()| Some(encoding)),
                None => Ok(None),
            });
            let encoding = match extracted {
                Ok(Some(encoding)) => encoding,
                Ok(None) => {
                    tracing::debug!(attempt, "no face in sample");
                    attempts.push(AttemptRecord {
                        attempt,
                        confidence: None,
                        decision: None,
                    });
                    continue;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "unusable sample; attempt skipped");
                    attempts.push(AttemptRecord {
                        attempt,
                        confidence: None,
                        decision: None,
                    });
                    continue;
                }
            };

            usable += 1;
            let result = self.matcher.compare(&encoding, &self.gallery, min_confidence);
            tracing::debug!(
                attempt,
                person = ?result.matched_id,
                distance = result.distance,
                confidence = result.confidence,
                decision = ?result.decision,
                "attempt matched"
            );
            attempts.push(AttemptRecord {
                attempt,
                confidence: Some(result.confidence),
                decision: Some(result.decision),
            });

            if result.matched_id.is_none() {
                continue;
            }
            let accept = result.is_match() && result.confidence >= min_confidence;
            if accept && beats(&accepted, &result) {
                accepted = Some(result.clone());
            }
            // Zero confidence means the face is at least a full distance scale away.
            if result.confidence > 0.0 && beats(&nearest, &result) {
                nearest = Some(result);
            }
        }

        let attempts_used = attempts.len();
        let outcome = match (accepted, nearest) {
            (Some(best), _) => SessionOutcome::Success {
                person_id: best.matched_id.unwrap_or_default(),
                name: best.name.unwrap_or_default(),
                confidence: best.confidence,
                distance: best.distance,
                encoding_index: best.encoding_index.unwrap_or_default(),
                attempts_used,
            },
            (None, Some(best)) => SessionOutcome::LowConfidence {
                person_id: best.matched_id.unwrap_or_default(),
                name: best.name.unwrap_or_default(),
                confidence: best.confidence,
                attempts_used,
            },
            (None, None) => SessionOutcome::NotFound { attempts_used },
        };
        self.finish(outcome, attempts)
    }

    /// Reject encodings the gallery cannot be compared against.
    fn check_sample(&self, encoding: &Encoding) -> Result<()> {
        encoding.validate()?;
        match self.dimension {
            Some(dim) if dim != encoding.dim() => Err(Error::InvalidInput(format!(
                "sample encoding has {} values, gallery stores {dim}",
                encoding.dim()
            ))),
            _ => Ok(()),
        }
    }

    fn finish(&self, outcome: SessionOutcome, attempts: Vec<AttemptRecord>) -> SessionReport {
        tracing::info!(
            status = outcome.status(),
            attempts_used = outcome.attempts_used(),
            "stability session finished"
        );
        SessionReport { outcome, attempts }
    }
}

fn beats(current: &Option<MatchResult>, candidate: &MatchResult) -> bool {
    match current {
        None => true,
        Some(prev) => candidate.confidence > prev.confidence,
    }
}
