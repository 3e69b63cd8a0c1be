use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fixed-length face encoding produced by an external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject empty vectors and vectors carrying NaN or infinity.
    pub fn validate(&self) -> Result<()> {
        if self.values.is_empty() {
            return Err(Error::InvalidInput("encoding is empty".into()));
        }
        if let Some(pos) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "encoding value at index {pos} is not finite"
            )));
        }
        Ok(())
    }

    /// Euclidean distance between two encodings of the same dimension.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonStatus {
    Pending,
    Approved,
}

impl fmt::Display for PersonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonStatus::Pending => f.write_str("pending"),
            PersonStatus::Approved => f.write_str("approved"),
        }
    }
}

/// Contact details captured at registration. Only `name` is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Contact {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("name is required".into()));
        }
        Ok(())
    }
}

/// A registered person with one or more stored encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: PersonStatus,
    pub created_at: DateTime<Utc>,
    pub encodings: Vec<Encoding>,
    /// Photos captured at registration, encoded on approval.
    #[serde(default)]
    pub photos: Vec<PathBuf>,
}

impl Person {
    pub fn is_approved(&self) -> bool {
        self.status == PersonStatus::Approved
    }
}

/// Outcome of comparing one query encoding against a gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Match,
    NoMatch,
}

/// Result of matching a query encoding against a gallery.
///
/// `matched_id`, `name` and `encoding_index` describe the nearest candidate
/// even when `decision` is [`Decision::NoMatch`]; they are `None` only when
/// the gallery held no comparable encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched_id: Option<u64>,
    pub name: Option<String>,
    /// Index of the closest encoding within the matched person's encodings.
    pub encoding_index: Option<usize>,
    pub distance: f32,
    /// Confidence percentage in [0, 100].
    pub confidence: f32,
    pub decision: Decision,
}

impl MatchResult {
    /// The result reported for an empty gallery.
    pub fn empty() -> Self {
        Self {
            matched_id: None,
            name: None,
            encoding_index: None,
            distance: f32::INFINITY,
            confidence: 0.0,
            decision: Decision::NoMatch,
        }
    }

    pub fn is_match(&self) -> bool {
        self.decision == Decision::Match
    }
}
