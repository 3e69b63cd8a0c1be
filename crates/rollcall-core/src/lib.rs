//! rollcall-core — Face-encoding registry and stable matching engine.
//!
//! Stores people with one or more face encodings, matches query encodings
//! against the approved set by Euclidean distance, and aggregates repeated
//! noisy matches into a single check-in decision.

pub mod approval;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod stability;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use matcher::{EuclideanMatcher, MatchParams, Matcher};
pub use registry::{Registry, SharedRegistry};
pub use stability::{
    BackendReport, CancelToken, EncodingExtractor, Sample, SampleSource, SessionOutcome,
    SessionParams, SessionReport, StabilityAggregator,
};
pub use store::{JsonFileStore, RegistryState, RegistryStore};
pub use types::{Contact, Decision, Encoding, MatchResult, Person, PersonStatus};
