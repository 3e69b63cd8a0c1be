//! The face-encoding registry.
//!
//! Holds every registration in memory and mirrors each mutation to a
//! [`RegistryStore`]. Mutations are applied to a copy of the state which only
//! replaces the live state once the store accepted it, so a failed write
//! leaves both the file and the in-memory registry unchanged.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::matcher::{EuclideanMatcher, MatchParams, Matcher};
use crate::stability::{SessionParams, StabilityAggregator};
use crate::store::{
    encode_json, encode_state, write_atomic, JsonFileStore, RegistryState, RegistryStore,
};
use crate::types::{Contact, Encoding, MatchResult, Person, PersonStatus};

pub struct Registry<S = JsonFileStore> {
    store: S,
    state: RegistryState,
}

impl Registry<JsonFileStore> {
    /// Open (or lazily create) the registry file at `path`.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(JsonFileStore::new(path))
    }
}

impl<S: RegistryStore> Registry<S> {
    /// Load the registry from `store`; an empty store yields an empty registry.
    pub fn open(store: S) -> Result<Self> {
        let state = store.load()?.unwrap_or_default();
        tracing::info!(
            location = %store.location(),
            people = state.people.len(),
            next_id = state.next_id,
            "registry loaded"
        );
        Ok(Self { store, state })
    }

    /// Register a person with an initial encoding and return the new id.
    pub fn register(
        &mut self,
        encoding: Encoding,
        contact: Contact,
        status: PersonStatus,
    ) -> Result<u64> {
        contact.validate()?;
        self.check_encoding(&encoding)?;

        let id = self.commit(|state| {
            let id = allocate(state, contact, status, vec![encoding], Vec::new());
            Ok(id)
        })?;
        tracing::info!(id, %status, "person registered");
        Ok(id)
    }

    /// Register a pending person from captured photos awaiting approval.
    pub fn register_pending(&mut self, contact: Contact, photos: Vec<PathBuf>) -> Result<u64> {
        contact.validate()?;
        if photos.is_empty() {
            return Err(Error::InvalidInput(
                "at least one photo is required for a pending registration".into(),
            ));
        }

        let count = photos.len();
        let id = self.commit(|state| {
            Ok(allocate(state, contact, PersonStatus::Pending, Vec::new(), photos))
        })?;
        tracing::info!(id, photos = count, "pending registration stored");
        Ok(id)
    }

    /// Append another encoding to an existing person.
    pub fn add_encoding(&mut self, id: u64, encoding: Encoding) -> Result<()> {
        self.check_encoding(&encoding)?;
        let total = self.commit(|state| {
            let person = state.people.get_mut(&id).ok_or(Error::NotFound(id))?;
            person.encodings.push(encoding);
            Ok(person.encodings.len())
        })?;
        tracing::info!(id, encodings = total, "encoding added");
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<&Person> {
        self.state.people.get(&id).ok_or(Error::NotFound(id))
    }

    /// People ordered by id, optionally restricted to one status.
    pub fn list(&self, status: Option<PersonStatus>) -> Vec<&Person> {
        self.state
            .people
            .values()
            .filter(|p| status.map_or(true, |wanted| p.status == wanted))
            .collect()
    }

    pub fn remove(&mut self, id: u64) -> Result<Person> {
        let removed = self.commit(|state| state.people.remove(&id).ok_or(Error::NotFound(id)))?;
        tracing::info!(id, name = %removed.name, "person removed");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.state.people.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.people.is_empty()
    }

    /// Dimension shared by every stored encoding, if any encoding is stored.
    pub fn dimension(&self) -> Option<usize> {
        self.state
            .people
            .values()
            .flat_map(|p| p.encodings.first())
            .map(Encoding::dim)
            .next()
    }

    /// Owned copy of the approved people, for matching against.
    pub fn gallery(&self) -> Vec<Person> {
        self.list(Some(PersonStatus::Approved))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Match `query` against the approved gallery.
    pub fn match_encoding(
        &self,
        query: &Encoding,
        params: MatchParams,
        min_confidence: f32,
    ) -> Result<MatchResult> {
        params.validate()?;
        self.check_encoding(query)?;
        Ok(EuclideanMatcher::new(params).compare(query, &self.gallery(), min_confidence))
    }

    /// Start a stability session over a snapshot of the approved gallery.
    pub fn stability_session(
        &self,
        match_params: MatchParams,
        session_params: SessionParams,
    ) -> Result<StabilityAggregator<EuclideanMatcher>> {
        match_params.validate()?;
        session_params.validate()?;
        Ok(StabilityAggregator::new(
            self.gallery(),
            EuclideanMatcher::new(match_params),
            session_params,
        ))
    }

    /// Write a timestamped snapshot of the whole registry into `dir`.
    ///
    /// Backups taken within the same second get a numeric suffix.
    pub fn backup_to(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let mut path = dir.join(format!("registry-{stamp}.json"));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("registry-{stamp}-{n}.json"));
            n += 1;
        }
        write_atomic(&path, &encode_state(&path, &self.state)?)?;
        tracing::info!(path = %path.display(), people = self.len(), "registry backed up");
        Ok(path)
    }

    /// Write a metadata-only roster (no encodings) to `path`.
    pub fn export_roster(&self, path: &Path) -> Result<usize> {
        let roster: Vec<RosterEntry<'_>> =
            self.state.people.values().map(RosterEntry::from).collect();
        write_atomic(path, &encode_json(path, &roster)?)?;
        tracing::info!(path = %path.display(), entries = roster.len(), "roster exported");
        Ok(roster.len())
    }

    pub(crate) fn check_encoding(&self, encoding: &Encoding) -> Result<()> {
        encoding.validate()?;
        match self.dimension() {
            Some(dim) if dim != encoding.dim() => Err(Error::InvalidInput(format!(
                "encoding has {} values, registry stores {dim}",
                encoding.dim()
            ))),
            _ => Ok(()),
        }
    }

    /// Apply `op` to a copy of the state, persist it, then make it live.
    pub(crate) fn commit<T>(
        &mut self,
        op: impl FnOnce(&mut RegistryState) -> Result<T>,
    ) -> Result<T> {
        let mut next = self.state.clone();
        let out = op(&mut next)?;
        if let Err(err) = self.store.save(&next) {
            tracing::error!(
                location = %self.store.location(),
                error = %err,
                "registry write failed"
            );
            return Err(err);
        }
        self.state = next;
        Ok(out)
    }

    /// Wrap the registry for use from several threads.
    pub fn into_shared(self) -> SharedRegistry<S> {
        SharedRegistry {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

fn allocate(
    state: &mut RegistryState,
    contact: Contact,
    status: PersonStatus,
    encodings: Vec<Encoding>,
    photos: Vec<PathBuf>,
) -> u64 {
    let id = state.next_id;
    state.next_id += 1;
    state.people.insert(
        id,
        Person {
            id,
            name: contact.name.trim().to_string(),
            email: contact.email.filter(|e| !e.trim().is_empty()),
            phone: contact.phone.filter(|p| !p.trim().is_empty()),
            status,
            created_at: Utc::now(),
            encodings,
            photos,
        },
    );
    id
}

#[derive(Serialize)]
struct RosterEntry<'a> {
    id: u64,
    name: &'a str,
    email: Option<&'a str>,
    phone: Option<&'a str>,
    status: PersonStatus,
    created_at: String,
    encodings: usize,
    photos: usize,
}

impl<'a> From<&'a Person> for RosterEntry<'a> {
    fn from(p: &'a Person) -> Self {
        Self {
            id: p.id,
            name: &p.name,
            email: p.email.as_deref(),
            phone: p.phone.as_deref(),
            status: p.status,
            created_at: p.created_at.to_rfc3339(),
            encodings: p.encodings.len(),
            photos: p.photos.len(),
        }
    }
}

/// Clone-safe handle serialising every registry operation behind one lock.
///
/// The registry rewrites its whole file on each mutation, so concurrent
/// writers must never interleave a load-mutate-persist sequence.
pub struct SharedRegistry<S = JsonFileStore> {
    inner: Arc<Mutex<Registry<S>>>,
}

impl<S> Clone for SharedRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RegistryStore> SharedRegistry<S> {
    /// Acquire the registry for a sequence of operations.
    ///
    /// A poisoned lock is recovered: every mutation commits atomically, so
    /// the state behind it is always consistent.
    pub fn lock(&self) -> MutexGuard<'_, Registry<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot the approved gallery and build a session that owns it.
    pub fn stability_session(
        &self,
        match_params: MatchParams,
        session_params: SessionParams,
    ) -> Result<StabilityAggregator<EuclideanMatcher>> {
        self.lock().stability_session(match_params, session_params)
    }
}
