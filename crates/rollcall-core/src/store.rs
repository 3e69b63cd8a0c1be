//! Registry persistence.
//!
//! The registry lives in a single pretty-printed JSON document that is
//! rewritten in full on every mutation. Writes go to a temporary file in the
//! target directory which is synced and then renamed over the old file, so a
//! crash mid-write leaves the previous document in place.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::types::Person;

const REGISTRY_VERSION: u32 = 1;

/// In-memory registry contents.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryState {
    /// Next id to hand out. Never decreases, so removed ids are not reused.
    pub next_id: u64,
    pub people: BTreeMap<u64, Person>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            next_id: 1,
            people: BTreeMap::new(),
        }
    }
}

/// On-disk layout.
#[derive(Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    next_id: u64,
    people: Vec<Person>,
}

impl RegistryDocument {
    fn from_state(state: &RegistryState) -> Self {
        Self {
            version: REGISTRY_VERSION,
            next_id: state.next_id,
            people: state.people.values().cloned().collect(),
        }
    }

    fn into_state(self, path: &Path) -> Result<RegistryState> {
        if self.version != REGISTRY_VERSION {
            return Err(Error::CorruptStore {
                path: path.to_path_buf(),
                message: format!("unsupported registry version {}", self.version),
            });
        }

        let mut people = BTreeMap::new();
        for person in self.people {
            let id = person.id;
            if people.insert(id, person).is_some() {
                return Err(Error::CorruptStore {
                    path: path.to_path_buf(),
                    message: format!("duplicate person id {id}"),
                });
            }
        }

        let floor = people.keys().next_back().map_or(1, |max| max + 1);
        let next_id = if self.next_id < floor {
            tracing::warn!(
                path = %path.display(),
                stored = self.next_id,
                corrected = floor,
                "next_id behind highest stored id; advancing"
            );
            floor
        } else {
            self.next_id
        };

        Ok(RegistryState { next_id, people })
    }
}

/// Backing storage for a [`Registry`](crate::Registry).
pub trait RegistryStore {
    /// Load the stored state, or `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<RegistryState>>;
    /// Replace the stored state. Must leave the previous state intact on error.
    fn save(&self, state: &RegistryState) -> Result<()>;
    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Registry stored as one JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<Option<RegistryState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path).map_err(|source| Error::StorageFailure {
            path: self.path.clone(),
            source,
        })?;
        read_state(&self.path, &data).map(Some)
    }

    fn save(&self, state: &RegistryState) -> Result<()> {
        let bytes = encode_state(&self.path, state)?;
        write_atomic(&self.path, &bytes)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse a registry document previously written by [`encode_state`].
pub fn read_state(path: &Path, data: &[u8]) -> Result<RegistryState> {
    let document: RegistryDocument =
        serde_json::from_slice(data).map_err(|err| Error::CorruptStore {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    document.into_state(path)
}

pub(crate) fn encode_state(path: &Path, state: &RegistryState) -> Result<Vec<u8>> {
    encode_json(path, &RegistryDocument::from_state(state))
}

pub(crate) fn encode_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|err| Error::CorruptStore {
        path: path.to_path_buf(),
        message: format!("serialization failed: {err}"),
    })
}

/// Write `bytes` to `path` through a synced temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let storage_err = |source| Error::StorageFailure {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    {
        let file = tmp.as_file_mut();
        let mut writer = BufWriter::new(&mut *file);
        writer.write_all(bytes).map_err(storage_err)?;
        writer.write_all(b"\n").map_err(storage_err)?;
        writer.flush().map_err(storage_err)?;
    }
    // Registrations hold personal contact details; restrict before the rename.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(storage_err)?;
    }
    tmp.as_file().sync_all().map_err(storage_err)?;

    tmp.persist(path).map_err(|err| storage_err(err.error))?;
    Ok(())
}
