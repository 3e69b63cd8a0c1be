//! Promotion of pending registrations into the matching pool.

use std::path::Path;

use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::stability::EncodingExtractor;
use crate::store::RegistryStore;
use crate::types::{Encoding, Person, PersonStatus};

impl<S: RegistryStore> Registry<S> {
    /// Approve a pending registration.
    ///
    /// Records registered from photos only are encoded here, one encoding per
    /// photo that yields a face. The record stays pending when none does.
    pub fn approve<E>(&mut self, id: u64, extractor: &E) -> Result<&Person>
    where
        E: EncodingExtractor<Path> + ?Sized,
    {
        let person = self.get(id)?;
        if person.status != PersonStatus::Pending {
            return Err(Error::InvalidState {
                id,
                status: person.status,
                expected: PersonStatus::Pending,
            });
        }

        let encodings = if person.encodings.is_empty() {
            let extracted = extract_photos(id, &person.photos, extractor);
            if extracted.is_empty() {
                tracing::warn!(
                    id,
                    photos = person.photos.len(),
                    "approval refused: no usable face"
                );
                return Err(Error::NoUsableFace(id));
            }
            for encoding in &extracted {
                self.check_encoding(encoding)?;
                if encoding.dim() != extracted[0].dim() {
                    return Err(Error::InvalidInput(format!(
                        "photos of person {id} produced encodings of different lengths"
                    )));
                }
            }
            extracted
        } else {
            Vec::new()
        };

        let added = encodings.len();
        self.commit(|state| {
            let person = state.people.get_mut(&id).ok_or(Error::NotFound(id))?;
            person.encodings.extend(encodings);
            person.status = PersonStatus::Approved;
            Ok(())
        })?;
        tracing::info!(id, encodings_added = added, "registration approved");
        self.get(id)
    }
}

fn extract_photos<E>(id: u64, photos: &[std::path::PathBuf], extractor: &E) -> Vec<Encoding>
where
    E: EncodingExtractor<Path> + ?Sized,
{
    let mut encodings = Vec::with_capacity(photos.len());
    for photo in photos {
        match extractor.extract(photo) {
            Ok(Some(encoding)) => match encoding.validate() {
                Ok(()) => encodings.push(encoding),
                Err(err) => {
                    tracing::warn!(
                        id,
                        photo = %photo.display(),
                        error = %err,
                        "discarding malformed encoding"
                    )
                }
            },
            Ok(None) => tracing::warn!(id, photo = %photo.display(), "no face found in photo"),
            Err(err) => {
                tracing::warn!(
                    id,
                    photo = %photo.display(),
                    error = %err,
                    "photo extraction failed"
                )
            }
        }
    }
    encodings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RegistryState;
    use crate::types::Contact;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemoryStore(RefCell<Option<RegistryState>>);

    impl RegistryStore for &MemoryStore {
        fn load(&self) -> Result<Option<RegistryState>> {
            Ok(self.0.borrow().clone())
        }
        fn save(&self, state: &RegistryState) -> Result<()> {
            *self.0.borrow_mut() = Some(state.clone());
            Ok(())
        }
        fn location(&self) -> String {
            "memory".into()
        }
    }

    /// Photo path -> encoding; unknown paths have no face, "broken" errors.
    struct TableExtractor(HashMap<PathBuf, Vec<f32>>);

    impl EncodingExtractor<Path> for TableExtractor {
        fn extract(&self, image: &Path) -> Result<Option<Encoding>> {
            if image.ends_with("broken.jpg") {
                return Err(Error::Extraction("unreadable".into()));
            }
            Ok(self.0.get(image).map(|v| Encoding::new(v.clone())))
        }
    }

    fn photos(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_approve_encodes_usable_photos() {
        let store = MemoryStore::default();
        let mut registry = Registry::open(&store).unwrap();
        let id = registry
            .register_pending(
                Contact::named("Ashmita"),
                photos(&["a.jpg", "blank.jpg", "broken.jpg", "b.jpg"]),
            )
            .unwrap();
        let extractor = TableExtractor(HashMap::from([
            (PathBuf::from("a.jpg"), vec![0.1, 0.2]),
            (PathBuf::from("b.jpg"), vec![0.2, 0.1]),
        ]));

        let person = registry.approve(id, &extractor).unwrap();
        assert_eq!(person.status, PersonStatus::Approved);
        assert_eq!(person.encodings.len(), 2);
        assert_eq!(
            store.0.borrow().as_ref().unwrap().people[&id].status,
            PersonStatus::Approved
        );
    }

    #[test]
    fn test_approve_without_usable_face_stays_pending() {
        let store = MemoryStore::default();
        let mut registry = Registry::open(&store).unwrap();
        let id = registry
            .register_pending(Contact::named("x"), photos(&["blank.jpg", "broken.jpg"]))
            .unwrap();

        let err = registry.approve(id, &TableExtractor(HashMap::new())).unwrap_err();
        assert!(matches!(err, Error::NoUsableFace(got) if got == id));
        assert_eq!(registry.get(id).unwrap().status, PersonStatus::Pending);
        assert!(registry.get(id).unwrap().encodings.is_empty());
    }

    #[test]
    fn test_approve_twice_is_invalid_state() {
        let store = MemoryStore::default();
        let mut registry = Registry::open(&store).unwrap();
        let id = registry
            .register(Encoding::new(vec![0.3]), Contact::named("x"), PersonStatus::Pending)
            .unwrap();
        let extractor = TableExtractor(HashMap::new());

        // Already encoded: approval needs no photos.
        registry.approve(id, &extractor).unwrap();
        assert!(matches!(
            registry.approve(id, &extractor),
            Err(Error::InvalidState { status: PersonStatus::Approved, .. })
        ));
    }

    #[test]
    fn test_approve_unknown_id() {
        let store = MemoryStore::default();
        let mut registry = Registry::open(&store).unwrap();
        assert!(matches!(
            registry.approve(42, &TableExtractor(HashMap::new())),
            Err(Error::NotFound(42))
        ));
    }
}
