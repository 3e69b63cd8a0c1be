use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rollcall_core::{
    CancelToken, Contact, Encoding, EncodingExtractor, Error, MatchParams, PersonStatus, Registry,
    Result, Sample, SampleSource, SessionOutcome, SessionParams,
};
use tempfile::TempDir;

/// Stands in for a face-encoding model: photo path -> encoding.
struct FixtureExtractor(HashMap<PathBuf, Vec<f32>>);

impl EncodingExtractor<Path> for FixtureExtractor {
    fn extract(&self, image: &Path) -> Result<Option<Encoding>> {
        Ok(self.0.get(image).cloned().map(Encoding::new))
    }
}

impl EncodingExtractor<PathBuf> for FixtureExtractor {
    fn extract(&self, image: &PathBuf) -> Result<Option<Encoding>> {
        EncodingExtractor::<Path>::extract(self, image.as_path())
    }
}

struct Frames(std::vec::IntoIter<PathBuf>);

impl SampleSource for Frames {
    type Image = PathBuf;

    fn next_sample(&mut self) -> Sample<PathBuf> {
        self.0.next().map_or(Sample::Exhausted, Sample::Frame)
    }
}

fn contact(name: &str) -> Contact {
    Contact {
        name: name.into(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        phone: Some("1234567890".into()),
    }
}

#[test]
fn integration_reload_is_field_for_field_identical() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("registry.json");

    let mut registry = Registry::open_path(&path).unwrap();
    let a = registry
        .register(Encoding::new(vec![0.1, -0.25, 0.3]), contact("Ashmita"), PersonStatus::Approved)
        .unwrap();
    registry.add_encoding(a, Encoding::new(vec![0.11, -0.2, 0.31])).unwrap();
    registry
        .register_pending(contact("Ravi"), vec![tmp.path().join("ravi_1.jpg")])
        .unwrap();

    let before: Vec<_> = registry.list(None).into_iter().cloned().collect();
    drop(registry);

    let reloaded = Registry::open_path(&path).unwrap();
    let after: Vec<_> = reloaded.list(None).into_iter().cloned().collect();
    assert_eq!(before, after);
    assert_eq!(reloaded.dimension(), Some(3));
}

#[test]
fn integration_counter_survives_reload_after_removal() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("registry.json");

    let mut registry = Registry::open_path(&path).unwrap();
    registry.register(Encoding::new(vec![0.0]), contact("A"), PersonStatus::Approved).unwrap();
    let b = registry
        .register(Encoding::new(vec![1.0]), contact("B"), PersonStatus::Approved)
        .unwrap();
    registry.remove(b).unwrap();
    drop(registry);

    let mut registry = Registry::open_path(&path).unwrap();
    let c = registry
        .register(Encoding::new(vec![2.0]), contact("C"), PersonStatus::Approved)
        .unwrap();
    assert_eq!(c, b + 1);
    assert!(matches!(registry.get(b), Err(Error::NotFound(_))));
}

#[test]
fn integration_pending_approval_then_stable_check_in() {
    let tmp = TempDir::new().unwrap();
    let photo = |name: &str| tmp.path().join(name);
    let extractor = FixtureExtractor(HashMap::from([
        (photo("ashmita_1.jpg"), vec![0.0, 0.0]),
        (photo("ashmita_2.jpg"), vec![0.02, 0.0]),
        (photo("frame_1.jpg"), vec![0.5, 0.0]),
        (photo("frame_3.jpg"), vec![-0.05, 0.0]),
    ]));

    let shared = Registry::open_path(tmp.path().join("registry.json"))
        .unwrap()
        .into_shared();
    let id = {
        let mut registry = shared.lock();
        let id = registry
            .register_pending(
                contact("Ashmita"),
                vec![photo("ashmita_1.jpg"), photo("ashmita_2.jpg")],
            )
            .unwrap();
        registry.approve(id, &extractor).unwrap();
        id
    };

    let session = shared
        .stability_session(MatchParams::default(), SessionParams::new(75.0, 4).unwrap())
        .unwrap()
        .with_cancel(CancelToken::new());

    // frame_2 has no face; frame_1 is too far; frame_3 is a clean match.
    let mut frames = Frames(
        vec![photo("frame_1.jpg"), photo("frame_2.jpg"), photo("frame_3.jpg"), photo("frame_1.jpg")]
            .into_iter(),
    );
    let report = session.run(&mut frames, &extractor);

    match &report.outcome {
        SessionOutcome::Success { person_id, name, confidence, attempts_used, .. } => {
            assert_eq!(*person_id, id);
            assert_eq!(name, "Ashmita");
            assert!((*confidence - 95.0).abs() < 1e-3);
            assert_eq!(*attempts_used, 4);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(report.attempts[1].confidence, None);

    let backend = report.outcome.backend_report();
    assert!(backend.found);
    assert_eq!(backend.person_id, Some(id));
}

#[test]
fn integration_session_snapshot_ignores_later_changes() {
    let tmp = TempDir::new().unwrap();
    let shared = Registry::open_path(tmp.path().join("registry.json"))
        .unwrap()
        .into_shared();
    let id = shared
        .lock()
        .register(Encoding::new(vec![0.0, 0.0]), contact("A"), PersonStatus::Approved)
        .unwrap();

    let session = shared
        .stability_session(MatchParams::default(), SessionParams::new(75.0, 1).unwrap())
        .unwrap();
    shared.lock().remove(id).unwrap();

    let extractor = FixtureExtractor(HashMap::from([(tmp.path().join("f.jpg"), vec![0.0, 0.0])]));
    let mut frames = Frames(vec![tmp.path().join("f.jpg")].into_iter());
    let report = session.run(&mut frames, &extractor);
    assert!(matches!(report.outcome, SessionOutcome::Success { person_id, .. } if person_id == id));
}

#[test]
fn integration_backup_and_roster_export() {
    let tmp = TempDir::new().unwrap();
    let mut registry = Registry::open_path(tmp.path().join("registry.json")).unwrap();
    registry
        .register(Encoding::new(vec![0.4, 0.6]), contact("Ashmita"), PersonStatus::Approved)
        .unwrap();

    let backup = registry.backup_to(&tmp.path().join("backups")).unwrap();
    let restored = Registry::open_path(&backup).unwrap();
    assert_eq!(restored.list(None), registry.list(None));

    let roster_path = tmp.path().join("exports/roster.json");
    assert_eq!(registry.export_roster(&roster_path).unwrap(), 1);
    let roster: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&roster_path).unwrap()).unwrap();
    assert_eq!(roster[0]["name"], "Ashmita");
    assert_eq!(roster[0]["encodings"], 1);
    assert!(roster[0].get("values").is_none());
}

#[test]
fn integration_corrupt_file_reports_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("registry.json");
    std::fs::write(&path, b"{ not valid").unwrap();
    assert!(matches!(
        Registry::open_path(&path),
        Err(Error::CorruptStore { .. })
    ));
}
