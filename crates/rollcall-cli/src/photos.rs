//! Photo-backed extractor and sample source.
//!
//! Face encodings are computed by an external encoding tool which writes a
//! JSON sidecar next to each photo (`face_01.jpg` -> `face_01.json`):
//!
//! ```json
//! { "faces": [ { "encoding": [0.01, -0.12, ...] } ] }
//! ```
//!
//! Faces are listed largest first, so the first entry is the dominant face.

use std::path::{Path, PathBuf};

use rollcall_core::{CancelToken, Encoding, EncodingExtractor, Error, Sample, SampleSource};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EncodingSidecar {
    #[serde(default)]
    faces: Vec<SidecarFace>,
}

#[derive(Debug, Deserialize)]
struct SidecarFace {
    encoding: Vec<f32>,
}

/// Reads encodings from JSON sidecars produced by the external encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidecarExtractor;

impl SidecarExtractor {
    /// Sidecar location for a photo; a `.json` path is its own sidecar.
    pub fn sidecar_path(photo: &Path) -> PathBuf {
        if photo.extension().is_some_and(|ext| ext == "json") {
            photo.to_path_buf()
        } else {
            photo.with_extension("json")
        }
    }
}

impl EncodingExtractor<Path> for SidecarExtractor {
    fn extract(&self, image: &Path) -> rollcall_core::Result<Option<Encoding>> {
        let sidecar = Self::sidecar_path(image);
        let data = std::fs::read(&sidecar).map_err(|err| {
            Error::Extraction(format!("{}: {err}", sidecar.display()))
        })?;
        let parsed: EncodingSidecar = serde_json::from_slice(&data)
            .map_err(|err| Error::Extraction(format!("{}: {err}", sidecar.display())))?;
        Ok(parsed
            .faces
            .into_iter()
            .next()
            .map(|face| Encoding::new(face.encoding)))
    }
}

impl EncodingExtractor<PathBuf> for SidecarExtractor {
    fn extract(&self, image: &PathBuf) -> rollcall_core::Result<Option<Encoding>> {
        EncodingExtractor::<Path>::extract(self, image.as_path())
    }
}

/// Replays a fixed list of photos as session samples.
pub struct PhotoSequence {
    photos: std::vec::IntoIter<PathBuf>,
    cancel: CancelToken,
}

impl PhotoSequence {
    pub fn new(photos: Vec<PathBuf>, cancel: CancelToken) -> Self {
        Self {
            photos: photos.into_iter(),
            cancel,
        }
    }
}

impl SampleSource for PhotoSequence {
    type Image = PathBuf;

    fn next_sample(&mut self) -> Sample<PathBuf> {
        if self.cancel.is_cancelled() {
            return Sample::Cancelled;
        }
        match self.photos.next() {
            Some(photo) => Sample::Frame(photo),
            None => Sample::Exhausted,
        }
    }
}
