use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::audio::{decode_audio, TempoAnalyzer};
use crate::dsp::round_to;
use crate::error::AnalysisError;

/// Derived attributes of one track. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub filename: String,
    /// Beats per minute, 2 decimals.
    pub tempo: f64,
    /// Seconds, 1 decimal.
    pub duration: f64,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Process-lifetime memo of track metadata keyed by basename. No eviction.
pub struct MetadataCache {
    analyzer: Arc<dyn TempoAnalyzer>,
    entries: RwLock<HashMap<String, Arc<TrackMetadata>>>,
}

impl MetadataCache {
    pub fn new(analyzer: Arc<dyn TempoAnalyzer>) -> Self {
        Self {
            analyzer,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, filename: &str) -> Option<Arc<TrackMetadata>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(filename)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return cached metadata for `path`, analysing the file on a miss.
    ///
    /// Failures are returned and never cached, so the next call retries.
    pub fn get_or_compute(&self, path: &Path) -> Result<Arc<TrackMetadata>, AnalysisError> {
        let filename = basename(path);
        if let Some(hit) = self.get(&filename) {
            return Ok(hit);
        }

        let metadata = Arc::new(self.compute(path, filename.clone())?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent miss may have won the race; keep the first entry
        Ok(Arc::clone(entries.entry(filename).or_insert(metadata)))
    }

    fn compute(&self, path: &Path, filename: String) -> Result<TrackMetadata, AnalysisError> {
        let audio = decode_audio(path).map_err(|source| AnalysisError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        if audio.samples.is_empty() {
            return Err(AnalysisError::EmptySignal(path.to_path_buf()));
        }

        let analysis = self.analyzer.analyze(&audio).map_err(|source| AnalysisError::Analyzer {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = analysis
            .tempo
            .into_bpm()
            .ok_or_else(|| AnalysisError::NoTempo(path.to_path_buf()))?;
        // Checked after rounding: the stored value is what must stay positive
        let tempo = round_to(raw, 2);
        if !(tempo.is_finite() && tempo > 0.0) {
            return Err(AnalysisError::InvalidTempo {
                path: path.to_path_buf(),
                tempo: raw,
            });
        }

        let metadata = TrackMetadata {
            filename,
            tempo,
            duration: round_to(analysis.duration.max(0.0), 1),
            path: path.to_path_buf(),
        };
        log::info!(
            "Analysed {}: {} BPM, {}s",
            metadata.filename,
            metadata.tempo,
            metadata.duration
        );
        Ok(metadata)
    }
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
