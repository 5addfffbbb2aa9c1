use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CurationConfig, LibraryConfig};
use crate::error::CurationError;
use crate::metadata::{MetadataCache, TrackMetadata};

/// The directory tracks are played from and uploaded into.
#[derive(Debug, Clone)]
pub struct Library {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl Library {
    pub fn new(dir: PathBuf, extensions: Vec<String>) -> Self {
        let extensions = extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect();
        Self { dir, extensions }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(config.audio_dir.clone(), config.extensions.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn is_allowed(&self, filename: &str) -> bool {
        match filename.rsplit_once('.') {
            Some((_, ext)) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    pub fn ensure_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create audio directory {}", self.dir.display()))
    }

    /// Filenames in the library with an allowed extension, sorted.
    pub fn list_candidate_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read audio directory {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.is_allowed(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Picks the tracks suitable for a session out of the analysed candidates.
pub trait TrackCurator: Send + Sync {
    /// Returns accepted filenames in order. An empty list means "no opinion".
    fn select(&self, tracks: &[TrackMetadata]) -> Result<Vec<String>, CurationError>;
}

/// Used when no curation endpoint is configured.
pub struct AcceptAll;

impl TrackCurator for AcceptAll {
    fn select(&self, tracks: &[TrackMetadata]) -> Result<Vec<String>, CurationError> {
        Ok(tracks.iter().map(|t| t.filename.clone()).collect())
    }
}

const CURATION_PROMPT: &str = "You are a music therapy expert working with autistic children.
Select the tracks best suited to a listening session according to these criteria:
- Moderate tempo (70-120 BPM)
- Duration over 45 seconds
- Soothing character
- No abrupt changes

Answer only with a JSON array of the accepted filenames.
Example: [\"music1.mp3\", \"music2.wav\"]

Available tracks:
";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Curation through an OpenAI-compatible chat-completions endpoint.
pub struct HttpCurator {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl HttpCurator {
    pub fn new(endpoint: String, config: &CurationConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn prompt(tracks: &[TrackMetadata]) -> String {
        let listing = serde_json::to_string_pretty(tracks).unwrap_or_else(|_| "[]".into());
        format!("{}{}", CURATION_PROMPT, listing)
    }
}

impl TrackCurator for HttpCurator {
    fn select(&self, tracks: &[TrackMetadata]) -> Result<Vec<String>, CurationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Self::prompt(tracks),
            }],
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body = request.send()?.error_for_status()?.text()?;
        extract_selection(&body)
    }
}

/// Filenames from a chat-completions response body.
fn extract_selection(body: &str) -> Result<Vec<String>, CurationError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| CurationError::Malformed(e.to_string()))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(CurationError::EmptyResponse)?;
    parse_selection(&content)
}

/// Parse a curator reply: a JSON array of filenames, optionally inside a code fence.
pub fn parse_selection(content: &str) -> Result<Vec<String>, CurationError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str::<Vec<String>>(unfenced).map_err(|e| CurationError::Malformed(e.to_string()))
}

/// Builds the filename list for one playback cycle.
pub struct PlaylistSource {
    library: Library,
    cache: Arc<MetadataCache>,
    curator: Box<dyn TrackCurator>,
}

impl PlaylistSource {
    pub fn new(library: Library, cache: Arc<MetadataCache>, curator: Box<dyn TrackCurator>) -> Self {
        Self {
            library,
            cache,
            curator,
        }
    }

    /// Candidates that analyse cleanly, narrowed by the curator when it answers.
    ///
    /// Errors only when the library itself cannot be listed.
    pub fn generate(&self) -> Result<Vec<String>> {
        let files = self.library.list_candidate_files()?;
        if files.is_empty() {
            log::warn!("No audio files found in {}", self.library.dir().display());
            return Ok(Vec::new());
        }

        let valid: Vec<TrackMetadata> = files
            .iter()
            .filter_map(|f| match self.cache.get_or_compute(&self.library.path(f)) {
                Ok(metadata) => Some((*metadata).clone()),
                Err(e) => {
                    log::error!("Metadata extraction failed: {}", e);
                    None
                }
            })
            .collect();

        if valid.is_empty() {
            log::error!("No track produced valid metadata");
            return Ok(Vec::new());
        }

        let fallback = || valid.iter().map(|t| t.filename.clone()).collect::<Vec<_>>();
        let known: HashSet<&str> = valid.iter().map(|t| t.filename.as_str()).collect();

        match self.curator.select(&valid) {
            Ok(selected) => {
                let mut seen = HashSet::new();
                let accepted: Vec<String> = selected
                    .into_iter()
                    .filter(|name| {
                        let ok = known.contains(name.as_str());
                        if !ok {
                            log::debug!("Curator returned unknown track {}", name);
                        }
                        ok
                    })
                    .filter(|name| seen.insert(name.clone()))
                    .collect();
                if accepted.is_empty() {
                    log::warn!("Curator accepted nothing usable, playing all {} tracks", valid.len());
                    Ok(fallback())
                } else {
                    Ok(accepted)
                }
            }
            Err(e) => {
                log::error!("Curation failed: {}", e);
                Ok(fallback())
            }
        }
    }
}
