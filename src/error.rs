use std::path::PathBuf;

/// Signal load or tempo extraction failed. The file is skipped and never cached.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0} has no decodable samples")]
    EmptySignal(PathBuf),

    #[error("Tempo analyzer returned an empty estimate for {0}")]
    NoTempo(PathBuf),

    #[error("Tempo analyzer returned an invalid tempo ({tempo}) for {path}")]
    InvalidTempo { path: PathBuf, tempo: f64 },

    #[error("Tempo analysis failed for {path}: {source}")]
    Analyzer {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterDesignError {
    #[error("Cutoff {cutoff_hz} Hz is outside (0, {nyquist_hz}) Hz")]
    InvalidCutoff { cutoff_hz: f64, nyquist_hz: f64 },

    #[error("Filter order must be a positive even number, got {0}")]
    InvalidOrder(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Failed to open actuator port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to write actuator command '{command}': {source}")]
    Write {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CurationError {
    #[error("Curation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Curation response had no message content")]
    EmptyResponse,

    #[error("Curation response is not a JSON list of filenames: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Audio output device unavailable: {0}")]
    Device(String),

    #[error("Audio output failed: {0}")]
    Output(String),
}
