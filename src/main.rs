mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use cli::Cli;
use melotsa::actuator::Actuator;
use melotsa::audio::{RodioSink, SpectralFluxAnalyzer};
use melotsa::config::{self, Config};
use melotsa::dsp::SegmentFilterEngine;
use melotsa::effects::EffectsCoordinator;
use melotsa::logging::SessionLog;
use melotsa::metadata::MetadataCache;
use melotsa::playback::{PlaybackParts, PlaybackSupervisor};
use melotsa::playlist::{AcceptAll, HttpCurator, Library, PlaylistSource, TrackCurator};
use melotsa::server::{self, AppState};
use melotsa::status::StatusBoard;

fn main() -> Result<()> {
    let session_log = SessionLog::install();

    let cli = Cli::parse();

    let mut cfg = match config::find_config(cli.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}, using defaults", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    // CLI flags win over the config file
    if let Some(dir) = cli.audio_dir {
        cfg.library.audio_dir = dir;
    }
    if let Some(bind) = cli.bind {
        cfg.server.bind = bind;
    }
    if let Some(port) = cli.serial_port {
        cfg.actuator.port = port;
    }
    if cli.simulate_actuator {
        cfg.actuator.enabled = false;
    }
    if cli.curation_endpoint.is_some() {
        cfg.curation.endpoint = cli.curation_endpoint;
    }
    if cli.log_file.is_some() {
        cfg.logging.file = cli.log_file;
    }
    if let Ok(key) = std::env::var("MELOTSA_CURATION_KEY") {
        if !key.is_empty() {
            cfg.curation.api_key = Some(key);
        }
    }
    if let Some(path) = &cfg.logging.file {
        session_log.attach(path)?;
        log::info!("Logging to {}", path.display());
    }
    cfg.validate().context("Invalid configuration")?;

    log::info!("melotsa - filtered listening sessions");
    log::info!("Audio directory: {}", cfg.library.audio_dir.display());

    let library = Library::from_config(&cfg.library);
    library.ensure_exists()?;

    let status = Arc::new(StatusBoard::new());
    let cache = Arc::new(MetadataCache::new(Arc::new(SpectralFluxAnalyzer)));

    let actuator = Arc::new(Actuator::open(&cfg.actuator));
    status.set_actuator_attached(actuator.is_attached());

    let curator: Box<dyn TrackCurator> = match cfg.curation.endpoint.clone() {
        Some(endpoint) => {
            log::info!("Curating playlists through {}", endpoint);
            Box::new(HttpCurator::new(endpoint, &cfg.curation)?)
        }
        None => {
            log::info!("No curation endpoint configured, every analysed track is eligible");
            Box::new(AcceptAll)
        }
    };

    let parts = PlaybackParts {
        library: library.clone(),
        playlist: PlaylistSource::new(library.clone(), Arc::clone(&cache), curator),
        cache: Arc::clone(&cache),
        engine: SegmentFilterEngine::new(cfg.filter.clone()).with_status(Arc::clone(&status)),
        effects: EffectsCoordinator::new(
            Arc::clone(&actuator),
            Arc::clone(&status),
            Arc::clone(&cache),
            library.clone(),
            cfg.effects.clone(),
        ),
        status: Arc::clone(&status),
        config: cfg.playback.clone(),
        effects_duration: cfg.effects.duration(),
    };

    let supervisor = match PlaybackSupervisor::spawn(RodioSink::open_default, parts) {
        Ok(supervisor) => Some(supervisor),
        Err(e) => {
            log::error!("Playback disabled: {}", e);
            None
        }
    };

    let state = Arc::new(AppState::new(status, cache, library, &cfg.server));
    let served = server::serve(state, &cfg.server.bind);

    if let Some(supervisor) = supervisor {
        supervisor.shutdown();
    }
    served
}
