//! Tempo-keyed vibration and colour pulses, run beside playback.
//!
//! The coordinator shares only the tempo with the audio path. It is not
//! aligned to filter segment boundaries.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::actuator::{Actuator, ActuatorCommand};
use crate::config::EffectsConfig;
use crate::metadata::MetadataCache;
use crate::playlist::Library;
use crate::status::StatusBoard;

/// Seconds between pulses for `tempo_bpm`, never shorter than `min_pulse`.
pub fn pulse_interval(tempo_bpm: f64, min_pulse: Duration) -> Duration {
    if !(tempo_bpm.is_finite() && tempo_bpm > 0.0) {
        return min_pulse;
    }
    Duration::from_secs_f64(60.0 / tempo_bpm).max(min_pulse)
}

fn resolve_tempo(cache: &MetadataCache, library: &Library, filename: &str, fallback: f64) -> f64 {
    if let Some(metadata) = cache.get(filename) {
        return metadata.tempo;
    }
    match cache.get_or_compute(&library.path(filename)) {
        Ok(metadata) => metadata.tempo,
        Err(e) => {
            log::warn!("No tempo for {} ({}), using {} BPM", filename, e, fallback);
            fallback
        }
    }
}

pub struct EffectsCoordinator {
    actuator: Arc<Actuator>,
    status: Arc<StatusBoard>,
    cache: Arc<MetadataCache>,
    library: Library,
    config: EffectsConfig,
}

impl EffectsCoordinator {
    pub fn new(
        actuator: Arc<Actuator>,
        status: Arc<StatusBoard>,
        cache: Arc<MetadataCache>,
        library: Library,
        config: EffectsConfig,
    ) -> Self {
        Self {
            actuator,
            status,
            cache,
            library,
            config,
        }
    }

    /// Cached tempo for `filename`, computing it on a miss.
    pub fn tempo_for(&self, filename: &str) -> f64 {
        resolve_tempo(&self.cache, &self.library, filename, self.config.fallback_tempo)
    }

    /// Start pulsing for `filename` on a new thread for at most `duration`.
    pub fn spawn(&self, filename: &str, duration: Duration) -> EffectsTask {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let pulse = PulseLoop {
            filename: filename.to_string(),
            actuator: Arc::clone(&self.actuator),
            status: Arc::clone(&self.status),
            cache: Arc::clone(&self.cache),
            library: self.library.clone(),
            config: self.config.clone(),
            duration,
            cancel: cancel_rx,
        };

        let handle = std::thread::Builder::new()
            .name("effects".into())
            .spawn(move || pulse.run());

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                log::error!("Failed to spawn effects thread: {}", e);
                None
            }
        };

        EffectsTask { cancel: cancel_tx, handle }
    }
}

/// Handle to a running effects loop. Dropping it detaches the loop, which
/// still stops on its own deadline.
pub struct EffectsTask {
    cancel: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EffectsTask {
    pub fn cancel(&self) {
        let _ = self.cancel.try_send(());
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Effects thread panicked");
            }
        }
    }
}

struct PulseLoop {
    filename: String,
    actuator: Arc<Actuator>,
    status: Arc<StatusBoard>,
    cache: Arc<MetadataCache>,
    library: Library,
    config: EffectsConfig,
    duration: Duration,
    cancel: Receiver<()>,
}

impl PulseLoop {
    fn run(self) {
        let tempo = resolve_tempo(&self.cache, &self.library, &self.filename, self.config.fallback_tempo);
        // The window starts once the tempo is known, even after a slow analysis
        let deadline = Instant::now() + self.duration;
        let interval = pulse_interval(tempo, self.config.min_pulse());
        log::info!(
            "Effects for {} (tempo: {} BPM, pulse every {:.2}s)",
            self.filename,
            tempo,
            interval.as_secs_f64()
        );

        let mut rng = rand::thread_rng();
        while Instant::now() < deadline {
            if self.status.vibration_enabled() {
                self.send(ActuatorCommand::Vibrate {
                    millis: self.config.vibrate_ms,
                });
            }
            self.send(ActuatorCommand::LedColor {
                r: rng.gen_range(100..=255),
                g: rng.gen_range(100..=255),
                b: rng.gen_range(100..=255),
            });

            match self.cancel.recv_timeout(interval) {
                Ok(()) => {
                    log::debug!("Effects for {} cancelled", self.filename);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Handle dropped: detached, keep running to the deadline
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(interval),
            }
        }
    }

    fn send(&self, command: ActuatorCommand) {
        if let Err(e) = self.actuator.send(&command) {
            log::error!("Actuator error: {}", e);
        }
    }
}
