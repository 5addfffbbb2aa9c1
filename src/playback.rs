//! The playback state machine and the thread that runs it.
//!
//! One cycle fetches a playlist, shuffles it and plays every track in turn.
//! An empty playlist waits `idle_delay`; a failure to build one waits
//! `error_backoff`. Both waits end early on shutdown.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{decode_audio, AudioSink, Interrupter};
use crate::config::PlaybackConfig;
use crate::dsp::SegmentFilterEngine;
use crate::effects::{EffectsCoordinator, EffectsTask};
use crate::error::PlaybackError;
use crate::metadata::MetadataCache;
use crate::playlist::{Library, PlaylistSource};
use crate::status::StatusBoard;

/// Everything the loop needs apart from the audio sink.
pub struct PlaybackParts {
    pub library: Library,
    pub playlist: PlaylistSource,
    pub cache: Arc<MetadataCache>,
    pub engine: SegmentFilterEngine,
    pub effects: EffectsCoordinator,
    pub status: Arc<StatusBoard>,
    pub config: PlaybackConfig,
    pub effects_duration: Duration,
}

pub struct PlaybackLoop<S: AudioSink> {
    sink: S,
    parts: PlaybackParts,
    shutdown: Receiver<()>,
    stopped: bool,
    current_effects: Option<EffectsTask>,
}

impl<S: AudioSink> PlaybackLoop<S> {
    /// `shutdown` ends the loop on a message or once every sender is gone.
    pub fn new(sink: S, parts: PlaybackParts, shutdown: Receiver<()>) -> Self {
        Self {
            sink,
            parts,
            shutdown,
            stopped: false,
            current_effects: None,
        }
    }

    pub fn run(&mut self) {
        log::info!("Playback loop started");
        let mut rng = rand::thread_rng();

        while !self.should_stop() {
            match self.parts.playlist.generate() {
                Ok(playlist) if playlist.is_empty() => {
                    let delay = self.parts.config.idle_delay();
                    log::info!("Playlist empty, retrying in {:.0}s", delay.as_secs_f64());
                    self.wait(delay);
                }
                Ok(mut playlist) => {
                    playlist.shuffle(&mut rng);
                    log::info!("Starting playlist of {} tracks", playlist.len());
                    let mut played = 0;
                    for filename in &playlist {
                        if self.should_stop() {
                            break;
                        }
                        if self.play_track(filename, &mut rng) {
                            played += 1;
                        }
                    }
                    if played == 0 && !self.should_stop() {
                        let delay = self.parts.config.error_backoff();
                        log::warn!("No track of the cycle could be played, retrying in {:.0}s", delay.as_secs_f64());
                        self.wait(delay);
                    }
                }
                Err(e) => {
                    let delay = self.parts.config.error_backoff();
                    log::error!("Playlist generation failed: {:#}", e);
                    self.wait(delay);
                }
            }
        }

        if let Some(task) = self.current_effects.take() {
            task.cancel();
        }
        self.sink.stop();
        log::info!("Playback loop stopped");
    }

    /// True when the track reached the output and finished.
    fn play_track<R: Rng + ?Sized>(&mut self, filename: &str, rng: &mut R) -> bool {
        log::info!("Now playing: {}", filename);
        self.parts.status.set_track(filename);

        let path = self.parts.library.path(filename);
        if let Err(e) = self.parts.cache.get_or_compute(&path) {
            log::error!("Skipping {}: {}", filename, e);
            return false;
        }

        // The previous task is detached and ends on its own deadline
        self.current_effects = Some(self.parts.effects.spawn(filename, self.parts.effects_duration));

        match self.render_and_play(filename, rng) {
            Ok(played) => played,
            Err(e) => {
                log::error!("Playback of {} failed: {}", filename, e);
                false
            }
        }
    }

    fn render_and_play<R: Rng + ?Sized>(&mut self, filename: &str, rng: &mut R) -> Result<bool, PlaybackError> {
        let path = self.parts.library.path(filename);
        let audio = decode_audio(&path).map_err(|source| PlaybackError::Decode { path, source })?;

        let filtered = match self.parts.engine.process(&audio.samples, audio.sample_rate, rng) {
            Ok(samples) => samples,
            Err(e) => {
                log::error!("Filter design failed for {}, aborting track: {}", filename, e);
                return Ok(false);
            }
        };

        if self.should_stop() {
            return Ok(false);
        }
        self.sink.stop();
        self.sink.play_blocking(&filtered, audio.sample_rate)?;
        Ok(true)
    }

    fn should_stop(&mut self) -> bool {
        if !self.stopped {
            self.stopped = match self.shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.stopped
    }

    fn wait(&mut self, delay: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = match self.shutdown.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
    }
}

/// Owns the playback thread.
pub struct PlaybackSupervisor {
    shutdown: Option<Sender<()>>,
    interrupter: Interrupter,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackSupervisor {
    /// Start the loop on a new thread. The sink is built there by `make_sink`,
    /// since audio devices are tied to the thread that opened them.
    pub fn spawn<S, F>(make_sink: F, parts: PlaybackParts) -> Result<Self, PlaybackError>
    where
        S: AudioSink + 'static,
        F: FnOnce() -> Result<S, PlaybackError> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<Interrupter, PlaybackError>>(1);

        let handle = std::thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sink.interrupter()));
                PlaybackLoop::new(sink, parts, shutdown_rx).run();
            })
            .map_err(|e| PlaybackError::Device(format!("failed to spawn playback thread: {}", e)))?;

        let interrupter = match ready_rx.recv() {
            Ok(Ok(interrupter)) => interrupter,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(PlaybackError::Device("playback thread exited during startup".into()));
            }
        };

        Ok(Self {
            shutdown: Some(shutdown_tx),
            interrupter,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        log::info!("Stopping playback");
        self.shutdown.take();
        self.interrupter.interrupt();
        if handle.join().is_err() {
            log::error!("Playback thread panicked");
        }
    }
}

impl Drop for PlaybackSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::tests::RecordingLink;
    use crate::actuator::Actuator;
    use crate::audio::decode::tests::write_wav;
    use crate::audio::TempoEstimate;
    use crate::config::{EffectsConfig, FilterConfig};
    use crate::metadata::tests::FixedAnalyzer;
    use crate::playlist::tests::{library_with, FixedCurator};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    struct Played {
        filename: Option<String>,
        had_filter: bool,
        len: usize,
        sample_rate: u32,
    }

    /// Records what was on the status board at each play and shuts the loop
    /// down after `stop_after` tracks.
    struct RecordingSink {
        status: Arc<StatusBoard>,
        plays: Arc<Mutex<Vec<Played>>>,
        stop_after: usize,
        shutdown: Mutex<Option<Sender<()>>>,
    }

    impl AudioSink for RecordingSink {
        fn play_blocking(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError> {
            let snapshot = self.status.snapshot();
            let mut plays = self.plays.lock().unwrap();
            plays.push(Played {
                filename: snapshot.filename.clone(),
                had_filter: snapshot.filter_params.is_some(),
                len: samples.len(),
                sample_rate,
            });
            if plays.len() >= self.stop_after {
                self.shutdown.lock().unwrap().take();
            }
            Ok(())
        }

        fn stop(&self) {}

        fn interrupter(&self) -> Interrupter {
            Interrupter::noop()
        }
    }

    /// Blocks in `play_blocking` until interrupted.
    struct BlockingSink {
        started: Sender<()>,
        stop_tx: Sender<()>,
        stop_rx: Receiver<()>,
    }

    impl AudioSink for BlockingSink {
        fn play_blocking(&self, _samples: &[f32], _sample_rate: u32) -> Result<(), PlaybackError> {
            let _ = self.started.try_send(());
            let _ = self.stop_rx.recv_timeout(Duration::from_secs(30));
            Ok(())
        }

        fn stop(&self) {}

        fn interrupter(&self) -> Interrupter {
            let stop = self.stop_tx.clone();
            Interrupter::new(move || {
                let _ = stop.try_send(());
            })
        }
    }

    /// Fails every play and counts the attempts.
    struct FailingSink {
        attempts: Arc<AtomicUsize>,
    }

    impl AudioSink for FailingSink {
        fn play_blocking(&self, _samples: &[f32], _sample_rate: u32) -> Result<(), PlaybackError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(PlaybackError::Output("device unplugged".into()))
        }

        fn stop(&self) {}

        fn interrupter(&self) -> Interrupter {
            Interrupter::noop()
        }
    }

    fn recording_sink(status: &Arc<StatusBoard>, stop_after: usize, tx: Sender<()>) -> (RecordingSink, Arc<Mutex<Vec<Played>>>) {
        let plays = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            status: Arc::clone(status),
            plays: Arc::clone(&plays),
            stop_after,
            shutdown: Mutex::new(Some(tx)),
        };
        (sink, plays)
    }

    fn names(plays: &Mutex<Vec<Played>>) -> Vec<String> {
        plays.lock().unwrap().iter().filter_map(|p| p.filename.clone()).collect()
    }

    /// Write through a name the library ignores, then move it into place.
    fn drop_in(dir: &Path, name: &str, sample_rate: u32) {
        let staging = dir.join(format!("{}.part", name));
        write_wav(&staging, &[0.2; 1600], sample_rate, 1);
        std::fs::rename(staging, dir.join(name)).unwrap();
    }

    fn parts(library: Library, curator: FixedCurator, status: &Arc<StatusBoard>, link: &RecordingLink) -> PlaybackParts {
        let cache = Arc::new(MetadataCache::new(Arc::new(FixedAnalyzer::new(TempoEstimate::Scalar(100.0)))));
        let actuator = Arc::new(Actuator::new(Box::new(link.clone()), Duration::ZERO));
        let effects = EffectsCoordinator::new(
            actuator,
            Arc::clone(status),
            Arc::clone(&cache),
            library.clone(),
            EffectsConfig::default(),
        );
        PlaybackParts {
            playlist: PlaylistSource::new(library.clone(), Arc::clone(&cache), Box::new(curator)),
            library,
            cache,
            engine: SegmentFilterEngine::new(FilterConfig {
                switch_interval: 0.1,
                transition_duration: 0.01,
                ..FilterConfig::default()
            })
            .with_status(Arc::clone(status)),
            effects,
            status: Arc::clone(status),
            config: PlaybackConfig {
                idle_delay: 60.0,
                error_backoff: 60.0,
            },
            effects_duration: Duration::from_millis(50),
        }
    }

    #[test]
    fn plays_curated_tracks_each_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &["a.wav", "b.wav", "c.wav"]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let curator = FixedCurator(Ok(vec!["c.wav".into(), "a.wav".into()]));

        let (tx, rx) = bounded::<()>(1);
        let plays = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            status: Arc::clone(&status),
            plays: Arc::clone(&plays),
            stop_after: 4,
            shutdown: Mutex::new(Some(tx)),
        };

        PlaybackLoop::new(sink, parts(library, curator, &status, &link), rx).run();

        let plays = plays.lock().unwrap().clone();
        assert_eq!(plays.len(), 4);
        for cycle in plays.chunks(2) {
            let mut names: Vec<_> = cycle.iter().map(|p| p.filename.clone().unwrap()).collect();
            names.sort();
            assert_eq!(names, vec!["a.wav", "c.wav"]);
        }
        for played in &plays {
            assert!(played.had_filter);
            assert_eq!(played.len, 1600);
            assert_eq!(played.sample_rate, 8000);
        }
    }

    #[test]
    fn unanalysable_track_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &["a.wav"]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let plays = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            status: Arc::clone(&status),
            plays: Arc::clone(&plays),
            stop_after: 1,
            shutdown: Mutex::new(Some(tx)),
        };

        let mut playback = PlaybackLoop::new(sink, parts(library, FixedCurator(Ok(vec![])), &status, &link), rx);
        playback.play_track("ghost.wav", &mut rand::thread_rng());

        assert!(plays.lock().unwrap().is_empty());
        assert_eq!(status.snapshot().filename.as_deref(), Some("ghost.wav"));
        assert!(playback.current_effects.is_none());
    }

    #[test]
    fn idle_wait_ends_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &[]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let sink = RecordingSink {
            status: Arc::clone(&status),
            plays: Arc::default(),
            stop_after: usize::MAX,
            shutdown: Mutex::new(None),
        };

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            tx.send(()).unwrap();
        });
        let started = Instant::now();
        PlaybackLoop::new(sink, parts(library, FixedCurator(Ok(vec![])), &status, &link), rx).run();
        stopper.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn error_backoff_ends_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(dir.path().join("missing"), vec!["wav".into()]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let sink = RecordingSink {
            status: Arc::clone(&status),
            plays: Arc::default(),
            stop_after: usize::MAX,
            shutdown: Mutex::new(None),
        };

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(tx);
        });
        let started = Instant::now();
        PlaybackLoop::new(sink, parts(library, FixedCurator(Ok(vec![])), &status, &link), rx).run();
        stopper.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn supervisor_interrupts_playback_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &["a.wav"]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (started_tx, started_rx) = bounded::<()>(1);

        let supervisor = PlaybackSupervisor::spawn(
            move || {
                let (stop_tx, stop_rx) = bounded(1);
                Ok(BlockingSink {
                    started: started_tx,
                    stop_tx,
                    stop_rx,
                })
            },
            parts(library, FixedCurator(Ok(vec![])), &status, &link),
        )
        .unwrap();

        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(supervisor.is_running());
        assert_eq!(status.snapshot().filename.as_deref(), Some("a.wav"));

        let started = Instant::now();
        supervisor.shutdown();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn supervisor_reports_sink_failure() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &[]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();

        let result = PlaybackSupervisor::spawn(
            || Err::<RecordingSink, _>(PlaybackError::Device("no output device".into())),
            parts(library, FixedCurator(Ok(vec![])), &status, &link),
        );
        assert!(matches!(result, Err(PlaybackError::Device(_))));
    }

    #[test]
    fn filter_design_failure_moves_on_to_the_next_track() {
        let dir = tempfile::tempdir().unwrap();
        // Cutoffs above the 8 kHz file's Nyquist but below the 22.05 kHz one's
        let library = library_with(dir.path(), &["lo.wav"]);
        write_wav(&dir.path().join("hi.wav"), &[0.2; 2205], 22_050, 1);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let (sink, plays) = recording_sink(&status, 2, tx);

        let mut parts = parts(library, FixedCurator(Ok(vec![])), &status, &link);
        parts.engine = SegmentFilterEngine::new(FilterConfig {
            switch_interval: 0.1,
            transition_duration: 0.01,
            lowpass_range: [5000.0, 6000.0],
            highpass_range: [5000.0, 6000.0],
            ..FilterConfig::default()
        })
        .with_status(Arc::clone(&status));

        PlaybackLoop::new(sink, parts, rx).run();

        assert_eq!(names(&plays), vec!["hi.wav", "hi.wav"]);
        assert!(plays.lock().unwrap().iter().all(|p| p.sample_rate == 22_050));
    }

    #[test]
    fn undecodable_track_is_skipped_after_effects_start() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &["a.wav"]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let (sink, plays) = recording_sink(&status, 1, tx);

        let parts = parts(library.clone(), FixedCurator(Ok(vec![])), &status, &link);
        parts.cache.get_or_compute(&library.path("a.wav")).unwrap();
        std::fs::write(library.path("a.wav"), b"truncated upload").unwrap();

        let mut playback = PlaybackLoop::new(sink, parts, rx);
        assert!(!playback.play_track("a.wav", &mut rand::thread_rng()));

        assert!(plays.lock().unwrap().is_empty());
        assert_eq!(status.snapshot().filename.as_deref(), Some("a.wav"));
        assert!(playback.current_effects.is_some());
    }

    #[test]
    fn empty_library_is_polled_until_a_track_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &[]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let (sink, plays) = recording_sink(&status, 1, tx);

        let mut parts = parts(library, FixedCurator(Ok(vec![])), &status, &link);
        parts.config.idle_delay = 0.1;

        let path = dir.path().to_path_buf();
        let uploader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop_in(&path, "late.wav", 8000);
        });
        PlaybackLoop::new(sink, parts, rx).run();
        uploader.join().unwrap();

        assert_eq!(names(&plays), vec!["late.wav"]);
    }

    #[test]
    fn listing_failure_is_retried_after_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let audio_dir = dir.path().join("audio");
        let library = Library::new(audio_dir.clone(), vec!["wav".into()]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let (sink, plays) = recording_sink(&status, 1, tx);

        let mut parts = parts(library, FixedCurator(Ok(vec![])), &status, &link);
        parts.config.error_backoff = 0.1;

        let creator = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::create_dir(&audio_dir).unwrap();
            drop_in(&audio_dir, "a.wav", 8000);
        });
        PlaybackLoop::new(sink, parts, rx).run();
        creator.join().unwrap();

        assert_eq!(names(&plays), vec!["a.wav"]);
    }

    #[test]
    fn cycle_that_plays_nothing_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let library = library_with(dir.path(), &["a.wav"]);
        let status = Arc::new(StatusBoard::new());
        let link = RecordingLink::default();
        let (tx, rx) = bounded::<()>(1);
        let attempts = Arc::new(AtomicUsize::new(0));
        let sink = FailingSink {
            attempts: Arc::clone(&attempts),
        };

        let mut parts = parts(library, FixedCurator(Ok(vec![])), &status, &link);
        parts.config.error_backoff = 0.2;

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            drop(tx);
        });
        PlaybackLoop::new(sink, parts, rx).run();
        stopper.join().unwrap();

        let attempts = attempts.load(Ordering::SeqCst);
        assert!((1..=3).contains(&attempts), "{attempts} attempts");
    }
}
