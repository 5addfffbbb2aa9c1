use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::PlaybackError;

/// Thread-safe handle that aborts whatever the sink is currently playing.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

/// Mono audio output with play-and-wait semantics.
pub trait AudioSink {
    /// Play `samples` and block until the device has rendered all of them.
    fn play_blocking(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError>;

    /// Stop any in-flight playback.
    fn stop(&self);

    /// Handle for other threads. Once interrupted, the sink plays nothing more.
    fn interrupter(&self) -> Interrupter;
}

struct GateState<T> {
    active: Option<Arc<T>>,
    halted: bool,
}

/// The playing item plus a latch, under one lock so a halt can never slip
/// between a registration and the wait that follows it.
struct PlaybackGate<T> {
    state: Arc<Mutex<GateState<T>>>,
}

impl<T> Clone for PlaybackGate<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> PlaybackGate<T> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                active: None,
                halted: false,
            })),
        }
    }

    /// Make `item` the active one. False once halted; the item is then not kept.
    fn register(&self, item: &Arc<T>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.halted {
            return false;
        }
        state.active = Some(Arc::clone(item));
        true
    }

    fn take(&self) -> Option<Arc<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).active.take()
    }

    fn halt(&self) -> Option<Arc<T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.halted = true;
        state.active.take()
    }

    /// Forget `item` if it is still the active one.
    fn release(&self, item: &Arc<T>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, item)) {
            state.active = None;
        }
    }
}

/// Default output device through rodio.
///
/// The output stream is bound to the thread that opened it, so build this on
/// the playback thread and hand other threads an [`Interrupter`].
pub struct RodioSink {
    _stream: OutputStream,
    handle: OutputStreamHandle,
    gate: PlaybackGate<Sink>,
}

impl RodioSink {
    pub fn open_default() -> Result<Self, PlaybackError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::Device(e.to_string()))?;
        log::info!("Audio output opened on default device");
        Ok(Self {
            _stream: stream,
            handle,
            gate: PlaybackGate::new(),
        })
    }
}

impl AudioSink for RodioSink {
    fn play_blocking(&self, samples: &[f32], sample_rate: u32) -> Result<(), PlaybackError> {
        self.stop();

        let sink = Sink::try_new(&self.handle).map_err(|e| PlaybackError::Output(e.to_string()))?;
        let sink = Arc::new(sink);
        if !self.gate.register(&sink) {
            return Ok(());
        }
        sink.append(SamplesBuffer::new(1, sample_rate, samples.to_vec()));
        sink.sleep_until_end();
        self.gate.release(&sink);
        Ok(())
    }

    fn stop(&self) {
        if let Some(sink) = self.gate.take() {
            sink.stop();
        }
    }

    fn interrupter(&self) -> Interrupter {
        let gate = self.gate.clone();
        Interrupter::new(move || {
            if let Some(sink) = gate.halt() {
                sink.stop();
            }
        })
    }
}
