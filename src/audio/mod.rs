pub mod analysis;
pub mod decode;
pub mod output;

pub use analysis::{SpectralFluxAnalyzer, TempoAnalyzer, TempoEstimate, TrackAnalysis};
pub use decode::{decode_audio, AudioData};
pub use output::{AudioSink, Interrupter, RodioSink};
