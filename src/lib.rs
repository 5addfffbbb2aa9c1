pub mod actuator;
pub mod audio;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod playback;
pub mod playlist;
pub mod server;
pub mod status;
