use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

/// Parameters of the alternating low-pass/high-pass process.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Seconds between filter changes.
    #[serde(default = "default_switch_interval")]
    pub switch_interval: f64,
    #[serde(default = "default_lowpass_range")]
    pub lowpass_range: [f64; 2],
    #[serde(default = "default_highpass_range")]
    pub highpass_range: [f64; 2],
    /// Crossfade length at segment boundaries, in seconds.
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,
    #[serde(default = "default_random_switch_prob")]
    pub random_switch_prob: f64,
    #[serde(default = "default_order")]
    pub order: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EffectsConfig {
    /// How long the effects run per track, in seconds.
    #[serde(default = "default_effect_duration")]
    pub duration: f64,
    #[serde(default = "default_min_pulse")]
    pub min_pulse: f64,
    #[serde(default = "default_vibrate_ms")]
    pub vibrate_ms: u32,
    #[serde(default = "default_fallback_tempo")]
    pub fallback_tempo: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_idle_delay")]
    pub idle_delay: f64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    /// Set to false to force simulation mode.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_command_spacing_ms")]
    pub command_spacing_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurationConfig {
    /// Chat-completions endpoint. Curation is skipped when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_curation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Session log; every log line is appended here as well as to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            extensions: default_extensions(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            switch_interval: default_switch_interval(),
            lowpass_range: default_lowpass_range(),
            highpass_range: default_highpass_range(),
            transition_duration: default_transition_duration(),
            random_switch_prob: default_random_switch_prob(),
            order: default_order(),
        }
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            duration: default_effect_duration(),
            min_pulse: default_min_pulse(),
            vibrate_ms: default_vibrate_ms(),
            fallback_tempo: default_fallback_tempo(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            idle_delay: default_idle_delay(),
            error_backoff: default_error_backoff(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            baud_rate: default_baud_rate(),
            command_spacing_ms: default_command_spacing_ms(),
        }
    }
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_curation_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// Longest wait or effect window a config may ask for.
pub const MAX_DELAY_SECS: f64 = 86_400.0;

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DELAY_SECS)).unwrap_or(Duration::ZERO)
}

impl EffectsConfig {
    pub fn duration(&self) -> Duration {
        secs(self.duration)
    }

    pub fn min_pulse(&self) -> Duration {
        secs(self.min_pulse)
    }
}

impl PlaybackConfig {
    pub fn idle_delay(&self) -> Duration {
        secs(self.idle_delay)
    }

    pub fn error_backoff(&self) -> Duration {
        secs(self.error_backoff)
    }
}

impl Config {
    /// Reject settings that would break the cutoff-range invariant or the segment walk.
    pub fn validate(&self) -> anyhow::Result<()> {
        let f = &self.filter;
        if !(f.switch_interval > 0.0 && f.switch_interval.is_finite()) {
            anyhow::bail!("filter.switch_interval must be positive, got {}", f.switch_interval);
        }
        if !(f.transition_duration >= 0.0 && f.transition_duration.is_finite()) {
            anyhow::bail!(
                "filter.transition_duration must not be negative, got {}",
                f.transition_duration
            );
        }
        if !(0.0..=1.0).contains(&f.random_switch_prob) {
            anyhow::bail!(
                "filter.random_switch_prob must be within [0, 1], got {}",
                f.random_switch_prob
            );
        }
        for (name, [lo, hi]) in [("lowpass_range", f.lowpass_range), ("highpass_range", f.highpass_range)] {
            if !(lo > 0.0 && lo <= hi) {
                anyhow::bail!("filter.{} must satisfy 0 < low <= high, got [{}, {}]", name, lo, hi);
            }
        }
        if f.order == 0 || f.order % 2 != 0 {
            anyhow::bail!("filter.order must be a positive even number, got {}", f.order);
        }
        if !(self.effects.fallback_tempo > 0.0 && self.effects.fallback_tempo.is_finite()) {
            anyhow::bail!("effects.fallback_tempo must be positive");
        }
        for (name, value) in [
            ("effects.duration", self.effects.duration),
            ("effects.min_pulse", self.effects.min_pulse),
            ("playback.idle_delay", self.playback.idle_delay),
            ("playback.error_backoff", self.playback.error_backoff),
        ] {
            if !(0.0..=MAX_DELAY_SECS).contains(&value) {
                anyhow::bail!("{} must be within [0, {}] seconds, got {}", name, MAX_DELAY_SECS, value);
            }
        }
        Ok(())
    }
}

fn default_audio_dir() -> PathBuf { PathBuf::from("audio_wav") }
fn default_extensions() -> Vec<String> { vec!["mp3".into(), "wav".into(), "flac".into()] }
fn default_switch_interval() -> f64 { 60.0 }
fn default_lowpass_range() -> [f64; 2] { [400.0, 800.0] }
fn default_highpass_range() -> [f64; 2] { [150.0, 300.0] }
fn default_transition_duration() -> f64 { 0.1 }
fn default_random_switch_prob() -> f64 { 0.3 }
fn default_order() -> usize { crate::dsp::DEFAULT_ORDER }
fn default_effect_duration() -> f64 { 3.0 }
fn default_min_pulse() -> f64 { 0.3 }
fn default_vibrate_ms() -> u32 { 200 }
fn default_fallback_tempo() -> f64 { 80.0 }
fn default_idle_delay() -> f64 { 10.0 }
fn default_error_backoff() -> f64 { 5.0 }
fn default_true() -> bool { true }
fn default_port() -> String { "/dev/ttyUSB0".into() }
fn default_baud_rate() -> u32 { 9600 }
fn default_command_spacing_ms() -> u64 { 100 }
fn default_model() -> String { "gpt-4".into() }
fn default_temperature() -> f32 { 0.3 }
fn default_curation_timeout() -> u64 { 30 }
fn default_bind() -> String { "0.0.0.0:3000".into() }
fn default_max_upload_mb() -> u64 { 200 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit path first, then `melotsa.toml` in the working directory, then the user config dirs.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("melotsa.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("melotsa").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("melotsa").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
