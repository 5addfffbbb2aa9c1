use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "melotsa", about = "Filtered music playback with tempo-synced vibration and light")]
pub struct Cli {
    /// Config file (defaults to melotsa.toml or the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding the track library
    #[arg(short, long)]
    pub audio_dir: Option<PathBuf>,

    /// Address for the web interface (e.g. 0.0.0.0:3000)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Serial port of the actuator device
    #[arg(long)]
    pub serial_port: Option<String>,

    /// Log actuator commands instead of opening the serial port
    #[arg(long)]
    pub simulate_actuator: bool,

    /// OpenAI-compatible chat-completions URL used to curate playlists
    #[arg(long)]
    pub curation_endpoint: Option<String>,

    /// Also append log output to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
