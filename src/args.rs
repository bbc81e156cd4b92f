use clap::Parser;
use std::path::PathBuf;

use camera_gateway::config;

/// CLI flags. The engine's real configuration surface is the properties file
/// (see [`config::Config`]); flags here only override the config path and
/// logging/runtime posture, mirroring the teacher's verbosity/foreground
/// overrides rather than re-exposing every config key as a flag.
#[derive(Parser, Debug)]
#[command(name = "camera-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-camera RTSP/WebRTC video gateway", long_about = None)]
pub struct Args {
    /// Configuration file path, or the bare config argument per the
    /// `.properties`-suffix convention described in the config module.
    #[arg(default_value = "/app/config.properties")]
    pub config: PathBuf,

    /// HTTP bind port override.
    #[arg(long)]
    pub port: Option<u16>,

    /// Verbose logging.
    #[arg(short, long, action)]
    pub verbose: bool,

    /// Run in foreground (don't daemonize).
    #[arg(long, action)]
    pub foreground: bool,
}

impl Args {
    pub fn resolve_config_path(&self) -> PathBuf {
        config::Config::resolve_path(&[self.config.to_string_lossy().to_string()])
    }

    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.resolve_config_path())
    }
}
