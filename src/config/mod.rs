//! Configuration management for the gateway
//!
//! Configuration is a `key=value` properties file rather than TOML: this mirrors
//! the layout the gateway has always shipped with, so operators do not need to
//! migrate existing `config.properties` files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single ICE (STUN/TURN) server entry handed to WebRTC peer connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind host ("" binds all interfaces)
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// Log sink path (relative paths are created under the working directory)
    pub log_file: PathBuf,
    /// Root folder holding one JSON file per camera descriptor
    pub cameras_folder: PathBuf,
    /// Root folder holding the per-camera, per-minute archive tree
    pub recordings_folder: PathBuf,
    /// ICE servers advertised to viewers
    pub ice_servers: Vec<String>,
    pub ice_username: String,
    pub ice_credential: String,
    /// RTSP dial timeout
    pub rtsp_connect_timeout_secs: u64,
    /// RTSP read/write timeout
    pub rtsp_io_timeout_secs: u64,
    /// Pre-roll hint used by playback before it starts emitting packets
    pub rtsp_playback_codec_delay_ms: u64,
    /// Verbose RTSP logging
    pub rtsp_debug: bool,
    /// HTTP basic auth (disabled unless a password is configured)
    pub basic_auth_enabled: bool,
    pub basic_auth_user: String,
    pub basic_auth_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 9090,
            log_file: PathBuf::from("ui.log"),
            cameras_folder: PathBuf::from("cameras"),
            recordings_folder: PathBuf::from("recordings"),
            ice_servers: Vec::new(),
            ice_username: String::new(),
            ice_credential: String::new(),
            rtsp_connect_timeout_secs: 10,
            rtsp_io_timeout_secs: 10,
            rtsp_playback_codec_delay_ms: 3000,
            rtsp_debug: false,
            basic_auth_enabled: false,
            basic_auth_user: String::new(),
            basic_auth_password: String::new(),
        }
    }
}

impl Config {
    /// Resolve the config path per the CLI contract: the last argument is used
    /// if it ends in `.properties`, otherwise the fixed default path is used.
    pub fn resolve_path(args: &[String]) -> PathBuf {
        if let Some(last) = args.last() {
            if last.ends_with(".properties") {
                return PathBuf::from(last);
            }
        }
        PathBuf::from("/app/config.properties")
    }

    /// Load configuration from a `.properties` file, falling back to defaults
    /// for any key that is absent or for a missing file entirely.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Config::default();

        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            apply_key(&mut config, key, value);
        }

        Ok(config)
    }

    /// Validate configuration, mirroring the invariants the gateway has always
    /// enforced on startup.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.port == 0 {
            return Err("HTTP port must be non-zero".into());
        }

        if self.rtsp_connect_timeout_secs == 0 {
            return Err("rtsp.connect.timeout.seconds must be non-zero".into());
        }

        if self.rtsp_io_timeout_secs == 0 {
            return Err("rtsp.io.timeout.seconds must be non-zero".into());
        }

        if self.basic_auth_enabled && self.basic_auth_password.is_empty() {
            return Err("Basic auth is enabled but password is empty".into());
        }

        Ok(())
    }

    /// All ICE servers as structured entries, applying the shared username and
    /// credential to every URL.
    pub fn ice_server_configs(&self) -> Vec<IceServerConfig> {
        self.ice_servers
            .iter()
            .map(|url| IceServerConfig {
                urls: vec![url.clone()],
                username: if self.ice_username.is_empty() {
                    None
                } else {
                    Some(self.ice_username.clone())
                },
                credential: if self.ice_credential.is_empty() {
                    None
                } else {
                    Some(self.ice_credential.clone())
                },
            })
            .collect()
    }
}

fn apply_key(config: &mut Config, key: &str, value: &str) {
    match key {
        "host" => config.host = value.to_string(),
        "port" => {
            if let Ok(v) = value.parse() {
                config.port = v;
            }
        }
        "log.file" => config.log_file = PathBuf::from(value),
        "cameras.folders" => config.cameras_folder = PathBuf::from(value),
        "recordings.folders" => config.recordings_folder = PathBuf::from(value),
        "ice.servers" => {
            config.ice_servers = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "ice.username" => config.ice_username = value.to_string(),
        "ice.credential" => config.ice_credential = value.to_string(),
        "rtsp.connect.timeout.seconds" => {
            if let Ok(v) = value.parse() {
                config.rtsp_connect_timeout_secs = v;
            }
        }
        "rtsp.io.timeout.seconds" => {
            if let Ok(v) = value.parse() {
                config.rtsp_io_timeout_secs = v;
            }
        }
        "rtsp.playback.codec_delay_ms" => {
            if let Ok(v) = value.parse() {
                config.rtsp_playback_codec_delay_ms = v;
            }
        }
        "rtsp.debug" => config.rtsp_debug = value.eq_ignore_ascii_case("true"),
        "http.basic_auth.enabled" => config.basic_auth_enabled = value.eq_ignore_ascii_case("true"),
        "http.basic_auth.user" => config.basic_auth_user = value.to_string(),
        "http.basic_auth.password" => config.basic_auth_password = value.to_string(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_basic_auth_password() {
        let mut cfg = Config::default();
        cfg.basic_auth_enabled = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn resolve_path_prefers_trailing_properties_arg() {
        let args = vec!["program".to_string(), "/etc/gateway.properties".to_string()];
        assert_eq!(Config::resolve_path(&args), PathBuf::from("/etc/gateway.properties"));
    }

    #[test]
    fn resolve_path_falls_back_to_default() {
        let args = vec!["program".to_string()];
        assert_eq!(Config::resolve_path(&args), PathBuf::from("/app/config.properties"));
    }

    #[test]
    fn parses_properties_file() {
        let dir = std::env::temp_dir().join(format!("gw-cfg-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.properties");
        std::fs::write(
            &path,
            "# comment\nport=9999\nice.servers=stun:a.example:3478, stun:b.example:3478\nrtsp.debug=true\n",
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.ice_servers, vec!["stun:a.example:3478", "stun:b.example:3478"]);
        assert!(cfg.rtsp_debug);

        std::fs::remove_dir_all(&dir).ok();
    }
}
