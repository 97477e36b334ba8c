use std::{fs::read_to_string, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

/// Global configuration values
///
/// The configuration is stored in a TOML file in the current user's config
/// directory, which is `~/.config/mpd-auto-stop/config.toml` by default.
/// The file is optional; every field falls back to its default, and
/// command-line flags take precedence over whatever the file says.
///
/// ## File Format
///
/// The configuration file is written as a TOML file.
/// See the documentation for each field to learn how they are serialized.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to
    ///
    /// Default is `0.0.0.0`, i.e. every interface.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the HTTP server listens on
    ///
    /// Default is 9090.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host where MPD runs
    ///
    /// Default is `localhost`.
    #[serde(default = "default_mpd_host")]
    pub mpd_host: String,
    /// Port MPD listens on
    ///
    /// Default is 6600.
    #[serde(default = "default_mpd_port")]
    pub mpd_port: u16,
    /// The `mpc` executable used to pause MPD
    ///
    /// Default is `mpc`, looked up on the `PATH`.
    #[serde(default = "default_mpc_command")]
    pub mpc_command: String,
    /// How long the pause command may take before it is killed
    ///
    /// Default is 10 seconds.
    /// Serialized as an integer count of seconds.
    #[serde(default = "default_pause_timeout", with = "crate::duration::seconds")]
    pub pause_timeout: Duration,
}

impl Config {
    /// Reads a TOML config file
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            let config_str = read_to_string(path)
                .with_context(|| format!("Unable to read config file {}", path.display()))?;

            toml::from_str(&config_str)
                .map(Some)
                .with_context(|| "Failed to parse config from TOML")
        } else {
            Ok(None)
        }
    }

    /// Reads a TOML config file, or uses the defaults if there isn't one
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Ok(Self::load(path)?.unwrap_or_default())
    }

    /// The address the HTTP server should bind to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mpd_host: default_mpd_host(),
            mpd_port: default_mpd_port(),
            mpc_command: default_mpc_command(),
            pause_timeout: default_pause_timeout(),
        }
    }
}

/// Get the default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    let conf_path = ProjectDirs::from("", "", "mpd-auto-stop")
        .with_context(|| "Unable to determine XDG directories")?
        .config_dir()
        .join("config.toml");

    Ok(conf_path)
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_mpd_host() -> String {
    "localhost".to_string()
}

fn default_mpd_port() -> u16 {
    6600
}

fn default_mpc_command() -> String {
    "mpc".to_string()
}

fn default_pause_timeout() -> Duration {
    Duration::from_secs(10)
}
