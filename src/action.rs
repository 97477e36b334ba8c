use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use log::info;

use crate::config::Config;

/// Something the timer does when it runs out
pub trait Action: Send + Sync + 'static {
    /// Perform the action once
    fn invoke(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Pauses Music Player Daemon by running `mpc pause`
#[derive(Clone, Debug)]
pub struct MpcPause {
    command: String,
    mpd_host: String,
    mpd_port: u16,
    timeout: Duration,
}

impl MpcPause {
    pub fn new(command: &str, mpd_host: &str, mpd_port: u16, timeout: Duration) -> Self {
        Self {
            command: command.to_string(),
            mpd_host: mpd_host.to_string(),
            mpd_port,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.mpc_command,
            &config.mpd_host,
            config.mpd_port,
            config.pause_timeout,
        )
    }

    fn args(&self) -> [String; 3] {
        [
            format!("--host={}", self.mpd_host),
            format!("--port={}", self.mpd_port),
            "pause".to_string(),
        ]
    }
}

impl Action for MpcPause {
    async fn invoke(&self) -> Result<()> {
        info!(
            "Pausing MPD at {}",
            format!("{}:{}", self.mpd_host, self.mpd_port).cyan()
        );

        let child = tokio::process::Command::new(&self.command)
            .args(self.args())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .with_context(|| format!("{} did not finish within {:?}", self.command, self.timeout))?
            .with_context(|| format!("Failed to execute {}", self.command))?;

        if !output.status.success() {
            bail!(
                "Error calling command: {} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        info!("{}", String::from_utf8_lossy(&output.stdout).trim());

        Ok(())
    }
}
