use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use log::{debug, info, warn};
use tokio::net::TcpListener;

use mpd_auto_stop::config::{self, Config};
use mpd_auto_stop::{server, MpcPause, Timer};

/// MPD Auto Stop - auto stopping Music Player Daemon, by setting up timers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to run the server on [default: 0.0.0.0]
    #[arg(short = 'a', long)]
    host: Option<String>,
    /// Port the server should listen on [default: 9090]
    #[arg(short, long)]
    port: Option<u16>,
    /// Host where mpd runs [default: localhost]
    #[arg(long)]
    mpd_host: Option<String>,
    /// Port where mpd listens on [default: 6600]
    #[arg(long)]
    mpd_port: Option<u16>,
    /// Config file to use. [default: ${XDG_CONFIG_DIR}/mpd-auto-stop/config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

impl Args {
    /// Command-line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }

        if let Some(port) = self.port {
            config.port = port;
        }

        if let Some(mpd_host) = &self.mpd_host {
            config.mpd_host = mpd_host.clone();
        }

        if let Some(mpd_port) = self.mpd_port {
            config.mpd_port = mpd_port;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Unable to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, stopping server..."),
        _ = terminate => info!("Received SIGTERM, stopping server..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.verbosity.log_level_filter())
        .init();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };

    let mut config = Config::load_or_default(&config_path)?;
    debug!(
        "Using config file {}",
        config_path.display().to_string().cyan()
    );
    args.apply(&mut config);

    let timer = Timer::new(MpcPause::from_config(&config));

    let address = config.listen_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Unable to listen on {}", address))?;

    server::serve(listener, timer, shutdown_signal()).await
}
