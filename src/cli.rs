//! Command-line surface and logging bootstrap (§4.8). Mirrors the
//! `pre_run`-then-dispatch shape this repository used for its
//! subcommand tree, collapsed to the proxy's single entry point.

use std::{fs::File, net::SocketAddr, path::PathBuf, sync::Mutex};

use clap::Parser;
use clap_verbosity_flag::Verbosity;
use eyre::Result;
use reqwest::Url;
use tracing_error::ErrorLayer;
use tracing_log::AsTrace;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[derive(Parser)]
#[command(name = "jhproxy", about = "SSH proxy onto a per-user JupyterHub backend")]
pub struct Root {
    /// Base URL of the JupyterHub Hub to authenticate and provision
    /// against, e.g. `https://hub.example.org`.
    pub hub_url: Url,

    /// Port to listen for incoming SSH connections on.
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// Directory to load `ssh_host_{ecdsa,ed25519,rsa}_key` from.
    #[arg(short = 'k', long, default_value = "/etc/ssh")]
    pub host_key_dir: PathBuf,

    /// Address the `/metrics` endpoint listens on.
    #[arg(long, default_value = "127.0.0.1:9090")]
    pub metrics_addr: SocketAddr,

    /// Log destination; stderr if omitted.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Verbosity level, pass extra v's to increase verbosity.
    #[command(flatten)]
    verbosity: Verbosity,
}

impl Root {
    /// Installs the tracing subscriber and `color-eyre` hooks. Must run
    /// before anything that might log or return an `eyre::Report`.
    pub fn init_logging(&self) -> Result<()> {
        color_eyre::config::HookBuilder::default()
            .display_env_section(false)
            .display_location_section(false)
            .install()?;

        let filter = EnvFilter::builder()
            .with_default_directive(self.verbosity.log_level_filter().as_trace().into())
            .from_env_lossy();

        let fmt = tracing_subscriber::fmt::layer().with_filter(filter);

        match &self.log_file {
            Some(path) => {
                let file = File::create(path)?;
                tracing_subscriber::registry()
                    .with(fmt.with_writer(Mutex::new(file)))
                    .with(ErrorLayer::default())
                    .init();
            }
            None => {
                tracing_subscriber::registry()
                    .with(fmt.with_writer(std::io::stderr))
                    .with(ErrorLayer::default())
                    .init();
            }
        }

        Ok(())
    }
}
