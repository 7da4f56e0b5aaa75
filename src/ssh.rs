mod backend;
mod raw;
mod session;

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{atomic::{AtomicU64, Ordering}, Arc},
};

use eyre::{Result, WrapErr};
use russh::server::{Config, Server};
use session::Session;
use tracing::error;

use crate::directory::DirectoryService;

/// The three host key basenames the original tool scans a directory
/// for (`main.py`'s `re.fullmatch(r"ssh_host_(ecdsa|ed25519|rsa)_key")`).
const HOST_KEY_BASENAMES: &[&str] = &["ssh_host_ecdsa_key", "ssh_host_ed25519_key", "ssh_host_rsa_key"];

/// Loads whichever of [`HOST_KEY_BASENAMES`] are present under `dir`.
/// At least one must be found; `russh` otherwise has no host key to
/// offer and every handshake would fail.
fn load_host_keys(dir: &Path) -> Result<Vec<russh::keys::PrivateKey>> {
    let mut keys = Vec::new();

    for name in HOST_KEY_BASENAMES {
        let path = dir.join(name);

        if !path.is_file() {
            continue;
        }

        let key = russh::keys::PrivateKey::read_openssh_file(&path)
            .wrap_err_with(|| format!("reading host key {}", path.display()))?;

        keys.push(key);
    }

    if keys.is_empty() {
        return Err(eyre::eyre!(
            "no host keys found in {} (expected one of {HOST_KEY_BASENAMES:?})",
            dir.display()
        ));
    }

    Ok(keys)
}

/// The listening SSH server: accepts connections, hands each one a
/// fresh [`Session`] bound to the shared directory service.
#[derive(Clone)]
pub struct Frontend {
    directory: Arc<dyn DirectoryService>,
    next_id: Arc<AtomicU64>,
}

impl Frontend {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run(mut self, port: u16, host_key_dir: PathBuf) -> Result<()> {
        let keys = load_host_keys(&host_key_dir)?;

        let config = Config {
            keys,
            ..Default::default()
        };

        self.run_on_address(Arc::new(config), ("0.0.0.0", port))
            .await
            .wrap_err("ssh server exited")
    }
}

impl Server for Frontend {
    type Handler = Session;

    fn new_client(&mut self, _: Option<SocketAddr>) -> Self::Handler {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        Session::new(self.directory.clone(), id.to_string())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        if let Some(russh::Error::IO(_)) = error.downcast_ref::<russh::Error>() {
            return;
        }

        error!("unhandled session error: {:#?}", error);
    }
}
