//! Honeypot SSH server entry point and module wiring.
//!
//! `run_server` loads the host key, builds the russh configuration and hands the
//! bound socket to [`Listener`]; the per-connection state machines live in the
//! submodules.

mod dispatch;
mod handler;
mod listener;
mod relay;
mod router;

use std::{
    net::SocketAddr, path::PathBuf, sync::Arc, time::Duration
};

use clap::ValueEnum;
use russh::{
    MethodKind, MethodSet, keys::PrivateKey, server::{self as ssh_server}
};
use tracing::info;

pub use self::{
    dispatch::{ChannelKind, Rejection}, handler::ConnectionServer, listener::{HoneypotServer, Listener}, relay::CloseOnce, router::{ChannelRequest, ChannelSink, Reply}
};
use crate::{
    auth::AuthGate, crypto::{honeypot_preferred, load_host_key}, error::{HoneypotError, HoneypotResult}, pty::PtyManager, shell::{DecoyProfile, FakeShellEngine}
};

/// How interactive sessions are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShellMode {
    /// Allocate a pty per session and fake registered commands on `exec`.
    #[default]
    Intercept,
    /// Line-echoing terminal only: no pty, `exec` is declined.
    Plain,
}

pub const DEFAULT_LISTEN_ADDR: &str = ":22";
pub const DEFAULT_HOST_KEY: &str = "/root/.ssh/id_rsa";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub host_key_path: PathBuf,
    pub mode: ShellMode,
    pub decoy: DecoyProfile,
    pub auth_rejection_time: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            host_key_path: PathBuf::from(DEFAULT_HOST_KEY),
            mode: ShellMode::default(),
            decoy: DecoyProfile::default(),
            auth_rejection_time: Duration::from_millis(250),
        }
    }
}

/// Read-only state shared by every connection.
pub struct Honeypot {
    pub(crate) auth: AuthGate,
    pub(crate) shell: FakeShellEngine,
    pub(crate) ptys: PtyManager,
    pub(crate) mode: ShellMode,
    pub(crate) prompt: String,
}

impl Honeypot {
    pub fn new(auth: AuthGate, shell: FakeShellEngine, mode: ShellMode) -> Self {
        let prompt = format!("root@{}:~# ", shell.decoy().hostname);
        Self {
            auth,
            shell,
            ptys: PtyManager,
            mode,
            prompt,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(AuthGate::default(), FakeShellEngine::new(config.decoy.clone()), config.mode)
    }
}

/// russh configuration: our algorithm preferences, password and public-key
/// methods (the latter only so attempts can be recorded), and the host key.
pub fn build_ssh_config(host_key: PrivateKey, auth_rejection_time: Duration) -> ssh_server::Config {
    let mut server_config = ssh_server::Config {
        preferred: honeypot_preferred(),
        auth_rejection_time,
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        nodelay: true,
        ..Default::default()
    };

    server_config.methods = MethodSet::empty();
    server_config.methods.push(MethodKind::Password);
    server_config.methods.push(MethodKind::PublicKey);
    server_config.keys.push(host_key);
    server_config
}

/// Resolve Go-style `:port` shorthand to all interfaces.
pub fn normalize_listen_addr(addr: &str) -> HoneypotResult<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|_| HoneypotError::InvalidAddress(addr.to_string()))
}

/// Load the host key, bind the listen address and serve until the process exits.
///
/// Both the key and the bind are fatal: nothing is served when either fails.
pub async fn run_server(config: ServerConfig) -> HoneypotResult<()> {
    let host_key = load_host_key(&config.host_key_path)?;
    let addr = normalize_listen_addr(&config.listen_addr)?;
    let ssh_config = Arc::new(build_ssh_config(host_key, config.auth_rejection_time));
    let ctx = Arc::new(Honeypot::from_config(&config));

    let listener = Listener::bind(addr, ssh_config, ctx).await?;
    info!(
        addr = %listener.local_addr()?,
        mode = ?config.mode,
        decoy = %config.decoy.hostname,
        "honeypot listening"
    );
    listener.serve().await;
    Ok(())
}
