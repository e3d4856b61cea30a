//! TCP accept loop and the per-connection handler factory.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use russh::server::{self as ssh_server, Server as _};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{Honeypot, handler::ConnectionServer};
use crate::{
    auth::display_addr, error::{HoneypotError, HoneypotResult}
};

/// Pause after a failed accept so a persistent error (fd exhaustion) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Factory invoked whenever a client connects.
#[derive(Clone)]
pub struct HoneypotServer {
    ctx: Arc<Honeypot>,
}

impl HoneypotServer {
    pub fn new(ctx: Arc<Honeypot>) -> Self {
        Self { ctx }
    }
}

impl ssh_server::Server for HoneypotServer {
    type Handler = ConnectionServer;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = %display_addr(addr), "client connected");
        ConnectionServer::new(self.ctx.clone(), addr)
    }
}

/// Owns the listening socket; each accepted connection runs on its own task.
pub struct Listener {
    socket: TcpListener,
    config: Arc<ssh_server::Config>,
    server: HoneypotServer,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, config: Arc<ssh_server::Config>, ctx: Arc<Honeypot>) -> HoneypotResult<Self> {
        let socket = TcpListener::bind(addr)
            .await
            .map_err(|source| HoneypotError::BindFailed {
                address: addr.to_string(),
                source,
            })?;
        Ok(Self {
            socket,
            config,
            server: HoneypotServer::new(ctx),
        })
    }

    pub fn local_addr(&self) -> HoneypotResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Accept forever. A failed accept is logged and the loop keeps going.
    pub async fn serve(mut self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    fn spawn_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.config.nodelay
            && let Err(err) = stream.set_nodelay(true)
        {
            debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }

        let handler = self.server.new_client(Some(peer));
        let config = self.config.clone();
        tokio::spawn(async move {
            let session = match ssh_server::run_stream(config, stream, handler).await {
                Ok(session) => session,
                Err(err) => {
                    warn!(peer = %peer, error = %err, "handshake failed");
                    return;
                }
            };
            if let Err(err) = session.await {
                warn!(peer = %peer, error = %err, "connection ended with error");
            }
        });
    }
}
