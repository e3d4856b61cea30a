//! russh handler that drives one connection: authentication, channel opens and
//! the hand-off of channel requests to their routers.

use std::{
    collections::HashMap, net::SocketAddr, sync::Arc, time::Instant
};

use russh::{
    Channel, ChannelId, Pty, Sig, keys::{HashAlg, PublicKey}, server::{self as ssh_server, Auth, Session}
};
use tracing::{info, warn};

use super::{
    Honeypot, dispatch::{ChannelDispatcher, ChannelKind}, router::{ChannelRequest, Reply, RequestRouter}
};
use crate::{
    auth::{NONE_METHOD, display_addr, log_auth_outcome}, pty::{PtyRequest, TermSize, WindowChange}
};

/// Per-connection state: who the peer is, whether it authenticated, and the
/// router of every open session channel.
pub struct ConnectionServer {
    ctx: Arc<Honeypot>,
    peer: Option<SocketAddr>,
    username: Option<String>,
    connected_at: Instant,
    dispatcher: ChannelDispatcher,
    routers: HashMap<ChannelId, RequestRouter>,
}

impl ConnectionServer {
    pub fn new(ctx: Arc<Honeypot>, peer: Option<SocketAddr>) -> Self {
        Self {
            dispatcher: ChannelDispatcher::new(ctx.clone(), peer),
            ctx,
            peer,
            username: None,
            connected_at: Instant::now(),
            routers: HashMap::new(),
        }
    }

    /// Answer `request` before the callback returns. russh tracks a single
    /// pending reply per channel and the next request overwrites it.
    fn route(&mut self, channel: ChannelId, request: ChannelRequest, session: &mut Session) -> Result<(), russh::Error> {
        let reply = match self.routers.get(&channel) {
            Some(router) => router.answer(request),
            None => {
                warn!(
                    peer = %display_addr(self.peer),
                    channel = ?channel,
                    request = request.kind(),
                    "request for a channel without a router"
                );
                if request.expects_reply() {
                    Reply::Failure
                } else {
                    Reply::Silent
                }
            }
        };

        match reply {
            Reply::Success => session.channel_success(channel),
            Reply::Failure => session.channel_failure(channel),
            Reply::Silent => Ok(()),
        }
    }
}

impl Drop for ConnectionServer {
    fn drop(&mut self) {
        info!(
            peer = %display_addr(self.peer),
            user = %self.username.as_deref().unwrap_or("<unauthenticated>"),
            duration = ?self.connected_at.elapsed(),
            "client disconnected",
        );
    }
}

impl ssh_server::Handler for ConnectionServer {
    type Error = russh::Error;

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        log_auth_outcome(self.peer, NONE_METHOD, Some("method not offered"));
        Ok(Auth::reject())
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.ctx.auth.authenticate(self.peer, user, password) {
            self.username = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            log_auth_outcome(self.peer, "password", Some(&format!("password rejected for {user:?}")));
            Ok(Auth::reject())
        }
    }

    async fn auth_publickey_offered(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint(HashAlg::Sha256).to_string();
        self.ctx.auth.reject_method(self.peer, user, "publickey", fingerprint);
        log_auth_outcome(self.peer, "publickey", Some(&format!("public key rejected for {user:?}")));
        Ok(Auth::reject())
    }

    async fn auth_succeeded(&mut self, _session: &mut Session) -> Result<(), Self::Error> {
        info!(
            peer = %display_addr(self.peer),
            user = %self.username.as_deref().unwrap_or("<unknown>"),
            "user authenticated"
        );
        Ok(())
    }

    async fn channel_open_session(&mut self, channel: Channel<ssh_server::Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        if !self.dispatcher.admit(ChannelKind::Session) {
            return Ok(false);
        }
        let id = channel.id();
        let requests = self.dispatcher.accept_session(channel, session.handle());
        self.routers.insert(id, requests);
        Ok(true)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<ssh_server::Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.dispatcher.admit(ChannelKind::X11))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<ssh_server::Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        info!(peer = %display_addr(self.peer), target = %format!("{host_to_connect}:{port_to_connect}"), "direct-tcpip attempt");
        Ok(self.dispatcher.admit(ChannelKind::DirectTcpip))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        _channel: Channel<ssh_server::Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.dispatcher.admit(ChannelKind::ForwardedTcpip))
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.route(
            channel,
            ChannelRequest::Env {
                name: variable_name.to_string(),
                value: variable_value.to_string(),
            },
            session,
        )
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.route(channel, ChannelRequest::Shell { payload: Vec::new() }, session)
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.route(channel, ChannelRequest::Exec { command }, session)
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut Session) -> Result<(), Self::Error> {
        let request = ChannelRequest::Unknown {
            kind: "subsystem".to_string(),
            payload: name.as_bytes().to_vec(),
        };
        self.route(channel, request, session)
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Unknown {
            kind: "x11-req".to_string(),
            payload: x11_auth_protocol.as_bytes().to_vec(),
        };
        self.route(channel, request, session)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = PtyRequest {
            term: term.to_string(),
            size: TermSize::from_wire(col_width, row_height),
            pixel_width: pix_width,
            pixel_height: pix_height,
        };
        self.route(channel, ChannelRequest::PtyReq(request), session)
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let change = WindowChange {
            size: TermSize::from_wire(col_width, row_height),
        };
        self.route(channel, ChannelRequest::WindowChange(change), session)
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, session: &mut Session) -> Result<(), Self::Error> {
        let request = ChannelRequest::Unknown {
            kind: "signal".to_string(),
            payload: format!("{signal:?}").into_bytes(),
        };
        self.route(channel, request, session)
    }

    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, _session: &mut Session) -> Result<bool, Self::Error> {
        info!(peer = %display_addr(self.peer), request = "tcpip-forward", address, port = *port, "global request discarded");
        Ok(false)
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, _session: &mut Session) -> Result<bool, Self::Error> {
        info!(peer = %display_addr(self.peer), request = "cancel-tcpip-forward", address, port, "global request discarded");
        Ok(false)
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.routers.remove(&channel);
        Ok(())
    }
}
