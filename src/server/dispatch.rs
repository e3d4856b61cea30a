//! Channel-open policy and per-channel task wiring.

use std::{fmt, net::SocketAddr, sync::Arc};

use russh::{Channel, server::{Handle, Msg}};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{
    Honeypot, relay::{ChannelState, spawn_relays}, router::{ChannelSink, FollowupRunner, RequestRouter, SessionChannel}
};
use crate::{auth::display_addr, terminal::LineTerminal};

/// Channel types a client can ask to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    DirectTcpip,
    ForwardedTcpip,
    X11,
}

impl ChannelKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpip => "direct-tcpip",
            ChannelKind::ForwardedTcpip => "forwarded-tcpip",
            ChannelKind::X11 => "x11",
        }
    }

    /// Only interactive sessions are served.
    pub fn policy(self) -> Result<(), Rejection> {
        match self {
            ChannelKind::Session => Ok(()),
            ChannelKind::DirectTcpip | ChannelKind::ForwardedTcpip | ChannelKind::X11 => Err(Rejection { kind: self }),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Why a channel open was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub kind: ChannelKind,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel type: {}", self.kind)
    }
}

/// Decides on incoming channels for one connection and starts the tasks behind accepted ones.
pub struct ChannelDispatcher {
    ctx: Arc<Honeypot>,
    peer: Option<SocketAddr>,
}

impl ChannelDispatcher {
    pub fn new(ctx: Arc<Honeypot>, peer: Option<SocketAddr>) -> Self {
        Self { ctx, peer }
    }

    /// Apply the channel policy; a rejection is logged and never affects other channels.
    pub fn admit(&self, kind: ChannelKind) -> bool {
        match kind.policy() {
            Ok(()) => true,
            Err(rejection) => {
                warn!(
                    peer = %display_addr(self.peer),
                    channel_type = kind.wire_name(),
                    reason = %rejection,
                    "rejecting channel"
                );
                false
            }
        }
    }

    /// Start the follow-up task and both relays for an accepted session channel.
    ///
    /// The returned router answers the channel's requests; dropping it ends the
    /// follow-up task once queued work has run.
    pub fn accept_session(&self, channel: Channel<Msg>, handle: Handle) -> RequestRouter {
        let id = channel.id();
        let sink: Arc<dyn ChannelSink> = Arc::new(SessionChannel::new(handle, id));
        let state = Arc::new(ChannelState::new(self.peer, format!("{id:?}"), sink));

        let (tx, rx) = mpsc::unbounded_channel();
        FollowupRunner::new(state.clone(), self.ctx.shell.clone(), self.ctx.prompt.clone()).spawn(rx);
        spawn_relays(state.clone(), channel, LineTerminal::new(self.ctx.prompt.clone()));

        info!(peer = %display_addr(self.peer), channel = ?id, "session channel opened");
        RequestRouter::new(state, self.ctx.ptys, self.ctx.mode, tx)
    }
}
