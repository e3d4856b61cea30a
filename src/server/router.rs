//! Per-channel request handling.
//!
//! Every request is decided inside the russh callback that delivered it, so
//! the reply is written before the next request on the channel is read. Work
//! that has to happen after the reply (the shell prompt, exec output, a
//! teardown) is queued to one task per channel and runs in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{ChannelId, CryptoVec, server::Handle};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{ShellMode, relay::ChannelState};
use crate::{
    auth::display_addr, pty::{PtyManager, PtyRequest, TermSize, WindowChange}, shell::FakeShellEngine
};

/// Out-of-band channel requests the router understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Env { name: String, value: String },
    Shell { payload: Vec<u8> },
    Exec { command: String },
    PtyReq(PtyRequest),
    WindowChange(WindowChange),
    /// Any request type without a handler of its own.
    Unknown { kind: String, payload: Vec<u8> },
}

impl ChannelRequest {
    pub fn kind(&self) -> &str {
        match self {
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::Shell { .. } => "shell",
            ChannelRequest::Exec { .. } => "exec",
            ChannelRequest::PtyReq(_) => "pty-req",
            ChannelRequest::WindowChange(_) => "window-change",
            ChannelRequest::Unknown { kind, .. } => kind,
        }
    }

    pub fn expects_reply(&self) -> bool {
        !matches!(self, ChannelRequest::WindowChange(_))
    }
}

/// What to send back for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Success,
    Failure,
    /// No reply is ever sent for this request type.
    Silent,
}

/// Work that runs after a request has been answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    Prompt,
    Exec(String),
    Teardown(&'static str),
}

/// Write side of one session channel.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Send bytes to the client; false once the channel is gone.
    async fn write(&self, data: &[u8]) -> bool;
    async fn exit_status(&self, code: u32);
    /// Send EOF followed by CLOSE.
    async fn close(&self);
}

/// A channel on a live russh session, driven through the session handle.
pub struct SessionChannel {
    handle: Handle,
    id: ChannelId,
}

impl SessionChannel {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ChannelSink for SessionChannel {
    async fn write(&self, data: &[u8]) -> bool {
        let mut payload = CryptoVec::new();
        payload.extend(data);
        self.handle.data(self.id, payload).await.is_ok()
    }

    async fn exit_status(&self, code: u32) {
        if self.handle.exit_status_request(self.id, code).await.is_err() {
            debug!(channel = ?self.id, code, "exit-status dropped, session gone");
        }
    }

    async fn close(&self) {
        if self.handle.eof(self.id).await.is_err() {
            debug!(channel = ?self.id, "eof dropped, session gone");
        }
        if self.handle.close(self.id).await.is_err() {
            debug!(channel = ?self.id, "close dropped, session gone");
        }
    }
}

/// Decides on one channel's requests. Owned by the connection handler.
pub struct RequestRouter {
    state: Arc<ChannelState>,
    ptys: PtyManager,
    mode: ShellMode,
    followups: mpsc::UnboundedSender<Followup>,
}

impl RequestRouter {
    pub fn new(state: Arc<ChannelState>, ptys: PtyManager, mode: ShellMode, followups: mpsc::UnboundedSender<Followup>) -> Self {
        Self {
            state,
            ptys,
            mode,
            followups,
        }
    }

    /// Apply `request`, queue its follow-up and return the reply to send now.
    pub fn answer(&self, request: ChannelRequest) -> Reply {
        let kind = request.kind().to_string();
        let expects_reply = request.expects_reply();
        let (reply, followup) = self.handle(request);

        if let Some(followup) = followup
            && self.followups.send(followup).is_err()
        {
            debug!(channel = %self.state.channel, request = %kind, "follow-up dropped, channel task gone");
        }

        if !expects_reply {
            return Reply::Silent;
        }
        if reply == Reply::Failure {
            info!(peer = %display_addr(self.state.peer), channel = %self.state.channel, request = %kind, "declining request");
        }
        reply
    }

    fn handle(&self, request: ChannelRequest) -> (Reply, Option<Followup>) {
        let peer = display_addr(self.state.peer);
        let channel = self.state.channel.as_str();

        match request {
            ChannelRequest::Env { name, value } => {
                info!(peer = %peer, channel, name = %name, value = %value, "env request");
                (Reply::Success, None)
            }
            ChannelRequest::Shell { payload } => {
                if payload.is_empty() {
                    info!(peer = %peer, channel, "shell request");
                    (Reply::Success, Some(Followup::Prompt))
                } else {
                    warn!(peer = %peer, channel, payload = %String::from_utf8_lossy(&payload), "shell request with payload");
                    (Reply::Failure, None)
                }
            }
            ChannelRequest::Exec { command } => match self.mode {
                ShellMode::Intercept => {
                    info!(peer = %peer, channel, command = %command, "exec request");
                    (Reply::Success, Some(Followup::Exec(command)))
                }
                ShellMode::Plain => {
                    warn!(peer = %peer, channel, command = %command, "exec request in plain mode");
                    (Reply::Failure, None)
                }
            },
            ChannelRequest::PtyReq(req) => self.pty_request(req),
            ChannelRequest::WindowChange(change) => {
                self.window_change(change.size);
                (Reply::Silent, None)
            }
            ChannelRequest::Unknown { kind, payload } => {
                warn!(
                    peer = %peer,
                    channel,
                    request = %kind,
                    payload = %String::from_utf8_lossy(&payload),
                    "unknown channel request"
                );
                (Reply::Failure, None)
            }
        }
    }

    fn pty_request(&self, req: PtyRequest) -> (Reply, Option<Followup>) {
        let peer = display_addr(self.state.peer);
        let channel = self.state.channel.as_str();
        info!(
            peer = %peer,
            channel,
            term = %req.term,
            cols = req.size.cols,
            rows = req.size.rows,
            pixel_width = req.pixel_width,
            pixel_height = req.pixel_height,
            "pty-req"
        );

        if self.mode == ShellMode::Plain {
            return (Reply::Success, None);
        }

        if let Some(pty) = self.state.pty() {
            if let Err(err) = self.ptys.resize(&pty, req.size) {
                warn!(peer = %peer, channel, error = %err, "pty resize failed");
            }
            return (Reply::Success, None);
        }

        let pty = match self.ptys.open(TermSize::default()) {
            Ok(pty) => Arc::new(pty),
            Err(err) => {
                warn!(peer = %peer, channel, error = %err, "could not start pty");
                return (Reply::Failure, Some(Followup::Teardown("pty allocation failed")));
            }
        };
        if let Err(err) = self.ptys.resize(&pty, req.size) {
            warn!(peer = %peer, channel, error = %err, "pty resize failed");
        }
        if !self.state.install_pty(pty) {
            debug!(peer = %peer, channel, "pty discarded, channel already closed");
        }
        (Reply::Success, None)
    }

    fn window_change(&self, size: TermSize) {
        let channel = self.state.channel.as_str();
        let Some(pty) = self.state.pty() else {
            debug!(channel, cols = size.cols, rows = size.rows, "window-change without pty");
            return;
        };
        match self.ptys.resize(&pty, size) {
            Ok(()) => debug!(channel, cols = size.cols, rows = size.rows, "window-change"),
            Err(err) => warn!(peer = %display_addr(self.state.peer), channel, error = %err, "pty resize failed"),
        }
    }
}

/// Runs one channel's follow-ups, one at a time, after their replies went out.
pub struct FollowupRunner {
    state: Arc<ChannelState>,
    shell: FakeShellEngine,
    prompt: String,
}

impl FollowupRunner {
    pub fn new(state: Arc<ChannelState>, shell: FakeShellEngine, prompt: String) -> Self {
        Self { state, shell, prompt }
    }

    /// Consume the queue until its sender, the channel's router, is dropped.
    pub fn spawn(self, mut followups: mpsc::UnboundedReceiver<Followup>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(followup) = followups.recv().await {
                self.run(followup).await;
            }
            debug!(peer = %display_addr(self.state.peer), channel = %self.state.channel, "follow-up queue drained");
        })
    }

    async fn run(&self, followup: Followup) {
        match followup {
            Followup::Prompt => {
                self.state.sink.write(self.prompt.as_bytes()).await;
            }
            Followup::Exec(command) => {
                let output = self.shell.run(&command).await;
                if !output.is_empty() {
                    self.state.sink.write(&output).await;
                }
                self.state.sink.exit_status(0).await;
                self.state.teardown("exec finished").await;
            }
            Followup::Teardown(reason) => {
                self.state.teardown(reason).await;
            }
        }
    }
}
