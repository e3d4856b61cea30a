//! Byte relays between a session channel and its terminal, and the shared
//! teardown both of them race to run.

use std::{
    future::Future, io::Read, net::SocketAddr, sync::{
        Arc, atomic::{AtomicBool, Ordering}
    }
};

use russh::{Channel, ChannelMsg, server::Msg};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::router::ChannelSink;
use crate::{
    auth::display_addr, pty::PtyHandle, terminal::{KeystrokeLog, LineTerminal}
};

/// One-shot guard around a close action.
#[derive(Debug, Default)]
pub struct CloseOnce {
    fired: AtomicBool,
}

impl CloseOnce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Run `action` if nobody has yet; returns whether this caller ran it.
    pub async fn run<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        action().await;
        true
    }
}

/// Per-channel state shared by the request router, its follow-up task and both relays.
pub struct ChannelState {
    pub(crate) peer: Option<SocketAddr>,
    /// Channel label used in log lines.
    pub(crate) channel: String,
    pub(crate) sink: Arc<dyn ChannelSink>,
    pty: watch::Sender<Option<Arc<PtyHandle>>>,
    closer: CloseOnce,
}

impl ChannelState {
    pub fn new(peer: Option<SocketAddr>, channel: impl Into<String>, sink: Arc<dyn ChannelSink>) -> Self {
        let (pty, _) = watch::channel(None);
        Self {
            peer,
            channel: channel.into(),
            sink,
            pty,
            closer: CloseOnce::new(),
        }
    }

    pub fn pty(&self) -> Option<Arc<PtyHandle>> {
        self.pty.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.has_fired()
    }

    /// Attach the channel's pty; returns false when the channel is already torn down.
    pub fn install_pty(&self, pty: Arc<PtyHandle>) -> bool {
        if self.is_closed() {
            pty.close();
            return false;
        }
        self.pty.send_replace(Some(pty));
        if self.is_closed()
            && let Some(pty) = self.pty.send_replace(None)
        {
            pty.close();
            return false;
        }
        true
    }

    /// Close the channel and its pty. Only the first caller does anything.
    pub async fn teardown(&self, reason: &str) -> bool {
        self.closer
            .run(|| async {
                if let Some(pty) = self.pty.send_replace(None) {
                    pty.close();
                }
                self.sink.close().await;
                info!(peer = %display_addr(self.peer), channel = %self.channel, reason, "session closed");
            })
            .await
    }

    /// Wait until a pty is attached; `None` once the channel is torn down first.
    async fn wait_for_pty(&self) -> Option<Arc<PtyHandle>> {
        let mut rx = self.pty.subscribe();
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(pty) = rx.borrow_and_update().clone() {
                return Some(pty);
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Start both relay directions for an accepted channel.
pub fn spawn_relays(state: Arc<ChannelState>, channel: Channel<Msg>, terminal: LineTerminal) {
    tokio::spawn(client_to_terminal(state.clone(), channel, terminal));
    tokio::spawn(terminal_to_client(state));
}

/// Client keystrokes go to the pty when one exists, otherwise to the line terminal.
async fn client_to_terminal(state: Arc<ChannelState>, mut channel: Channel<Msg>, mut terminal: LineTerminal) {
    let peer = display_addr(state.peer);
    let mut keystrokes = KeystrokeLog::default();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                if let Some(pty) = state.pty() {
                    for line in keystrokes.push(&data) {
                        info!(peer = %peer, channel = %state.channel, line = %line, "client input");
                    }
                    let bytes = data.to_vec();
                    let written = tokio::task::spawn_blocking(move || pty.write(&bytes)).await;
                    match written {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            warn!(peer = %peer, channel = %state.channel, error = %err, "pty write failed");
                            break;
                        }
                        Err(err) => {
                            warn!(peer = %peer, channel = %state.channel, error = %err, "pty writer panicked");
                            break;
                        }
                    }
                } else {
                    let output = terminal.feed(&data);
                    for line in output.lines {
                        info!(peer = %peer, channel = %state.channel, line = %line, "client input");
                    }
                    if !output.echo.is_empty() && !state.sink.write(&output.echo).await {
                        break;
                    }
                }
            }
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }

    debug!(peer = %peer, channel = %state.channel, "client side of relay finished");
    state.teardown("client closed channel").await;
}

/// Terminal output goes back to the client once a pty has been attached.
async fn terminal_to_client(state: Arc<ChannelState>) {
    let Some(pty) = state.wait_for_pty().await else {
        return;
    };
    let Some(mut reader) = pty.take_reader() else {
        return;
    };
    drop(pty);

    let relay_state = state.clone();
    let pumped = tokio::task::spawn_blocking(move || {
        let rt = tokio::runtime::Handle::current();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if !rt.block_on(relay_state.sink.write(&buf[..n])) {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "pty read ended");
                    break;
                }
            }
        }
    })
    .await;

    if let Err(err) = pumped {
        warn!(peer = %display_addr(state.peer), channel = %state.channel, error = %err, "pty reader panicked");
    }
    state.teardown("terminal closed").await;
}
