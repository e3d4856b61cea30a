//! Fake command execution.
//!
//! Registered commands really run on the host so their output looks plausible,
//! then a per-command transform scrubs the details that would identify the
//! machine. Anything else gets a canned refusal.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::terminal::to_crlf;

/// Identity the honeypot presents instead of the real host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoyProfile {
    pub hostname: String,
    pub kernel_release: String,
}

impl Default for DecoyProfile {
    fn default() -> Self {
        Self {
            hostname: "everbor".to_string(),
            kernel_release: "2.6.1-64-generic".to_string(),
        }
    }
}

/// Values a transform needs to rewrite real output.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    pub real_hostname: Option<String>,
    pub decoy: DecoyProfile,
}

pub type Transform = fn(&str, &RewriteContext) -> String;

/// Exact-name lookup from command to transform; never changes after construction.
#[derive(Clone)]
pub struct CommandTable {
    entries: HashMap<&'static str, Transform>,
}

impl CommandTable {
    pub fn builtin() -> Self {
        let mut entries: HashMap<&'static str, Transform> = HashMap::new();
        entries.insert("uname", rewrite_uname);
        entries.insert("echo", passthrough);
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<Transform> {
        self.entries.get(name).copied()
    }
}

fn rewrite_uname(output: &str, ctx: &RewriteContext) -> String {
    let mut rewritten = match ctx.real_hostname.as_deref() {
        Some(real) if !real.is_empty() => output.replace(real, &ctx.decoy.hostname),
        _ => output.to_string(),
    };
    let mut fields: Vec<&str> = rewritten.split(' ').collect();
    if fields.len() > 2 {
        fields[2] = &ctx.decoy.kernel_release;
        rewritten = fields.join(" ");
    }
    rewritten
}

fn passthrough(output: &str, _ctx: &RewriteContext) -> String {
    output.to_string()
}

/// Source of baseline output for registered commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Combined stdout and stderr; failures degrade to whatever was captured.
    async fn run(&self, program: &str, args: &[&str]) -> Vec<u8>;
}

/// Runs the real binary on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Vec<u8> {
        match Command::new(program).args(args).output().await {
            Ok(output) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                combined
            }
            Err(err) => {
                warn!(program, error = %err, "baseline command failed");
                Vec::new()
            }
        }
    }
}

/// Maps a command line onto fabricated terminal output.
#[derive(Clone)]
pub struct FakeShellEngine {
    table: Arc<CommandTable>,
    runner: Arc<dyn CommandRunner>,
    ctx: RewriteContext,
}

impl FakeShellEngine {
    pub fn new(decoy: DecoyProfile) -> Self {
        let real_hostname = hostname::get().ok().map(|h| h.to_string_lossy().into_owned());
        Self::with_runner(decoy, real_hostname, Arc::new(SystemRunner))
    }

    pub fn with_runner(decoy: DecoyProfile, real_hostname: Option<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            table: Arc::new(CommandTable::builtin()),
            runner,
            ctx: RewriteContext { real_hostname, decoy },
        }
    }

    pub fn decoy(&self) -> &DecoyProfile {
        &self.ctx.decoy
    }

    /// Response bytes for `command_line`, with CRLF line endings.
    pub async fn run(&self, command_line: &str) -> Vec<u8> {
        let parts: Vec<&str> = command_line.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            return to_crlf(refusal(&parts).as_bytes());
        };

        let response = match self.table.get(name) {
            Some(transform) => {
                info!(command = name, args = ?args, "intercepted command");
                let baseline = self.runner.run(name, args).await;
                transform(&String::from_utf8_lossy(&baseline), &self.ctx)
            }
            None => {
                info!(command = name, args = ?args, "refused command");
                refusal(&parts)
            }
        };
        to_crlf(response.as_bytes())
    }
}

fn refusal(parts: &[&str]) -> String {
    format!("I'm sorry, I can't do that ({}) right now.\n", parts.join(", "))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Returns canned output and remembers what it was asked to run.
    #[derive(Default)]
    pub(crate) struct StubRunner {
        pub(crate) output: Vec<u8>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for StubRunner {
        async fn run(&self, program: &str, args: &[&str]) -> Vec<u8> {
            let mut call = vec![program];
            call.extend_from_slice(args);
            self.calls.lock().unwrap().push(call.join(" "));
            self.output.clone()
        }
    }

    pub(crate) fn stub_engine(output: &str) -> (FakeShellEngine, Arc<StubRunner>) {
        let runner = Arc::new(StubRunner {
            output: output.as_bytes().to_vec(),
            ..Default::default()
        });
        let engine = FakeShellEngine::with_runner(DecoyProfile::default(), Some("helium".into()), runner.clone());
        (engine, runner)
    }

    #[tokio::test]
    async fn uname_hides_hostname_and_release() {
        let (engine, runner) =
            stub_engine("Linux helium 6.8.0-45-generic #45-Ubuntu SMP x86_64 x86_64 x86_64 GNU/Linux\n");
        let out = String::from_utf8(engine.run("uname -a").await).unwrap();
        assert_eq!(
            out,
            "Linux everbor 2.6.1-64-generic #45-Ubuntu SMP x86_64 x86_64 x86_64 GNU/Linux\r\n"
        );
        assert_eq!(runner.calls.lock().unwrap().as_slice(), ["uname -a"]);
    }

    #[tokio::test]
    async fn short_uname_output_keeps_its_fields() {
        let (engine, _) = stub_engine("Linux\n");
        assert_eq!(engine.run("uname").await, b"Linux\r\n");
    }

    #[tokio::test]
    async fn unknown_commands_are_refused_verbatim() {
        let (engine, runner) = stub_engine("");
        let out = String::from_utf8(engine.run("foo bar").await).unwrap();
        assert!(out.contains("foo, bar"), "{out}");
        assert!(out.ends_with("\r\n"));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn echo_passes_through_with_crlf() {
        let (engine, _) = stub_engine("one\ntwo\n");
        assert_eq!(engine.run("echo one two").await, b"one\r\ntwo\r\n");
    }

    #[tokio::test]
    async fn failing_baseline_still_goes_through_transform() {
        let (engine, _) = stub_engine("");
        assert!(engine.run("uname -a").await.is_empty());
    }

    #[tokio::test]
    async fn empty_command_line_is_refused() {
        let (engine, _) = stub_engine("");
        assert_eq!(engine.run("   ").await, b"I'm sorry, I can't do that () right now.\r\n");
    }

    #[test]
    fn table_is_exact_match() {
        let table = CommandTable::builtin();
        assert!(table.get("uname").is_some());
        assert!(table.get("UNAME").is_none());
        assert!(table.get("unam").is_none());
        assert!(table.get("echo").is_some());
        assert!(table.get("ls").is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn real_uname_is_rewritten() {
        let engine = FakeShellEngine::new(DecoyProfile::default());
        let real_release = String::from_utf8(SystemRunner.run("uname", &["-r"]).await).unwrap();
        let out = String::from_utf8(engine.run("uname -a").await).unwrap();
        assert!(out.contains("everbor"), "{out}");
        assert!(out.contains("2.6.1-64-generic"), "{out}");
        assert!(!out.contains(real_release.trim()), "{out}");
    }
}
