use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::{
    server::{DEFAULT_HOST_KEY, DEFAULT_LISTEN_ADDR, ServerConfig, ShellMode}, shell::DecoyProfile
};

#[derive(Debug, Parser)]
#[command(name = "sshpit", about = "SSH honeypot that records credentials and fakes a shell")]
struct RawArgs {
    /// Address to listen on; a bare ":PORT" listens on all interfaces
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    addr: String,
    /// Where log lines go; "-" means stdout
    #[arg(long, value_name = "PATH", default_value = "-")]
    logfile: String,
    /// Private host key presented to clients
    #[arg(long, value_name = "PATH", default_value = DEFAULT_HOST_KEY)]
    host_key: PathBuf,
    /// How interactive sessions are served
    #[arg(long, value_enum, value_name = "MODE", default_value_t = ShellMode::Intercept)]
    mode: ShellMode,
    /// Hostname shown in place of the real one
    #[arg(long, value_name = "NAME")]
    decoy_hostname: Option<String>,
    /// Kernel release shown in place of the real one
    #[arg(long, value_name = "RELEASE")]
    decoy_release: Option<String>,
}

/// Where log output should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub log: LogTarget,
    pub server: ServerConfig,
}

impl CliConfig {
    pub fn parse() -> Result<Self> {
        let args = RawArgs::parse();
        Self::try_from(args)
    }
}

impl TryFrom<RawArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: RawArgs) -> Result<Self> {
        if args.addr.trim().is_empty() {
            bail!("--addr must not be empty");
        }

        let log = match args.logfile.as_str() {
            "-" => LogTarget::Stdout,
            path => LogTarget::File(PathBuf::from(path)),
        };

        let mut decoy = DecoyProfile::default();
        if let Some(hostname) = args.decoy_hostname {
            decoy.hostname = hostname;
        }
        if let Some(release) = args.decoy_release {
            decoy.kernel_release = release;
        }

        Ok(CliConfig {
            log,
            server: ServerConfig {
                listen_addr: args.addr,
                host_key_path: args.host_key,
                mode: args.mode,
                decoy,
                ..ServerConfig::default()
            },
        })
    }
}
