//! SSH honeypot: accepts `root` with any password, records every attempt and
//! answers shell requests with fabricated output.

pub mod auth;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod pty;
pub mod server;
pub mod shell;
pub mod terminal;

pub use error::{HoneypotError, HoneypotResult};
