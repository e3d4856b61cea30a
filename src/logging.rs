//! Log sink setup. Every component logs through `tracing`; this only decides
//! where the formatted lines end up.

use std::{
    fs::{File, OpenOptions}, path::Path, sync::Mutex
};

use tracing_subscriber::EnvFilter;

use crate::{
    cli::LogTarget, error::{HoneypotError, HoneypotResult}
};

pub fn init_tracing(target: &LogTarget) -> HoneypotResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match target {
        LogTarget::Stdout => {
            let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
        }
        LogTarget::File(path) => {
            // one writer behind a lock so concurrent events land as whole lines
            let file = Mutex::new(open_log_file(path)?);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(file)
                .try_init();
        }
    }
    Ok(())
}

/// Open `path` for appending, creating it if needed.
pub fn open_log_file(path: &Path) -> HoneypotResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| HoneypotError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn log_file_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sshpit.log");
        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn unopenable_log_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("sshpit.log");
        let err = open_log_file(&path).unwrap_err();
        assert!(matches!(err, HoneypotError::LogFile { .. }));
        assert!(err.to_string().contains("sshpit.log"));
    }
}
