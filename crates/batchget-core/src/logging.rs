//! Logging init: file under XDG state dir, or graceful fallback to stderr.
//!
//! Worker and tick threads log with `job`/`file` fields, so the file is
//! greppable per job. Thread names are included for the same reason.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Takes precedence over `RUST_LOG`.
pub const LOG_ENV: &str = "BATCHGET_LOG";

const DEFAULT_DIRECTIVES: &str = "info,batchget=debug,batchget_core=debug";

/// Writer that is either a file or stderr (used when file clone fails).
enum FileOrStderr {
    File(fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct SharedFile(fs::File);

impl<'a> MakeWriter<'a> for SharedFile {
    type Writer = FileOrStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(FileOrStderr::File)
            .unwrap_or(FileOrStderr::Stderr)
    }
}

/// Filter directives: `BATCHGET_LOG`, then `RUST_LOG`, then the default.
fn directives(batchget_log: Option<String>, rust_log: Option<String>) -> String {
    batchget_log
        .or(rust_log)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

fn env_filter() -> EnvFilter {
    let wanted = directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    EnvFilter::try_new(&wanted).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// `$XDG_STATE_HOME/batchget/batchget.log`, creating the directory.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("batchget")?;
    Ok(xdg_dirs.place_state_file("batchget.log")?)
}

/// Initialize structured logging to the state-dir log file.
/// On failure (e.g. log dir unwritable), returns Err so the caller can fall back to stderr.
pub fn init_logging() -> Result<()> {
    let path = log_file_path()?;
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(BoxMakeWriter::new(SharedFile(file)))
        .with_thread_names(true)
        .with_ansi(false)
        .init();

    tracing::info!("batchget logging initialized at {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only (no file). Use when init_logging() fails so the CLI doesn't crash.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_thread_names(true)
        .with_ansi(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_variable_wins() {
        let d = directives(Some("warn".into()), Some("trace".into()));
        assert_eq!(d, "warn");
    }

    #[test]
    fn falls_back_to_rust_log_then_default() {
        assert_eq!(directives(None, Some("debug".into())), "debug");
        assert_eq!(directives(None, None), DEFAULT_DIRECTIVES);
        assert_eq!(directives(Some("  ".into()), None), DEFAULT_DIRECTIVES);
    }
}
