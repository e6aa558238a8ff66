use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const READY_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SourceError {
    /// Worth retrying on the next poll.
    #[error("page source unavailable: {0}")]
    Transient(String),
    #[error("page source failed: {0}")]
    Fatal(String),
}

/// What the monitor needs from a controlled browser session.
pub trait PageSource {
    /// Identifier of the page currently shown (its URL).
    fn current_navigation_id(&mut self) -> Result<String, SourceError>;
    /// Rendered body text, lines separated by line breaks.
    fn visible_text(&mut self) -> Result<String, SourceError>;
    /// Raw page markup, only used for the failure artifact.
    fn page_markup(&mut self) -> Result<String, SourceError>;
}

/// Page capture on disk: line one is the URL, the rest is the body text.
/// Whatever writes the capture (a browser extension, a devtools snippet)
/// replaces it each time the tab navigates.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    path: PathBuf,
}

impl SnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A capture caught mid-write may end inside a code point, so bytes are
    /// decoded lossily. Read failures are retried; only a path that can never
    /// hold a capture is fatal.
    fn read(&self) -> Result<String, SourceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) if self.path.is_dir() => Err(SourceError::Fatal(format!(
                "{}: capture path is a directory",
                self.path.display()
            ))),
            Err(e) => Err(SourceError::Transient(format!("{}: {}", self.path.display(), e))),
        }
    }
}

/// Split a capture into (navigation id, body text).
pub fn split_snapshot(raw: &str) -> (&str, &str) {
    let raw = raw.trim_start_matches('\u{feff}');
    match raw.split_once('\n') {
        Some((first, rest)) => (first.trim(), rest),
        None => (raw.trim(), ""),
    }
}

impl PageSource for SnapshotSource {
    fn current_navigation_id(&mut self) -> Result<String, SourceError> {
        let raw = self.read()?;
        let (id, _) = split_snapshot(&raw);
        if id.is_empty() {
            return Err(SourceError::Transient(format!(
                "{}: capture has no navigation line",
                self.path.display()
            )));
        }
        Ok(id.to_string())
    }

    fn visible_text(&mut self) -> Result<String, SourceError> {
        let raw = self.read()?;
        Ok(split_snapshot(&raw).1.to_string())
    }

    fn page_markup(&mut self) -> Result<String, SourceError> {
        self.read()
    }
}

/// Wait until the body text is non-empty (bounded by `timeout`), then let
/// late content settle. Returns whether readiness was observed.
pub async fn wait_until_ready<S: PageSource + ?Sized>(
    source: &mut S,
    timeout: Duration,
    settle: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match source.visible_text() {
            Ok(text) if !text.trim().is_empty() => break,
            Ok(_) => {}
            Err(e) => debug!("waiting for content: {}", e),
        }
        if Instant::now() >= deadline {
            debug!("no content after {} seconds", timeout.as_secs());
            return false;
        }
        tokio::time::sleep(READY_POLL).await;
    }
    tokio::time::sleep(settle).await;
    true
}
