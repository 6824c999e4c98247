//! Per-session workspaces
//!
//! A workspace is a private temporary directory holding the submitted source
//! and the compiled artifacts. It is created by [`Workspace::provision`] and
//! removed by [`Workspace::release`], which never fails.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::WorkspaceConfig;

/// Source extension of submitted programs
pub const SOURCE_EXTENSION: &str = "java";

static ENTRY_POINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bpublic\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("entry point pattern is valid")
});

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write source file {path}: {source}")]
    WriteSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Find the name of the first public class declared in `source`.
///
/// Declarations inside comments and string or char literals are ignored.
pub fn entry_point(source: &str) -> Option<&str> {
    let masked = mask_comments_and_literals(source);
    let name = ENTRY_POINT.captures(&masked)?.get(1)?.range();
    source.get(name)
}

/// Blank out comments and literals, keeping every byte offset (and newlines)
/// in place so matches on the result index into `source`
fn mask_comments_and_literals(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut masked = bytes.to_vec();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        let end = if rest.starts_with(b"//") {
            find(rest, b"\n").map_or(bytes.len(), |n| i + n)
        } else if rest.starts_with(b"/*") {
            find(&rest[2..], b"*/").map_or(bytes.len(), |n| i + 2 + n + 2)
        } else if rest.starts_with(b"\"\"\"") {
            find(&rest[3..], b"\"\"\"").map_or(bytes.len(), |n| i + 3 + n + 3)
        } else if rest[0] == b'"' || rest[0] == b'\'' {
            literal_end(bytes, i)
        } else {
            i += 1;
            continue;
        };
        for b in &mut masked[i..end] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
        i = end;
    }
    // Delimiters are ASCII, so multi-byte characters are masked or kept whole
    String::from_utf8_lossy(&masked).into_owned()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// End of the string or char literal opening at `start`; an unterminated
/// literal stops at the end of its line
fn literal_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            b if b == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

/// An isolated directory owned by exactly one session
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    entry: String,
    source_file: PathBuf,
}

impl Workspace {
    /// Create a fresh directory and write `source` into it as `<Entry>.java`
    #[instrument(skip(config, source), fields(len = source.len()))]
    pub fn provision(config: &WorkspaceConfig, source: &str) -> Result<Self, WorkspaceError> {
        let root = config.root.clone().unwrap_or_else(std::env::temp_dir);
        let dir = tempfile::Builder::new()
            .prefix(&config.prefix)
            .tempdir_in(&root)
            .map_err(|source| WorkspaceError::Create { root, source })?;

        let entry = entry_point(source)
            .unwrap_or(config.fallback_entry.as_str())
            .to_owned();
        let source_file = dir.path().join(format!("{entry}.{SOURCE_EXTENSION}"));

        std::fs::write(&source_file, source.as_bytes()).map_err(|source| {
            WorkspaceError::WriteSource {
                path: source_file.clone(),
                source,
            }
        })?;

        debug!(path = %dir.path().display(), entry, "workspace provisioned");

        Ok(Self {
            dir,
            entry,
            source_file,
        })
    }

    /// [`provision`](Self::provision) on the blocking pool
    pub async fn provision_async(
        config: &WorkspaceConfig,
        source: &str,
    ) -> Result<Self, WorkspaceError> {
        let config = config.clone();
        let source = source.to_owned();
        tokio::task::spawn_blocking(move || Self::provision(&config, &source)).await?
    }

    /// Directory of the workspace
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Name the program is compiled to and launched as
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Path of the written source file
    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Recursively delete the workspace; failures are logged, never raised
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(path = %path.display(), "workspace released"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to release workspace"),
        }
    }

    /// [`release`](Self::release) on the blocking pool
    pub async fn release_async(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.release()).await {
            warn!(error = %e, "workspace release task failed");
        }
    }
}
