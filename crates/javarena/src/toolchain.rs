//! Compiler and runtime discovery
//!
//! The locator searches the executable search path first, then scans a small
//! set of installation roots for a `bin` directory holding both executables.
//! A successful lookup is cached for the life of the locator; failures are not
//! cached so a toolchain installed while the server runs is picked up.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ToolchainConfig;
use crate::types::HostOs;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("Java compiler ({compiler}) not found on this system")]
    NotFound { compiler: String, runtime: String },

    #[error("toolchain discovery task failed: {0}")]
    Discovery(#[from] tokio::task::JoinError),
}

/// Absolute paths of the compiler and runtime executables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub compiler: PathBuf,
    pub runtime: PathBuf,
}

/// Memoizing toolchain finder
#[derive(Debug)]
pub struct ToolchainLocator {
    config: ToolchainConfig,
    os: HostOs,
    cache: RwLock<Option<Toolchain>>,
}

impl ToolchainLocator {
    pub fn new(config: ToolchainConfig) -> Self {
        Self::for_host(config, HostOs::detect())
    }

    /// Create a locator using the search strategy of a specific OS family
    pub fn for_host(config: ToolchainConfig, os: HostOs) -> Self {
        Self {
            config,
            os,
            cache: RwLock::new(None),
        }
    }

    /// Cached toolchain, if a previous lookup succeeded
    pub fn cached(&self) -> Option<Toolchain> {
        self.cache.read().ok().and_then(|guard| guard.clone())
    }

    /// Locate the toolchain, running filesystem scans on the blocking pool
    #[instrument(skip(self))]
    pub async fn locate(&self) -> Result<Toolchain, ToolchainError> {
        if let Some(toolchain) = self.cached() {
            return Ok(toolchain);
        }

        let config = self.config.clone();
        let os = self.os;
        let found = tokio::task::spawn_blocking(move || discover(&config, os)).await?;

        match found {
            Some(toolchain) => {
                info!(
                    compiler = %toolchain.compiler.display(),
                    runtime = %toolchain.runtime.display(),
                    "toolchain located"
                );
                if let Ok(mut guard) = self.cache.write() {
                    *guard = Some(toolchain.clone());
                }
                Ok(toolchain)
            }
            None => Err(ToolchainError::NotFound {
                compiler: self.config.compiler.clone(),
                runtime: self.config.runtime.clone(),
            }),
        }
    }
}

/// Run the full search strategy once, without caching
pub fn discover(config: &ToolchainConfig, os: HostOs) -> Option<Toolchain> {
    if let (Some(compiler), Some(runtime)) = (&config.compiler_path, &config.runtime_path) {
        if compiler.is_file() && runtime.is_file() {
            return Some(Toolchain {
                compiler: compiler.clone(),
                runtime: runtime.clone(),
            });
        }
        warn!(
            compiler = %compiler.display(),
            runtime = %runtime.display(),
            "configured toolchain paths do not exist, falling back to discovery"
        );
    }

    if let (Ok(compiler), Ok(runtime)) = (which::which(&config.compiler), which::which(&config.runtime)) {
        debug!("toolchain found on PATH");
        return Some(Toolchain { compiler, runtime });
    }

    let compiler = format!("{}{}", config.compiler, os.exe_suffix());
    let runtime = format!("{}{}", config.runtime, os.exe_suffix());

    config
        .search_roots
        .iter()
        .map(PathBuf::as_path)
        .chain(builtin_roots(os).iter().map(Path::new))
        .flat_map(|root| candidate_dirs(root, os))
        .find_map(|dir| {
            let compiler = dir.join(&compiler);
            let runtime = dir.join(&runtime);
            (compiler.is_file() && runtime.is_file()).then(|| {
                debug!(dir = %dir.display(), "toolchain found under installation root");
                Toolchain { compiler, runtime }
            })
        })
}

/// Well-known installation roots for an OS family
pub fn builtin_roots(os: HostOs) -> &'static [&'static str] {
    match os {
        HostOs::Windows => &[
            "C:\\Program Files\\Java",
            "C:\\Program Files (x86)\\Java",
            "C:\\Program Files\\OpenLogic",
            "C:\\Program Files\\Eclipse Adoptium",
        ],
        HostOs::MacOs => &[
            "/Library/Java/JavaVirtualMachines",
            "/opt/homebrew/opt/openjdk",
            "/usr/local/opt/openjdk",
            "/usr/bin",
        ],
        HostOs::Linux | HostOs::Other => &[
            "/usr/lib/jvm",
            "/opt/java",
            "/usr/local/bin",
            "/usr/bin",
        ],
    }
}

/// Directories under `root` that may hold both executables.
///
/// The root itself and `root/bin` come first, then `bin` directories of each
/// immediate subdirectory, newest-looking names first.
fn candidate_dirs(root: &Path, os: HostOs) -> Vec<PathBuf> {
    let mut dirs = vec![root.to_path_buf(), root.join("bin")];

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "skipping installation root");
            return dirs;
        }
    };

    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort_by(|a, b| b.cmp(a));

    for sub in subdirs {
        if os == HostOs::MacOs {
            dirs.push(sub.join("Contents").join("Home").join("bin"));
        }
        dirs.push(sub.join("bin"));
    }

    dirs
}
