use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../javarena.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for the session engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    #[serde(default)]
    pub compile: CompileConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub advisor: AdvisorConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Where to find the compiler and runtime
#[derive(Debug, Clone, Deserialize)]
pub struct ToolchainConfig {
    /// Compiler executable name, without platform suffix
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Runtime executable name, without platform suffix
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Explicit compiler path; used together with `runtime_path` to skip discovery
    #[serde(default)]
    pub compiler_path: Option<PathBuf>,

    /// Explicit runtime path
    #[serde(default)]
    pub runtime_path: Option<PathBuf>,

    /// Extra installation roots, scanned before the built-in ones
    #[serde(default)]
    pub search_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompileConfig {
    /// Arguments placed before the source file name
    #[serde(default = "default_compile_args")]
    pub args: Vec<String>,

    /// Wall-clock ceiling for one compilation, in seconds
    #[serde(default = "default_compile_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Runtime arguments placed before the class path and entry name
    #[serde(default = "default_run_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds to wait for exit after the kill signal
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Optional ceiling on how long an interactive program may run
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// Capacity of the per-connection event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Largest number of bytes taken from the output pipe per read
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    #[serde(default = "default_advisor_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Wall-clock limit for a non-interactive run, in seconds
    #[serde(default = "default_batch_timeout")]
    pub timeout_secs: u64,

    /// Source substrings that indicate the program reads standard input
    #[serde(default = "default_input_markers")]
    pub input_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent directory for workspaces (OS temp dir if unset)
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default = "default_workspace_prefix")]
    pub prefix: String,

    /// Entry name used when the source declares no public class
    #[serde(default = "default_fallback_entry")]
    pub fallback_entry: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Grace period after the kill signal
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.session.grace_period_secs)
    }

    /// Compile wall-clock ceiling
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile.timeout_secs)
    }

    /// Interactive run ceiling, if any
    pub fn max_session_duration(&self) -> Option<Duration> {
        self.session.max_duration_secs.map(Duration::from_secs)
    }

    /// Ceiling on waiting for the advisor
    pub fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor.timeout_secs)
    }

    /// Non-interactive run limit
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            runtime: default_runtime(),
            compiler_path: None,
            runtime_path: None,
            search_roots: Vec::new(),
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            args: default_compile_args(),
            timeout_secs: default_compile_timeout(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            args: default_run_args(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period(),
            max_duration_secs: None,
            event_buffer: default_event_buffer(),
            read_buffer: default_read_buffer(),
        }
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_advisor_timeout(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_batch_timeout(),
            input_markers: default_input_markers(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: default_workspace_prefix(),
            fallback_entry: default_fallback_entry(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_compiler() -> String {
    "javac".to_owned()
}

fn default_runtime() -> String {
    "java".to_owned()
}

fn default_compile_args() -> Vec<String> {
    vec!["-encoding".to_owned(), "UTF-8".to_owned()]
}

fn default_compile_timeout() -> u64 {
    30
}

fn default_run_args() -> Vec<String> {
    [
        "-Dfile.encoding=UTF-8",
        "-Dsun.stdout.encoding=UTF-8",
        "-Dsun.stderr.encoding=UTF-8",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_grace_period() -> u64 {
    5
}

fn default_event_buffer() -> usize {
    256
}

fn default_read_buffer() -> usize {
    1
}

fn default_advisor_timeout() -> u64 {
    10
}

fn default_batch_timeout() -> u64 {
    10
}

fn default_input_markers() -> Vec<String> {
    [
        "Scanner",
        "System.in",
        "BufferedReader",
        "InputStreamReader",
        "nextInt",
        "nextLine",
        "nextDouble",
        "nextFloat",
        "readLine",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_workspace_prefix() -> String {
    "javarena-".to_owned()
}

fn default_fallback_entry() -> String {
    "Main".to_owned()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8765))
}
