//! Javarena CLI
//!
//! Serves the interactive session protocol over TCP and runs Java programs
//! from the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use javarena::{
    BatchRequest, Config, ConnectionId, EXAMPLE_CONFIG, Engine, ServerEvent, ToolchainLocator,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

mod server;

#[derive(Parser)]
#[command(name = "javarena")]
#[command(about = "Compile and run Java programs with live, interactive I/O")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: javarena.toml)
        #[arg(short, long, default_value = "javarena.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Serve the session protocol (newline-delimited JSON over TCP)
    Serve {
        /// Address to listen on (default: server.listen from the configuration)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Compile and run a program once with fixed input
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Input file (default: no input)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compile and run a program attached to this terminal
    Attach {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,
    },

    /// Show the compiler and runtime that would be used
    Toolchain,

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::from_env().context("failed to load configuration from environment")?
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or(config.server.listen);
            server::serve(Engine::new(config), listen).await
        }
        Commands::Run {
            source,
            input,
            json,
        } => run_once(config, &source, input.as_deref(), json).await,
        Commands::Attach { source } => {
            let code = attach(config, &source).await?;
            std::process::exit(code);
        }
        Commands::Toolchain => show_toolchain(config).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_once(config: Config, source: &Path, input: Option<&Path>, json: bool) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let stdin = if let Some(input_path) = input {
        tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?
    } else {
        String::new()
    };

    info!(source = %source.display(), "running program");
    let engine = Engine::new(config);
    let outcome = engine.compile_and_run(BatchRequest { code, stdin }).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("failed to serialize result")?
        );
    } else {
        if let Some(output) = &outcome.output {
            print!("{output}");
        }
        if let Some(error) = outcome.error.as_deref().filter(|e| !e.is_empty()) {
            eprintln!("{error}");
        }
        if let Some(review) = &outcome.ai_review {
            eprintln!("\nSuggestion:\n{review}");
        }
        if let Some(review) = &outcome.error_review {
            eprintln!("\nSuggestion:\n{}", review.explanation);
            for suggestion in &review.suggestions {
                eprintln!("  • {suggestion}");
            }
        }
    }

    // Log the result via tracing (stderr), keeping stdout clean for piping
    info!(
        success = outcome.success,
        needs_input = outcome.needs_input.unwrap_or(false),
        "run finished"
    );

    if outcome.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Run `source` as an interactive session wired to this terminal.
///
/// Returns the program's exit code.
async fn attach(config: Config, source: &Path) -> Result<i32> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let engine = Engine::new(config);
    let (conn, mut events) = engine.connect(ConnectionId::random()).await;
    let conn = Arc::new(conn);
    conn.run(&code).await;

    let stdin_task = {
        let conn = conn.clone();
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => conn.input(&buf[..n]).await,
                }
            }
        })
    };

    let mut stdout = tokio::io::stdout();
    let exit_code = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                conn.kill().await;
                continue;
            }
        };
        match event {
            Some(ServerEvent::Output { data }) => {
                stdout
                    .write_all(data.as_bytes())
                    .await
                    .context("failed to write output")?;
                stdout.flush().await.context("failed to flush output")?;
            }
            Some(ServerEvent::Exit { code, reason }) => {
                info!(code, %reason, "program ended");
                break code;
            }
            Some(ServerEvent::Error { message }) => {
                eprintln!("{message}");
                break 1;
            }
            Some(other) => debug!(?other, "ignoring event"),
            None => break 1,
        }
    };

    stdin_task.abort();
    let _ = stdin_task.await;
    match Arc::try_unwrap(conn) {
        Ok(conn) => conn.disconnect().await,
        Err(conn) => engine.disconnect(conn.id()).await,
    }

    Ok(exit_code)
}

async fn show_toolchain(config: Config) -> Result<()> {
    let locator = ToolchainLocator::new(config.toolchain);
    let toolchain = locator.locate().await.context("toolchain lookup failed")?;
    println!("Compiler: {}", toolchain.compiler.display());
    println!("Runtime:  {}", toolchain.runtime.display());
    Ok(())
}

fn show_config(config: &Config) {
    println!("Toolchain:");
    println!("  Compiler: {}", config.toolchain.compiler);
    println!("  Runtime: {}", config.toolchain.runtime);
    if let Some(path) = &config.toolchain.compiler_path {
        println!("  Compiler path: {}", path.display());
    }
    if let Some(path) = &config.toolchain.runtime_path {
        println!("  Runtime path: {}", path.display());
    }
    println!();
    println!("Compile timeout: {:?}", config.compile_timeout());
    println!("Grace period: {:?}", config.grace_period());
    println!(
        "Interactive run limit: {}",
        config
            .max_session_duration()
            .map_or_else(|| "none".to_string(), |d| format!("{d:?}"))
    );
    println!("One-shot run limit: {:?}", config.batch_timeout());
    println!();
    println!(
        "Workspace root: {}",
        config
            .workspace
            .root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .display()
    );
    println!("Listen address: {}", config.server.listen);
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
