//! LoComm Node
//!
//! Packet dispatcher, credential store and secure channel for a field radio.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use node::config::{default_config_path, Config};
use node::protocol::{FrameCodec, MessageType, Status};
use node::NodeService;
use tracing_subscriber::EnvFilter;

/// LoComm Node - packet dispatcher and secure relay for field radios.
#[derive(Parser, Debug)]
#[command(name = "locomm-node")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the node service
    Run,

    /// Decode a hex-encoded frame and print its fields
    Inspect {
        /// Frame bytes as hex (whitespace ignored)
        hex: String,
    },

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Initialize tracing; stdout may carry frames, so logs go to stderr
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.node.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => {
            config.validate()?;
            tracing::info!("Using config file: {:?}", config_path);
            run_node(config).await?;
        }
        Commands::Inspect { hex } => {
            let bytes = decode_hex(&hex)?;
            print!("{}", inspect_frame(&bytes));
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    config_path.display()
                );
            }
            Config::default().save(&config_path)?;
            println!("Wrote default configuration to {}", config_path.display());
        }
    }

    Ok(())
}

/// Run the node until a shutdown signal arrives.
async fn run_node(config: Config) -> anyhow::Result<()> {
    let service = NodeService::new(config)?;

    let token = service.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Received shutdown signal");
        token.cancel();
    });

    service.run().await
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for a shutdown signal (Ctrl-C).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn decode_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(cleaned.trim_start_matches("0x")).context("Frame must be hex encoded")
}

/// Render a frame's fields for display. Invalid frames report why.
fn inspect_frame(bytes: &[u8]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "length:  {} bytes", bytes.len());

    let frame = match FrameCodec::new().decode(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = writeln!(out, "invalid: {}", e);
            return out;
        }
    };

    let name = MessageType::from_code(frame.type_code())
        .map(|ty| format!("{:?}", ty))
        .unwrap_or_else(|| "unknown".to_string());
    let _ = writeln!(out, "type:    {} ({})", frame.type_code(), name);
    let _ = writeln!(out, "tag:     {}", frame.tag());
    let _ = writeln!(out, "payload: {} bytes", frame.payload().len());
    if let Some(status) = Status::from_payload(frame.payload()) {
        let _ = writeln!(out, "status:  {:?}", status);
    }
    for (i, chunk) in frame.payload().chunks(16).enumerate() {
        let _ = writeln!(out, "  {:04x}  {}", i * 16, hex::encode(chunk));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use node::protocol::CorrelationTag;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from(["locomm-node", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["locomm-node", "run", "--verbose", "--config", "/tmp/n.toml"])
                .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/n.toml")));
    }

    #[test]
    fn test_inspect_command() {
        let cli = Cli::try_parse_from(["locomm-node", "inspect", "1234"]).unwrap();
        match cli.command {
            Commands::Inspect { hex } => assert_eq!(hex, "1234"),
            _ => panic!("Expected Inspect command"),
        }
    }

    #[test]
    fn test_config_commands() {
        let cli = Cli::try_parse_from(["locomm-node", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));

        let cli = Cli::try_parse_from(["locomm-node", "config", "init", "--force"]).unwrap();
        match cli.command {
            Commands::Config(ConfigCommands::Init { force }) => assert!(force),
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Cli::try_parse_from(["locomm-node"]).is_err());
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("12 34\n56").unwrap(), vec![0x12, 0x34, 0x56]);
        assert_eq!(decode_hex("0xabcd").unwrap(), vec![0xab, 0xcd]);
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn test_inspect_valid_frame() {
        let bytes = FrameCodec::new()
            .encode_parts(
                MessageType::PasswordAck.code(),
                CorrelationTag::from_u32(0x0102_0304),
                Status::Okay.as_bytes(),
            )
            .unwrap();
        let out = inspect_frame(&bytes);
        assert!(out.contains("PWAK (PasswordAck)"));
        assert!(out.contains("01020304"));
        assert!(out.contains("status:  Okay"));
    }

    #[test]
    fn test_inspect_invalid_frame() {
        let out = inspect_frame(&[0x12, 0x34, 0x00]);
        assert!(out.contains("invalid:"));
    }
}
