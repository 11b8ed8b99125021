//! Clap CLI definitions for Grid.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  grid listen --port 7272                     Print every \"grid\" message sent to :7272
  grid publish --peer 127.0.0.1:7272 hi       Send one message
  grid hello --name alice --peer 10.0.0.2:7272
  grid mnemonic grid                          Show the number behind a label

\x1b[1;36mProtocols:\x1b[0m
  Protocol arguments take hex bytes (0x67726964) or a short label (grid).";

/// Grid — protocol-keyed messaging between kernels over TCP.
#[derive(Parser)]
#[command(name = "grid", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a kernel and print messages for one protocol until Ctrl+C.
    Listen {
        /// Port to listen on [default: listen_port from config].
        #[arg(long)]
        port: Option<u16>,
        /// Protocol to subscribe to.
        #[arg(long, default_value = "grid")]
        protocol: String,
    },
    /// Publish a single message to a peer.
    Publish {
        /// Peer address (host:port) [default: peer from config].
        #[arg(long)]
        peer: Option<String>,
        /// Protocol of the message.
        #[arg(long, default_value = "grid")]
        protocol: String,
        /// Payload, sent as UTF-8 bytes.
        payload: String,
    },
    /// Run the hello agent until Ctrl+C.
    Hello {
        /// Name used in greetings.
        #[arg(long)]
        name: String,
        /// Port to listen on [default: listen_port from config].
        #[arg(long)]
        port: Option<u16>,
        /// Peer to greet [default: peer from config].
        #[arg(long)]
        peer: Option<String>,
        /// Milliseconds between greetings.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Convert between a short label and its number (either direction).
    Mnemonic {
        /// A label like `grid`, or a number like `0x67726964`.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_publish() {
        let cli = Cli::try_parse_from([
            "grid",
            "--config",
            "/tmp/grid.toml",
            "publish",
            "--peer",
            "127.0.0.1:9000",
            "hello world",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/grid.toml")));
        match cli.command {
            Commands::Publish {
                peer,
                protocol,
                payload,
            } => {
                assert_eq!(peer.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(protocol, "grid");
                assert_eq!(payload, "hello world");
            }
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn test_hello_requires_name() {
        assert!(Cli::try_parse_from(["grid", "hello"]).is_err());
    }
}
