//! `grid` — command-line front end for Grid kernels.

mod cli;
mod cmd;
mod ui;

use clap::Parser;
use cli::{Cli, Commands};
use grid_kernel::load_config;

/// Log to stderr. `RUST_LOG` wins over the configured level.
fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());
    init_tracing_stderr(&config.log_level);

    match cli.command {
        Commands::Listen { port, protocol } => cmd::listen::cmd_listen(config, port, &protocol),
        Commands::Publish {
            peer,
            protocol,
            payload,
        } => cmd::publish::cmd_publish(config, peer, &protocol, payload),
        Commands::Hello {
            name,
            port,
            peer,
            interval_ms,
        } => cmd::hello::cmd_hello(config, name, port, peer, interval_ms),
        Commands::Mnemonic { value } => cmd::mnemonic::cmd_mnemonic(&value),
    }
}
