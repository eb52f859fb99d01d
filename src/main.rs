//! sshlaunch CLI — bootstrap and supervise a remote agent over SSH.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "sshlaunch",
    version,
    about = "Launch, supervise and clean up a remote agent over one SSH connection"
)]
struct Cli {
    #[command(subcommand)]
    command: sshlaunch::cli::Commands,
}

/// Diagnostics go to stderr, filtered by `SSHLAUNCH_LOG` (default `warn`).
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("SSHLAUNCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    match sshlaunch::cli::dispatch(cli.command) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}
