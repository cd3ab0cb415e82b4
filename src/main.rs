//! pastelink: open a WebRTC data channel between two terminals by
//! copying the offer and answer across by hand (or through shared files).

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::ExchangeArgs;
use pastelink_lib::config::PeerConfig;
use pastelink_lib::logger;
use pastelink_lib::signaling::TransferEncoding;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pastelink")]
#[command(about = "Copy-paste signaled WebRTC data channel")]
struct Args {
    /// JSON peer configuration (ICE servers, timeouts, encoding)
    #[arg(long, env = "PASTELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides PASTELINK_LOG
    #[arg(long)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish an offer and wait for the peer's answer
    Offer(ExchangeArgs),

    /// Wait for the peer's offer and publish an answer
    Answer(ExchangeArgs),
}

impl Command {
    fn exchange(&self) -> &ExchangeArgs {
        match self {
            Command::Offer(args) | Command::Answer(args) => args,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.log.as_deref());

    let mut config = match &args.config {
        Some(path) => PeerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PeerConfig::default(),
    };
    if args.command.exchange().compact {
        config.encoding = TransferEncoding::Compact;
    }

    match &args.command {
        Command::Offer(exchange) => commands::offer::run(config, exchange).await,
        Command::Answer(exchange) => commands::answer::run(config, exchange).await,
    }
}
