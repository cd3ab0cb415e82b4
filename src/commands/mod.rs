pub mod answer;
pub mod offer;
pub mod stdio;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use pastelink_lib::peer::Role;
use pastelink_lib::signaling::{FileMedium, TransferMedium};
use pastelink_lib::{Error, SessionController};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const OFFER_FILE: &str = "pastelink_offer.txt";
pub const ANSWER_FILE: &str = "pastelink_answer.txt";

const FETCH_INTERVAL: Duration = Duration::from_millis(100);
const MESSAGE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    /// Shared files in --dir
    File,
    /// Print the payload, read the peer's from stdin
    Stdio,
}

#[derive(Args, Debug, Clone)]
pub struct ExchangeArgs {
    /// How payloads travel between the two sides
    #[arg(long, value_enum, default_value_t = Medium::File)]
    pub medium: Medium,

    /// Directory holding the exchange files
    #[arg(long, default_value_os_t = std::env::temp_dir())]
    pub dir: PathBuf,

    /// Compress payloads (base64 gzip JSON) instead of raw SDP
    #[arg(long)]
    pub compact: bool,

    /// Scripted messages to send once connected
    #[arg(long, default_value_t = 3)]
    pub messages: u32,

    /// Seconds to keep listening after the last message is sent
    #[arg(long, default_value_t = 2)]
    pub linger: u64,
}

impl ExchangeArgs {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Medium as seen from `role`: each side writes its own file and reads
    /// the other's.
    pub fn open_medium(&self, role: Role) -> Result<Box<dyn TransferMedium>> {
        Ok(match (self.medium, role) {
            (Medium::Stdio, _) => Box::new(stdio::StdioMedium::new()),
            (Medium::File, Role::Offerer) => {
                let medium = FileMedium::new(self.path(OFFER_FILE), self.path(ANSWER_FILE));
                medium.clear()?;
                Box::new(medium)
            }
            (Medium::File, Role::Answerer) => Box::new(FileMedium::new(
                self.path(ANSWER_FILE),
                self.path(OFFER_FILE),
            )),
        })
    }

    /// Where the peer's payload is expected, for the user.
    pub fn inbox_hint(&self, role: Role) -> String {
        match (self.medium, role) {
            (Medium::Stdio, _) => "stdin (end with an empty line)".into(),
            (Medium::File, Role::Offerer) => self.path(ANSWER_FILE).display().to_string(),
            (Medium::File, Role::Answerer) => self.path(OFFER_FILE).display().to_string(),
        }
    }
}

/// Blocks until the medium holds something from the peer.
pub async fn wait_for_payload(medium: &mut dyn TransferMedium) -> Result<()> {
    loop {
        if tokio::task::block_in_place(|| medium.fetch())?.is_some() {
            return Ok(());
        }
        tokio::time::sleep(FETCH_INTERVAL).await;
    }
}

/// Waits for the channel, sends the scripted messages and prints what
/// arrived from the peer.
pub async fn converse(
    controller: &mut SessionController,
    role: Role,
    args: &ExchangeArgs,
) -> Result<()> {
    println!("Waiting for the data channel...");
    controller.wait_connected().await?;
    println!("{}", controller.status());

    for i in 1..=args.messages {
        let text = format!("Message {i} from {role}");
        match controller.send_message(&text).await {
            Ok(()) => debug!(%text, "sent"),
            Err(Error::NotConnected) => {
                controller.poll().await?;
                println!("{}", controller.status());
                break;
            }
            Err(err) => return Err(err.into()),
        }
        tokio::time::sleep(MESSAGE_INTERVAL).await;
    }
    if controller.is_connected() {
        tokio::time::sleep(Duration::from_secs(args.linger)).await;
    }

    // read what arrived before closing our side
    let received = controller.refresh_messages().await?;
    println!("\n=== Messages received at {role} ===");
    for message in received {
        println!("  {message}");
    }
    if received.is_empty() && args.messages > 0 {
        info!("peer sent nothing before linger expired");
    }

    controller.close().await;
    Ok(())
}

pub fn ensure_dir(args: &ExchangeArgs) -> Result<()> {
    if args.medium == Medium::File && !args.dir.is_dir() {
        bail!("{} is not a directory", args.dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        exchange: ExchangeArgs,
    }

    #[test]
    fn defaults_use_files_in_temp_dir() {
        let args = Harness::parse_from(["pastelink"]).exchange;
        assert_eq!(args.medium, Medium::File);
        assert_eq!(args.dir, std::env::temp_dir());
        assert_eq!(args.messages, 3);
        assert!(!args.compact);
    }

    #[test]
    fn sides_read_each_others_file() {
        let args = Harness::parse_from(["pastelink", "--dir", "/srv/x", "--medium", "file"]).exchange;
        assert_eq!(args.inbox_hint(Role::Offerer), format!("/srv/x/{ANSWER_FILE}"));
        assert_eq!(args.inbox_hint(Role::Answerer), format!("/srv/x/{OFFER_FILE}"));
    }

    #[tokio::test]
    async fn converse_keeps_messages_from_a_peer_that_left() {
        use pastelink_lib::config::PeerConfig;
        use pastelink_lib::LoopbackEngine;
        use std::sync::Arc;

        let engine = LoopbackEngine::new();
        let config = PeerConfig::default();
        let mut alice = SessionController::new(Arc::new(engine.clone()), &config);
        let mut bob = SessionController::new(Arc::new(engine.clone()), &config);
        let offer = alice.create_offer_text().await.unwrap();
        let answer = bob.accept_offer_text(&offer).await.unwrap();
        alice.accept_answer_text(&answer).await.unwrap();
        bob.wait_connected().await.unwrap();

        let leaver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bob.send_message("bye").await.unwrap();
            bob.close().await;
        });

        let args =
            Harness::parse_from(["pastelink", "--messages", "3", "--linger", "0"]).exchange;
        converse(&mut alice, Role::Offerer, &args).await.unwrap();
        leaver.await.unwrap();

        assert_eq!(alice.messages(), ["bye"]);
        assert_eq!(engine.live(), 0);
    }

    #[test]
    fn file_dir_must_exist() {
        let args = Harness::parse_from(["pastelink", "--dir", "/definitely/not/here"]).exchange;
        assert!(ensure_dir(&args).is_err());
        let args = Harness::parse_from(["pastelink", "--medium", "stdio"]).exchange;
        assert!(ensure_dir(&args).is_ok());
    }
}
