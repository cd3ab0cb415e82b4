use super::{converse, ensure_dir, wait_for_payload, ExchangeArgs};
use anyhow::Result;
use pastelink_lib::config::PeerConfig;
use pastelink_lib::peer::{Role, RtcEngine};
use pastelink_lib::SessionController;
use std::sync::Arc;

pub async fn run(config: PeerConfig, args: &ExchangeArgs) -> Result<()> {
    ensure_dir(args)?;
    let mut medium = args.open_medium(Role::Answerer)?;
    println!("Waiting for the offer in {}...", args.inbox_hint(Role::Answerer));
    wait_for_payload(medium.as_mut()).await?;

    let engine = Arc::new(RtcEngine::new(config.clone()));
    let mut controller = SessionController::new(engine, &config);
    controller.process_offer(medium.as_mut()).await?;
    println!("{}", controller.status());

    converse(&mut controller, Role::Answerer, args).await
}
