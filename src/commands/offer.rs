use super::{converse, ensure_dir, wait_for_payload, ExchangeArgs};
use anyhow::Result;
use pastelink_lib::config::PeerConfig;
use pastelink_lib::peer::{Role, RtcEngine};
use pastelink_lib::SessionController;
use std::sync::Arc;
use tracing::info;

pub async fn run(config: PeerConfig, args: &ExchangeArgs) -> Result<()> {
    ensure_dir(args)?;
    let mut medium = args.open_medium(Role::Offerer)?;
    let engine = Arc::new(RtcEngine::new(config.clone()));
    let mut controller = SessionController::new(engine, &config);

    controller.create_offer(medium.as_mut()).await?;
    println!("{}", controller.status());
    println!("Waiting for the answer in {}...", args.inbox_hint(Role::Offerer));

    wait_for_payload(medium.as_mut()).await?;
    controller.process_answer(medium.as_mut()).await?;
    info!(status = %controller.status(), "answer applied");

    converse(&mut controller, Role::Offerer, args).await
}
