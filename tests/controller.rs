use std::sync::Arc;

use pastelink_lib::config::PeerConfig;
use pastelink_lib::peer::Role;
use pastelink_lib::signaling::{FileMedium, MemoryMedium};
use pastelink_lib::utils::random_id;
use pastelink_lib::{
    Error, LoopbackEngine, SessionController, SessionStatus, TransferEncoding,
};

fn controller(engine: &LoopbackEngine, encoding: TransferEncoding) -> SessionController {
    let config = PeerConfig {
        connect_timeout_ms: 1_000,
        encoding,
        ..PeerConfig::default()
    };
    SessionController::new(Arc::new(engine.clone()), &config)
}

#[tokio::test]
async fn text_exchange_connects_and_chats() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);
    let mut bob = controller(&engine, TransferEncoding::Plain);

    let offer = alice.create_offer_text().await.unwrap();
    assert!(offer.starts_with("OFFER:\n"));
    assert!(matches!(alice.status(), SessionStatus::OfferPublished { .. }));
    assert_eq!(alice.local_payload(), Some(offer.as_str()));

    let answer = bob.accept_offer_text(&offer).await.unwrap();
    assert!(answer.starts_with("ANSWER:\n"));
    assert!(matches!(bob.status(), SessionStatus::AnswerPublished { .. }));

    alice.accept_answer_text(&answer).await.unwrap();
    assert_eq!(alice.status(), &SessionStatus::Connecting);

    alice.wait_connected().await.unwrap();
    bob.wait_connected().await.unwrap();
    assert!(alice.is_connected() && bob.is_connected());
    assert_eq!(alice.role().await, Some(Role::Offerer));
    assert_eq!(bob.role().await, Some(Role::Answerer));

    for i in 1..=3 {
        alice
            .send_message(&format!("Message {i} from offerer"))
            .await
            .unwrap();
    }
    bob.send_message("Message 1 from answerer").await.unwrap();

    assert_eq!(
        bob.refresh_messages().await.unwrap(),
        [
            "Message 1 from offerer",
            "Message 2 from offerer",
            "Message 3 from offerer"
        ]
    );
    // the transcript keeps earlier messages
    alice.send_message("one more").await.unwrap();
    assert_eq!(bob.refresh_messages().await.unwrap().len(), 4);
    assert_eq!(
        alice.refresh_messages().await.unwrap(),
        ["Message 1 from answerer"]
    );

    alice.close().await;
    bob.close().await;
    assert_eq!(alice.status(), &SessionStatus::Closed);
    assert_eq!(engine.released(), 2);
}

#[tokio::test]
async fn compact_payloads_carry_the_exchange() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Compact);
    let mut bob = controller(&engine, TransferEncoding::Plain);

    let offer = alice.create_offer_text().await.unwrap();
    assert!(!offer.contains("v=0"));

    // the answerer reads compact regardless of its own encoding
    let answer = bob.accept_offer_text(&offer).await.unwrap();
    alice.accept_answer_text(&answer).await.unwrap();
    alice.wait_connected().await.unwrap();
    bob.wait_connected().await.unwrap();
}

#[tokio::test]
async fn memory_medium_exchange() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Compact);
    let mut bob = controller(&engine, TransferEncoding::Compact);

    // one shared slot, as a clipboard would be
    let mut clipboard = MemoryMedium::new();
    alice.create_offer(&mut clipboard).await.unwrap();
    bob.process_offer(&mut clipboard.clone()).await.unwrap();
    assert!(clipboard.contents().unwrap().starts_with("ANSWER:"));
    alice.process_answer(&mut clipboard).await.unwrap();

    alice.wait_connected().await.unwrap();
    bob.wait_connected().await.unwrap();
    assert_eq!(bob.status(), &SessionStatus::Connected);
}

#[tokio::test]
async fn file_medium_exchange() {
    let dir = std::env::temp_dir().join(format!("pastelink-test-{}", random_id()));
    std::fs::create_dir_all(&dir).unwrap();
    let offer_file = dir.join("offer.txt");
    let answer_file = dir.join("answer.txt");

    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);
    let mut bob = controller(&engine, TransferEncoding::Plain);
    let mut alice_files = FileMedium::new(&offer_file, &answer_file);
    let mut bob_files = FileMedium::new(&answer_file, &offer_file);

    alice_files.clear().unwrap();
    assert!(matches!(
        alice.process_answer(&mut alice_files).await,
        Err(Error::UnrecognizedPayload(_))
    ));
    assert_eq!(alice.status(), &SessionStatus::NoAnswerAvailable);

    alice.create_offer(&mut alice_files).await.unwrap();
    bob.process_offer(&mut bob_files).await.unwrap();
    alice.process_answer(&mut alice_files).await.unwrap();
    alice.wait_connected().await.unwrap();

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn wrong_payloads_are_reported() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);
    let mut bob = controller(&engine, TransferEncoding::Plain);

    assert!(matches!(
        bob.accept_offer_text("hello there").await,
        Err(Error::UnrecognizedPayload(_))
    ));
    assert_eq!(bob.status(), &SessionStatus::NoOfferAvailable);

    // an offer pasted where an answer belongs
    let offer = alice.create_offer_text().await.unwrap();
    assert!(matches!(
        alice.accept_answer_text(&offer).await,
        Err(Error::UnrecognizedPayload(_))
    ));
    assert_eq!(alice.status(), &SessionStatus::NoAnswerAvailable);

    assert!(matches!(
        bob.accept_offer_text("OFFER:\n").await,
        Err(Error::MalformedDescription(_))
    ));
    assert!(matches!(bob.status(), SessionStatus::Error(_)));
    assert_eq!(engine.allocated(), 1);
}

#[tokio::test]
async fn answer_before_offer_is_out_of_order() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);
    let mut bob = controller(&engine, TransferEncoding::Plain);

    let mut other = controller(&engine, TransferEncoding::Plain);
    let offer = other.create_offer_text().await.unwrap();
    let answer = bob.accept_offer_text(&offer).await.unwrap();

    assert!(matches!(
        alice.accept_answer_text(&answer).await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(alice.status(), SessionStatus::Error(_)));
}

#[tokio::test]
async fn unconnected_controller_refuses_to_send() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);

    assert!(!alice.poll().await.unwrap());
    assert!(matches!(
        alice.send_message("hi").await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(alice.wait_connected().await, Err(Error::NotConnected)));
    assert!(alice.refresh_messages().await.unwrap().is_empty());

    alice.create_offer_text().await.unwrap();
    assert!(!alice.poll().await.unwrap());
    assert!(matches!(
        alice.send_message("hi").await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn new_offer_replaces_the_previous_connection() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);

    let first = alice.create_offer_text().await.unwrap();
    let second = alice.create_offer_text().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(engine.released(), 1);
    assert_eq!(engine.live(), 1);
}

#[tokio::test]
async fn poll_reports_a_severed_session() {
    let engine = LoopbackEngine::new();
    let mut alice = controller(&engine, TransferEncoding::Plain);
    let mut bob = controller(&engine, TransferEncoding::Plain);
    let offer = alice.create_offer_text().await.unwrap();
    let answer = bob.accept_offer_text(&offer).await.unwrap();
    alice.accept_answer_text(&answer).await.unwrap();
    assert!(alice.poll().await.unwrap());

    engine.sever("network gone");
    assert!(matches!(alice.poll().await, Err(Error::Failed(_))));
    assert!(!alice.is_connected());
    assert_eq!(
        alice.status(),
        &SessionStatus::Error("peer connection failed: network gone".into())
    );
}
