use std::sync::{Arc, Mutex};
use std::time::Duration;

use grantscribe_engine::{
    AssemblerOptions, DEFAULT_END_OF_CONTENT, DEFAULT_ERROR_PREFIX, EngineSettings,
    ExchangeState, FailureKind, Sentinels, Transcript, TranscriptAssembler, channel_transport,
};

#[tokio::test]
async fn streamed_exchange_lands_in_transcript_with_citations() {
    let mut transcript = Transcript::new();
    let exchange = transcript.begin_exchange("Which USDA grants fit us?").unwrap();
    let (tx, transport, _cancel) = channel_transport();

    for frame in [
        "The ",
        "Community Facilities ",
        "program fits.",
        DEFAULT_END_OF_CONTENT,
        r#"[{"title":"","uri":"s3://kb/usda/cf-guide.pdf"},{"title":"NOFO","uri":"s3://kb/usda/nofo.pdf"}]"#,
    ] {
        tx.send(frame.to_string()).unwrap();
    }

    let mut assembler =
        TranscriptAssembler::new(exchange, Box::new(transport), AssemblerOptions::default());
    let renders = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&renders);
    assembler.subscribe(move |_| *counter.lock().unwrap() += 1);

    assembler.run().await;
    let (exchange, _transport) = assembler.into_parts();

    assert_eq!(exchange.state, ExchangeState::Complete);
    assert_eq!(exchange.assistant_text, "The Community Facilities program fits.");
    let titles = exchange
        .citations
        .iter()
        .map(|citation| citation.title.as_str())
        .collect::<Vec<_>>();
    assert_eq!(titles, ["cf-guide.pdf", "NOFO"]);
    assert_eq!(*renders.lock().unwrap(), 5);

    transcript.finish_exchange(exchange).unwrap();
    assert!(transcript.accepts_input());
    assert_eq!(transcript.history().count(), 1);
}

#[tokio::test]
async fn error_first_frame_fails_without_touching_text() {
    let mut transcript = Transcript::new();
    let exchange = transcript.begin_exchange("hello").unwrap();
    let (tx, transport, cancel) = channel_transport();
    tx.send(format!("{DEFAULT_ERROR_PREFIX}boom")).unwrap();
    tx.send("never appended".to_string()).unwrap();

    let mut assembler =
        TranscriptAssembler::new(exchange, Box::new(transport), AssemblerOptions::default());
    let exchange = assembler.run().await.clone();

    assert_eq!(exchange.state, ExchangeState::Failed);
    assert_eq!(exchange.failure_kind(), Some(FailureKind::Upstream));
    assert!(exchange.assistant_text.is_empty());
    assert!(exchange.citations.is_empty());
    assert!(cancel.await.is_ok());

    transcript.finish_exchange(exchange).unwrap();
    assert_eq!(transcript.history().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn configured_sentinels_and_timeout_drive_the_assembler() {
    let mut settings = EngineSettings::default();
    settings.sentinels = Sentinels::new("<ERR>", "<END>");
    settings.stream.no_data_timeout_secs = 5;

    let mut transcript = Transcript::new();
    let exchange = transcript.begin_exchange("q").unwrap();
    let (tx, transport, _cancel) = channel_transport();
    let mut assembler =
        TranscriptAssembler::new(exchange, Box::new(transport), AssemblerOptions::from(&settings));

    let producer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        let _ = tx.send("too late".to_string());
    });

    let exchange = assembler.run().await.clone();
    producer.await.unwrap();
    assert_eq!(exchange.failure_kind(), Some(FailureKind::Timeout));
    assert!(exchange.assistant_text.is_empty());

    let (tx, transport, _cancel) = channel_transport();
    let next = transcript.begin_exchange("q2");
    assert!(next.is_err());
    transcript.finish_exchange(exchange).unwrap();

    let next = transcript.begin_exchange("q2").unwrap();
    for frame in ["ok", "<END>", "[]"] {
        tx.send(frame.to_string()).unwrap();
    }
    let mut assembler =
        TranscriptAssembler::new(next, Box::new(transport), AssemblerOptions::from(&settings));
    assert_eq!(assembler.run().await.state, ExchangeState::Complete);
}
