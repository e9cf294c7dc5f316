use procura_core::{InMemoryTranscript, Role, TranscriptMessage, TranscriptStore, TurnMetrics};

#[tokio::test]
async fn in_memory_transcript_keeps_order_per_thread() {
    let store = InMemoryTranscript::new();
    store
        .save_message(&TranscriptMessage::new("t1", Role::User, "question"))
        .await
        .expect("save user");
    store
        .save_message(
            &TranscriptMessage::new("t1", Role::Assistant, "answer").with_metrics(TurnMetrics {
                total_time_ms: 12,
                time_to_first_token_ms: Some(3),
                streamed: true,
                fallback: false,
            }),
        )
        .await
        .expect("save assistant");
    store
        .save_message(&TranscriptMessage::new("t2", Role::User, "other"))
        .await
        .expect("save other thread");

    let messages = store.load_messages("t1").await.expect("load");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "question");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(
        messages[1].metrics.as_ref().and_then(|m| m.time_to_first_token_ms),
        Some(3)
    );

    store.clear_thread("t1").await.expect("clear");
    assert!(store.load_messages("t1").await.expect("load").is_empty());
    assert_eq!(store.load_messages("t2").await.expect("load").len(), 1);
}
